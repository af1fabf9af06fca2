use std::collections::HashSet;

use candle_core::{Result, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use super::{symmetric_norm, Graph, NORM, PARENT_ID};

/// The first `seeds.len()` nodes of `graph` are the seeds; the rest are their
/// in-neighbours.
pub struct SubgraphBatch {
    pub seeds: Vec<u32>,
    pub graph: Graph,
}
impl SubgraphBatch {
    pub fn num_seeds(&self) -> usize {
        self.seeds.len()
    }
    pub fn parent_ids(&self) -> Result<&Tensor> {
        self.graph.ndata(PARENT_ID)
    }
    pub fn gather(&self, xs: &Tensor) -> Result<Tensor> {
        xs.index_select(self.parent_ids()?, 0)
    }
    pub fn seed_rows(&self, xs: &Tensor) -> Result<Tensor> {
        xs.narrow(0, 0, self.num_seeds())
    }
}

/// Randomly permutes the nodes and cuts them into chunks of `ceil(n / k)`.
pub fn random_chunks<R: Rng + ?Sized>(
    num_nodes: usize,
    num_chunks: usize,
    rng: &mut R,
) -> Vec<Vec<u32>> {
    let mut ids: Vec<u32> = (0..num_nodes as u32).collect();
    ids.shuffle(rng);
    if ids.is_empty() {
        return Vec::new();
    }
    let num_chunks = num_chunks.clamp(1, ids.len());
    let chunk_size = (ids.len() + num_chunks - 1) / num_chunks;
    ids.chunks(chunk_size).map(<[u32]>::to_vec).collect()
}

pub fn with_in_neighbors(graph: &Graph, seeds: &[u32]) -> Result<Vec<u32>> {
    let seen: HashSet<u32> = seeds.iter().copied().collect();
    let mut nodes = seeds.to_vec();
    nodes.extend(
        graph
            .predecessors(seeds)?
            .into_iter()
            .filter(|v| !seen.contains(v)),
    );
    Ok(nodes)
}

/// Induced subgraph with exactly one self-loop per node and a fresh
/// [`NORM`] computed from the subgraph's own degrees.
pub fn normalized_subgraph(graph: &Graph, nodes: &[u32]) -> Result<Graph> {
    let mut sg = graph.subgraph(nodes)?.remove_self_loop()?.add_self_loop()?;
    let norm = symmetric_norm(&sg)?;
    sg.set_ndata(NORM, norm)?;
    Ok(sg)
}

pub fn partition<R: Rng + ?Sized>(
    graph: &Graph,
    num_chunks: usize,
    expand: bool,
    rng: &mut R,
) -> Result<Vec<SubgraphBatch>> {
    let batches = random_chunks(graph.num_nodes(), num_chunks, rng)
        .into_iter()
        .map(|seeds| {
            let nodes = if expand {
                with_in_neighbors(graph, &seeds)?
            } else {
                seeds.clone()
            };
            let graph = normalized_subgraph(graph, &nodes)?;
            Ok(SubgraphBatch { seeds, graph })
        })
        .collect::<Result<Vec<_>>>()?;
    debug!(
        num_batches = batches.len(),
        expand,
        sizes = ?batches.iter().map(|b| b.graph.num_nodes()).collect::<Vec<_>>(),
        "partitioned graph"
    );
    Ok(batches)
}
