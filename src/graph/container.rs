use std::collections::{HashMap, HashSet};

use candle_core::{DType, Device, Result, Tensor};
use itertools::Itertools;
use tracing::trace;

use super::batch::{EdgeBatch, Mailbox, NodeBatch};
use crate::error::GnnError;

pub const HIDDEN: &str = "h";
pub const NODE_ID: &str = "id";
/// Normalisation factor (`[N, 1]` on nodes, `[E, 1]` on edges).
pub const NORM: &str = "norm";
pub const EDGE_TYPE: &str = "type";
pub const PARENT_ID: &str = "_ID";

// Edges are kept both on the host and as `u32` index tensors on the device.
#[derive(Clone, Debug)]
pub struct Graph {
    num_nodes: usize,
    src_ids: Vec<u32>,
    dst_ids: Vec<u32>,
    src: Tensor,
    dst: Tensor,
    ndata: HashMap<String, Tensor>,
    edata: HashMap<String, Tensor>,
    device: Device,
}

impl Graph {
    pub fn new(num_nodes: usize, src: Vec<u32>, dst: Vec<u32>, device: &Device) -> Result<Self> {
        if src.len() != dst.len() {
            Err(GnnError::InvalidEdges(format!(
                "{} sources but {} destinations",
                src.len(),
                dst.len()
            )))?
        }
        if let Some(&node) = src.iter().chain(dst.iter()).find(|&&v| v as usize >= num_nodes) {
            Err(GnnError::NodeOutOfRange { node, num_nodes })?
        }
        let num_edges = src.len();
        Ok(Self {
            num_nodes,
            src: Tensor::from_vec(src.clone(), num_edges, device)?,
            dst: Tensor::from_vec(dst.clone(), num_edges, device)?,
            src_ids: src,
            dst_ids: dst,
            ndata: HashMap::new(),
            edata: HashMap::new(),
            device: device.clone(),
        })
    }
    pub fn from_edges(num_nodes: usize, edges: &[(u32, u32)], device: &Device) -> Result<Self> {
        let (src, dst) = edges.iter().copied().unzip();
        Self::new(num_nodes, src, dst, device)
    }
    /// Builds a graph from a `(2, E)` edge index, row 0 being the sources.
    pub fn from_edge_index(num_nodes: usize, edge_index: &Tensor) -> Result<Self> {
        let mut rows = edge_index.to_dtype(DType::U32)?.to_vec2::<u32>()?;
        if rows.len() != 2 {
            Err(GnnError::InvalidEdges(format!(
                "edge index has {} rows, expected 2",
                rows.len()
            )))?
        }
        let dst = rows.pop().unwrap_or_default();
        let src = rows.pop().unwrap_or_default();
        Self::new(num_nodes, src, dst, edge_index.device())
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }
    pub fn num_edges(&self) -> usize {
        self.src_ids.len()
    }
    pub fn device(&self) -> &Device {
        &self.device
    }
    pub fn src(&self) -> &Tensor {
        &self.src
    }
    pub fn dst(&self) -> &Tensor {
        &self.dst
    }
    pub fn edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.src_ids.iter().copied().zip(self.dst_ids.iter().copied())
    }
    pub fn edge_index(&self) -> Result<Tensor> {
        Tensor::stack(&[&self.src, &self.dst], 0)
    }

    fn degrees(&self, index: &Tensor) -> Result<Tensor> {
        let zeros = Tensor::zeros(self.num_nodes, DType::F32, &self.device)?;
        if self.num_edges() == 0 {
            return Ok(zeros);
        }
        let ones = Tensor::ones(self.num_edges(), DType::F32, &self.device)?;
        zeros.index_add(index, &ones, 0)
    }
    pub fn in_degrees(&self) -> Result<Tensor> {
        self.degrees(&self.dst)
    }
    pub fn out_degrees(&self) -> Result<Tensor> {
        self.degrees(&self.src)
    }

    fn check_nodes(&self, nodes: &[u32]) -> Result<()> {
        if let Some(&node) = nodes.iter().find(|&&v| v as usize >= self.num_nodes) {
            Err(GnnError::NodeOutOfRange {
                node,
                num_nodes: self.num_nodes,
            })?
        }
        Ok(())
    }
    pub fn in_edges(&self, nodes: &[u32]) -> Result<Vec<(u32, u32)>> {
        self.check_nodes(nodes)?;
        let targets: HashSet<u32> = nodes.iter().copied().collect();
        Ok(self.edges().filter(|(_, d)| targets.contains(d)).collect())
    }
    pub fn predecessors(&self, nodes: &[u32]) -> Result<Vec<u32>> {
        Ok(self
            .in_edges(nodes)?
            .into_iter()
            .map(|(s, _)| s)
            .unique()
            .sorted()
            .collect())
    }

    pub fn has_ndata(&self, name: &str) -> bool {
        self.ndata.contains_key(name)
    }
    pub fn ndata(&self, name: &str) -> Result<&Tensor> {
        self.ndata.get(name).ok_or_else(|| {
            GnnError::MissingField {
                scope: "node",
                name: name.to_owned(),
            }
            .into()
        })
    }
    pub fn set_ndata(&mut self, name: &str, value: Tensor) -> Result<()> {
        check_rows("node", name, &value, self.num_nodes)?;
        self.ndata.insert(name.to_owned(), value);
        Ok(())
    }
    pub fn pop_ndata(&mut self, name: &str) -> Result<Tensor> {
        self.ndata.remove(name).ok_or_else(|| {
            GnnError::MissingField {
                scope: "node",
                name: name.to_owned(),
            }
            .into()
        })
    }

    pub fn has_edata(&self, name: &str) -> bool {
        self.edata.contains_key(name)
    }
    pub fn edata(&self, name: &str) -> Result<&Tensor> {
        self.edata.get(name).ok_or_else(|| {
            GnnError::MissingField {
                scope: "edge",
                name: name.to_owned(),
            }
            .into()
        })
    }
    pub fn set_edata(&mut self, name: &str, value: Tensor) -> Result<()> {
        check_rows("edge", name, &value, self.num_edges())?;
        self.edata.insert(name.to_owned(), value);
        Ok(())
    }
    pub fn pop_edata(&mut self, name: &str) -> Result<Tensor> {
        self.edata.remove(name).ok_or_else(|| {
            GnnError::MissingField {
                scope: "edge",
                name: name.to_owned(),
            }
            .into()
        })
    }

    /// Computes a message per edge and reduces the messages per destination
    /// node. The result lands in [`HIDDEN`].
    pub fn update_all<M, R>(&mut self, message_fn: M, reduce_fn: R) -> Result<()>
    where
        M: Fn(&EdgeBatch) -> Result<Tensor>,
        R: Fn(&Mailbox) -> Result<Tensor>,
    {
        trace!(
            num_nodes = self.num_nodes,
            num_edges = self.num_edges(),
            "update_all"
        );
        let messages = message_fn(&EdgeBatch { graph: self })?;
        let reduced = reduce_fn(&Mailbox {
            messages: &messages,
            dst: &self.dst,
            num_nodes: self.num_nodes,
        })?;
        self.set_ndata(HIDDEN, reduced)
    }

    pub fn update_all_with_apply<M, R, A>(
        &mut self,
        message_fn: M,
        reduce_fn: R,
        apply_fn: A,
    ) -> Result<()>
    where
        M: Fn(&EdgeBatch) -> Result<Tensor>,
        R: Fn(&Mailbox) -> Result<Tensor>,
        A: Fn(&NodeBatch) -> Result<Tensor>,
    {
        self.update_all(message_fn, reduce_fn)?;
        self.apply_nodes(apply_fn)
    }

    pub fn apply_nodes<A>(&mut self, apply_fn: A) -> Result<()>
    where
        A: Fn(&NodeBatch) -> Result<Tensor>,
    {
        let applied = apply_fn(&NodeBatch { graph: self })?;
        self.set_ndata(HIDDEN, applied)
    }

    /// Node-induced subgraph. Nodes keep the order of `nodes`, features are
    /// sliced and the parent ids are stored under [`PARENT_ID`].
    pub fn subgraph(&self, nodes: &[u32]) -> Result<Graph> {
        self.check_nodes(nodes)?;
        let mut local = HashMap::with_capacity(nodes.len());
        for (i, &v) in nodes.iter().enumerate() {
            local.entry(v).or_insert(i as u32);
        }
        let mut src = Vec::new();
        let mut dst = Vec::new();
        let mut kept = Vec::new();
        for (eid, (s, d)) in self.edges().enumerate() {
            if let (Some(&s), Some(&d)) = (local.get(&s), local.get(&d)) {
                src.push(s);
                dst.push(d);
                kept.push(eid as u32);
            }
        }
        let node_index = Tensor::from_vec(nodes.to_vec(), nodes.len(), &self.device)?;
        let mut sg = Graph::new(nodes.len(), src, dst, &self.device)?;
        for (name, value) in &self.ndata {
            sg.ndata
                .insert(name.clone(), value.index_select(&node_index, 0)?);
        }
        sg.edata = self.select_edges(&kept)?;
        sg.ndata.insert(PARENT_ID.to_owned(), node_index);
        Ok(sg)
    }

    fn select_edges(&self, eids: &[u32]) -> Result<HashMap<String, Tensor>> {
        let index = Tensor::from_vec(eids.to_vec(), eids.len(), &self.device)?;
        self.edata
            .iter()
            .map(|(name, value)| Ok((name.clone(), value.index_select(&index, 0)?)))
            .collect()
    }

    /// Copy of the graph with an extra `v -> v` edge for every node. Edge
    /// features of the new edges are zero.
    pub fn add_self_loop(&self) -> Result<Graph> {
        let loops: Vec<u32> = (0..self.num_nodes as u32).collect();
        let src = self.src_ids.iter().copied().chain(loops.iter().copied()).collect();
        let dst = self.dst_ids.iter().copied().chain(loops).collect();
        let mut g = Graph::new(self.num_nodes, src, dst, &self.device)?;
        g.ndata = self.ndata.clone();
        for (name, value) in &self.edata {
            let mut shape = value.dims().to_vec();
            shape[0] = self.num_nodes;
            let pad = Tensor::zeros(shape, value.dtype(), &self.device)?;
            g.edata.insert(name.clone(), Tensor::cat(&[value, &pad], 0)?);
        }
        Ok(g)
    }

    pub fn remove_self_loop(&self) -> Result<Graph> {
        let kept: Vec<u32> = self
            .edges()
            .enumerate()
            .filter(|(_, (s, d))| s != d)
            .map(|(eid, _)| eid as u32)
            .collect();
        let src = kept.iter().map(|&e| self.src_ids[e as usize]).collect();
        let dst = kept.iter().map(|&e| self.dst_ids[e as usize]).collect();
        let mut g = Graph::new(self.num_nodes, src, dst, &self.device)?;
        g.ndata = self.ndata.clone();
        g.edata = self.select_edges(&kept)?;
        Ok(g)
    }
}

fn check_rows(scope: &'static str, name: &str, value: &Tensor, expected: usize) -> Result<()> {
    let actual = value.dim(0)?;
    if actual != expected {
        Err(GnnError::FieldShape {
            scope,
            name: name.to_owned(),
            expected,
            actual,
        })?
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::sum_reducer;

    fn path(device: &Device) -> Result<Graph> {
        // 0 -> 1 -> 2, 2 -> 2, 3 -> 1
        Graph::from_edges(4, &[(0, 1), (1, 2), (2, 2), (3, 1)], device)
    }

    #[test]
    fn rejects_out_of_range_edges() {
        let device = Device::Cpu;
        let err = Graph::from_edges(2, &[(0, 2)], &device).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
    }

    #[test]
    fn degrees() -> Result<()> {
        let g = path(&Device::Cpu)?;
        assert_eq!(g.in_degrees()?.to_vec1::<f32>()?, vec![0., 2., 2., 0.]);
        assert_eq!(g.out_degrees()?.to_vec1::<f32>()?, vec![1., 1., 1., 1.]);
        Ok(())
    }

    #[test]
    fn edge_index_round_trip() -> Result<()> {
        let device = Device::Cpu;
        let g = path(&device)?;
        let h = Graph::from_edge_index(4, &g.edge_index()?)?;
        assert_eq!(h.edges().collect::<Vec<_>>(), g.edges().collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn in_edges_and_predecessors() -> Result<()> {
        let g = path(&Device::Cpu)?;
        assert_eq!(g.in_edges(&[1])?, vec![(0, 1), (3, 1)]);
        assert_eq!(g.predecessors(&[1, 2])?, vec![0, 1, 2, 3]);
        assert!(g.in_edges(&[7]).is_err());
        Ok(())
    }

    #[test]
    fn field_shapes_are_checked() -> Result<()> {
        let device = Device::Cpu;
        let mut g = path(&device)?;
        assert!(g.set_ndata(HIDDEN, Tensor::zeros((3, 2), DType::F32, &device)?).is_err());
        assert!(g.set_edata(NORM, Tensor::zeros((3, 1), DType::F32, &device)?).is_err());
        g.set_ndata(HIDDEN, Tensor::zeros((4, 2), DType::F32, &device)?)?;
        assert!(g.has_ndata(HIDDEN));
        g.pop_ndata(HIDDEN)?;
        let err = g.ndata(HIDDEN).unwrap_err();
        assert!(err.to_string().contains("`h` is not set"), "{err}");
        Ok(())
    }

    #[test]
    fn edge_fields_can_be_taken_back() -> Result<()> {
        let device = Device::Cpu;
        let mut g = path(&device)?;
        assert!(!g.has_edata(EDGE_TYPE));
        g.set_edata(EDGE_TYPE, Tensor::new(&[0u32, 1, 1, 0], &device)?)?;
        assert!(g.has_edata(EDGE_TYPE));
        assert_eq!(g.pop_edata(EDGE_TYPE)?.to_vec1::<u32>()?, vec![0, 1, 1, 0]);
        assert!(!g.has_edata(EDGE_TYPE));
        let err = g.pop_edata(EDGE_TYPE).unwrap_err();
        assert!(err.to_string().contains("edge field `type`"), "{err}");
        Ok(())
    }

    #[test]
    fn update_all_sums_sources() -> Result<()> {
        let device = Device::Cpu;
        let mut g = path(&device)?;
        g.set_ndata(HIDDEN, Tensor::new(&[[1f32], [10.], [100.], [1000.]], &device)?)?;
        g.update_all(|edges| edges.src(HIDDEN), sum_reducer)?;
        assert_eq!(
            g.ndata(HIDDEN)?.to_vec2::<f32>()?,
            vec![vec![0.], vec![1001.], vec![110.], vec![0.]]
        );
        Ok(())
    }

    #[test]
    fn update_all_runs_apply() -> Result<()> {
        let device = Device::Cpu;
        let mut g = path(&device)?;
        g.set_ndata(HIDDEN, Tensor::new(&[[1f32], [2.], [3.], [4.]], &device)?)?;
        g.update_all_with_apply(
            |edges| edges.src(HIDDEN),
            sum_reducer,
            |nodes| nodes.data(HIDDEN)? * 2.0,
        )?;
        assert_eq!(
            g.ndata(HIDDEN)?.to_vec2::<f32>()?,
            vec![vec![0.], vec![10.], vec![10.], vec![0.]]
        );
        Ok(())
    }

    #[test]
    fn subgraph_keeps_node_order_and_features() -> Result<()> {
        let device = Device::Cpu;
        let mut g = path(&device)?;
        g.set_ndata(HIDDEN, Tensor::new(&[[0f32], [1.], [2.], [3.]], &device)?)?;
        g.set_edata(EDGE_TYPE, Tensor::new(&[0u32, 1, 2, 3], &device)?)?;

        let sg = g.subgraph(&[2, 1])?;
        assert_eq!(sg.num_nodes(), 2);
        // 1 -> 2 and 2 -> 2 survive, relabelled to 1 -> 0 and 0 -> 0.
        assert_eq!(sg.edges().collect::<Vec<_>>(), vec![(1, 0), (0, 0)]);
        assert_eq!(sg.ndata(HIDDEN)?.to_vec2::<f32>()?, vec![vec![2.], vec![1.]]);
        assert_eq!(sg.edata(EDGE_TYPE)?.to_vec1::<u32>()?, vec![1, 2]);
        assert_eq!(sg.ndata(PARENT_ID)?.to_vec1::<u32>()?, vec![2, 1]);
        Ok(())
    }

    #[test]
    fn self_loops() -> Result<()> {
        let device = Device::Cpu;
        let mut g = path(&device)?;
        g.set_edata(NORM, Tensor::new(&[[1f32], [2.], [3.], [4.]], &device)?)?;

        let g = g.remove_self_loop()?;
        assert_eq!(g.num_edges(), 3);
        assert_eq!(g.edata(NORM)?.to_vec2::<f32>()?, vec![vec![1.], vec![2.], vec![4.]]);

        let g = g.add_self_loop()?;
        assert_eq!(g.num_edges(), 7);
        assert_eq!(g.in_degrees()?.to_vec1::<f32>()?, vec![1., 3., 2., 1.]);
        assert_eq!(g.edata(NORM)?.dims(), &[7, 1]);
        Ok(())
    }
}
