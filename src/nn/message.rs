//! Per-edge message functions for [`Graph::update_all`](crate::graph::Graph::update_all).
use candle_core::{Result, Tensor};

use super::weights::BlockDiagonalWeights;
use crate::graph::{EdgeBatch, EDGE_TYPE, HIDDEN, NODE_ID, NORM};

/// The source hidden state, unchanged.
pub fn copy_src(edges: &EdgeBatch) -> Result<Tensor> {
    edges.src(HIDDEN)
}

/// Input-layer message: `one_hot(src id) @ W[type]` as an embedding lookup.
///
/// `weights` (`[num_relations, in_dim, out_dim]`) is read as a table of
/// `num_relations * in_dim` rows; the row of an edge is
/// `type * in_dim + src[NODE_ID]`. Raw node ids must be below `in_dim`.
pub fn embedding_message(weights: &Tensor, edges: &EdgeBatch) -> Result<Tensor> {
    let (num_relations, in_dim, out_dim) = weights.dims3()?;
    let table = weights.reshape((num_relations * in_dim, out_dim))?;
    let index = edges
        .data(EDGE_TYPE)?
        .affine(in_dim as f64, 0.0)?
        .add(&edges.src(NODE_ID)?)?;
    table
        .index_select(&index, 0)?
        .broadcast_mul(edges.data(NORM)?)
}

/// Interior-layer message: `src[HIDDEN] @ W[type]`, scaled by the edge norm.
pub fn relational_message(weights: &Tensor, edges: &EdgeBatch) -> Result<Tensor> {
    let hidden = edges.src(HIDDEN)?;
    if edges.num_edges() == 0 {
        let out_dim = weights.dim(2)?;
        return Tensor::zeros((0, out_dim), hidden.dtype(), hidden.device());
    }
    let per_edge = weights.index_select(edges.data(EDGE_TYPE)?, 0)?;
    hidden
        .unsqueeze(1)?
        .matmul(&per_edge)?
        .squeeze(1)?
        .broadcast_mul(edges.data(NORM)?)
}

/// Block-diagonal message: `src[HIDDEN]` through the blocks of its relation.
pub fn block_message(weights: &BlockDiagonalWeights, edges: &EdgeBatch) -> Result<Tensor> {
    weights.transform(&edges.src(HIDDEN)?, edges.data(EDGE_TYPE)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{sum_reducer, Graph};
    use candle_core::{DType, Device, IndexOp};

    fn typed_graph(device: &Device) -> Result<Graph> {
        // 0 -r1-> 2, 1 -r0-> 2, 2 -r1-> 0
        let mut g = Graph::from_edges(3, &[(0, 2), (1, 2), (2, 0)], device)?;
        g.set_edata(EDGE_TYPE, Tensor::new(&[1u32, 0, 1], device)?)?;
        g.set_edata(NORM, Tensor::new(&[[1f32], [0.5], [2.]], device)?)?;
        Ok(g)
    }

    #[test]
    fn embedding_lookup_equals_one_hot_product() -> Result<()> {
        let device = Device::Cpu;
        let mut g = typed_graph(&device)?;
        let weights = Tensor::randn(0f32, 1., (2, 3, 4), &device)?;

        g.set_ndata(NODE_ID, Tensor::arange(0u32, 3, &device)?)?;
        g.update_all(|edges| embedding_message(&weights, edges), sum_reducer)?;
        let lookup = g.pop_ndata(HIDDEN)?;

        g.set_ndata(HIDDEN, Tensor::eye(3, DType::F32, &device)?)?;
        g.update_all(|edges| relational_message(&weights, edges), sum_reducer)?;
        let product = g.pop_ndata(HIDDEN)?;

        let diff = (lookup - product)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?;
        assert!(diff < 1e-5);
        Ok(())
    }

    #[test]
    fn relational_message_uses_edge_type_and_norm() -> Result<()> {
        let device = Device::Cpu;
        let mut g = typed_graph(&device)?;
        // relation 0 doubles, relation 1 negates
        let eye = Tensor::eye(2, DType::F32, &device)?;
        let weights = Tensor::stack(&[(&eye * 2.0)?, (&eye * -1.0)?], 0)?;
        g.set_ndata(HIDDEN, Tensor::new(&[[1f32, 0.], [0., 1.], [3., 3.]], &device)?)?;
        g.update_all(|edges| relational_message(&weights, edges), sum_reducer)?;
        let h = g.ndata(HIDDEN)?;
        // node 2: -1 * [1, 0] * 1 + 2 * [0, 1] * 0.5
        assert_eq!(h.i(2)?.to_vec1::<f32>()?, vec![-1., 1.]);
        // node 0: -1 * [3, 3] * 2
        assert_eq!(h.i(0)?.to_vec1::<f32>()?, vec![-6., -6.]);
        assert_eq!(h.i(1)?.to_vec1::<f32>()?, vec![0., 0.]);
        Ok(())
    }

    #[test]
    fn copy_src_forwards_hidden_state() -> Result<()> {
        let device = Device::Cpu;
        let mut g = typed_graph(&device)?;
        g.set_ndata(HIDDEN, Tensor::new(&[[1f32], [2.], [4.]], &device)?)?;
        g.update_all(copy_src, sum_reducer)?;
        assert_eq!(g.ndata(HIDDEN)?.to_vec2::<f32>()?, vec![vec![4.], vec![0.], vec![3.]]);
        Ok(())
    }
}
