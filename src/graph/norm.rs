use candle_core::{Result, Tensor};

use super::Graph;

// deg^power, with 0 for nodes of degree 0.
fn degree_power(degree: &Tensor, power: f64) -> Result<Tensor> {
    let norm = degree.maximum(1f64)?.powf(power)?;
    degree.gt(0f64)?.where_cond(&norm, &norm.zeros_like()?)
}

/// `in_degree^-1/2` per node as an `[N, 1]` column.
pub fn symmetric_norm(graph: &Graph) -> Result<Tensor> {
    degree_power(&graph.in_degrees()?, -0.5)?.unsqueeze(1)
}

/// `1 / in_degree` per node as an `[N, 1]` column.
pub fn inverse_in_degree_norm(graph: &Graph) -> Result<Tensor> {
    degree_power(&graph.in_degrees()?, -1.0)?.unsqueeze(1)
}

/// `1 / in_degree(dst)` per edge as an `[E, 1]` column, so the messages
/// reaching a node average instead of sum.
pub fn dst_degree_edge_norm(graph: &Graph) -> Result<Tensor> {
    inverse_in_degree_norm(graph)?.index_select(graph.dst(), 0)
}
