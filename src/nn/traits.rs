use candle_core::{Result, Tensor};

use crate::graph::Graph;

/// Layer mapping node features to node features over a fixed graph.
pub trait GnnModule {
    fn forward_t(&self, xs: &Tensor, graph: &Graph, train: bool) -> Result<Tensor>;
    fn forward(&self, xs: &Tensor, graph: &Graph) -> Result<Tensor> {
        self.forward_t(xs, graph, false)
    }
}

/// Layer that reads and overwrites node fields of the graph in place.
pub trait GraphModule {
    fn forward_t(&self, graph: &mut Graph, train: bool) -> Result<()>;
}
