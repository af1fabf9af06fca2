use candle_core::{Result, Tensor};

use super::Graph;

/// Edge-wise view handed to message functions.
pub struct EdgeBatch<'a> {
    pub(super) graph: &'a Graph,
}
impl<'a> EdgeBatch<'a> {
    pub fn num_edges(&self) -> usize {
        self.graph.num_edges()
    }
    pub fn src(&self, name: &str) -> Result<Tensor> {
        self.graph.ndata(name)?.index_select(self.graph.src(), 0)
    }
    pub fn data(&self, name: &str) -> Result<&'a Tensor> {
        self.graph.edata(name)
    }
}

/// Node-wise view handed to apply functions.
pub struct NodeBatch<'a> {
    pub(super) graph: &'a Graph,
}
impl<'a> NodeBatch<'a> {
    pub fn data(&self, name: &str) -> Result<&'a Tensor> {
        self.graph.ndata(name)
    }
}

/// Messages of one propagation step together with their destinations.
pub struct Mailbox<'a> {
    pub messages: &'a Tensor,
    pub dst: &'a Tensor,
    pub num_nodes: usize,
}

/// Sums the incoming messages of every node. Nodes without in-edges get zeros.
pub fn sum_reducer(mailbox: &Mailbox) -> Result<Tensor> {
    let messages = mailbox.messages;
    let mut shape = messages.dims().to_vec();
    shape[0] = mailbox.num_nodes;
    let out = Tensor::zeros(shape, messages.dtype(), messages.device())?;
    if messages.dim(0)? == 0 {
        return Ok(out);
    }
    out.index_add(mailbox.dst, messages, 0)
}
