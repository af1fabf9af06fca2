use thiserror::Error;

#[derive(Debug, Error)]
pub enum GnnError {
    #[error("{scope} field `{name}` is not set")]
    MissingField { scope: &'static str, name: String },

    #[error("{scope} field `{name}` has leading dimension {actual}, expected {expected}")]
    FieldShape {
        scope: &'static str,
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("block-diagonal weights need in_dim ({in_dim}) and out_dim ({out_dim}) divisible by num_bases ({num_bases})")]
    IndivisibleBlocks {
        in_dim: usize,
        out_dim: usize,
        num_bases: usize,
    },

    #[error("node {node} is out of range for a graph with {num_nodes} nodes")]
    NodeOutOfRange { node: u32, num_nodes: usize },

    #[error("invalid edge list: {0}")]
    InvalidEdges(String),

    #[error("weight shape mismatch: {0}")]
    WeightShape(String),

    #[error("layer sizes need an input and an output size, got {0:?}")]
    LayerSizes(Vec<usize>),
}

impl From<GnnError> for candle_core::Error {
    fn from(err: GnnError) -> Self {
        candle_core::Error::wrap(err)
    }
}
