mod container;
pub use container::{Graph, EDGE_TYPE, HIDDEN, NODE_ID, NORM, PARENT_ID};
mod batch;
pub use batch::{sum_reducer, EdgeBatch, Mailbox, NodeBatch};
mod norm;
pub use norm::{dst_degree_edge_norm, inverse_in_degree_norm, symmetric_norm};

pub mod partition;
