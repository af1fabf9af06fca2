mod gcn;
pub use gcn::{MessagePassingGcn, NodeApply};
mod rgcn;
pub use rgcn::{Rgcn, RgcnParams};
