mod traits;
pub use traits::{GnnModule, GraphModule};
pub mod utils;

mod gcn;
pub use gcn::{Gcn, GcnConv, GcnParams};

pub mod message;
mod weights;
pub use weights::{effective_num_bases, BlockDiagonalWeights, RelationWeights};
mod rgcn;
pub use rgcn::{
    BasisPropagation, BlockPropagation, EmbeddingLayer, LayerOptions, Propagate, RgcnLayer,
};
