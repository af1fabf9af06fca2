use candle_core::{Result, Tensor};
use candle_nn::{Activation, Dropout, Embedding, Init, Module, VarBuilder};
use tracing::debug;

use super::message::{block_message, embedding_message, relational_message};
use super::traits::GraphModule;
use super::utils::{xavier_uniform, RELU_GAIN};
use super::weights::{BlockDiagonalWeights, RelationWeights};
use crate::graph::{sum_reducer, Graph, HIDDEN, NODE_ID, NORM};

/// How a relational layer turns the current node state into aggregated
/// neighbour messages stored in [`HIDDEN`].
pub trait Propagate {
    fn propagate(&self, graph: &mut Graph) -> Result<()>;
}

/// Basis-decomposed relational propagation (https://arxiv.org/abs/1703.06103).
///
/// Input layers look up rows of the weight bank by raw node id instead of
/// multiplying one-hot features; other layers transform [`HIDDEN`].
/// Messages are scaled by the edge [`NORM`].
pub struct BasisPropagation {
    weights: RelationWeights,
    is_input_layer: bool,
}
impl BasisPropagation {
    pub fn new(weights: RelationWeights, is_input_layer: bool) -> Self {
        Self {
            weights,
            is_input_layer,
        }
    }
}
impl Propagate for BasisPropagation {
    fn propagate(&self, graph: &mut Graph) -> Result<()> {
        let weights = self.weights.weights()?;
        if self.is_input_layer {
            graph.update_all(|edges| embedding_message(&weights, edges), sum_reducer)
        } else {
            graph.update_all(|edges| relational_message(&weights, edges), sum_reducer)
        }
    }
}

/// Block-diagonal relational propagation. The summed messages are scaled by
/// the node [`NORM`].
pub struct BlockPropagation {
    weights: BlockDiagonalWeights,
}
impl BlockPropagation {
    pub fn new(weights: BlockDiagonalWeights) -> Self {
        Self { weights }
    }
}
impl Propagate for BlockPropagation {
    fn propagate(&self, graph: &mut Graph) -> Result<()> {
        graph.update_all_with_apply(
            |edges| block_message(&self.weights, edges),
            sum_reducer,
            |nodes| nodes.data(HIDDEN)?.broadcast_mul(nodes.data(NORM)?),
        )
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LayerOptions {
    pub bias: bool,
    pub self_loop: bool,
    pub dropout_rate: f32,
    pub activation: Option<Activation>,
}
impl Default for LayerOptions {
    fn default() -> Self {
        Self {
            bias: false,
            self_loop: false,
            dropout_rate: 0.0,
            activation: None,
        }
    }
}

/// Relational graph convolution:
///
/// ```text
/// h' = act( propagate(h) + bias + dropout(h @ loop_weight) )
/// ```
pub struct RgcnLayer {
    propagation: Box<dyn Propagate>,
    bias: Option<Tensor>,
    loop_weight: Option<Tensor>,
    dropout: Option<Dropout>,
    activation: Option<Activation>,
}

impl RgcnLayer {
    pub fn new(
        propagation: Box<dyn Propagate>,
        in_dim: usize,
        out_dim: usize,
        options: LayerOptions,
        vs: VarBuilder,
    ) -> Result<Self> {
        let bias = if options.bias {
            Some(vs.get_with_hints(out_dim, "bias", Init::Const(0.0))?)
        } else {
            None
        };
        let loop_weight = if options.self_loop {
            let dims = [in_dim, out_dim];
            Some(vs.get_with_hints(&dims[..], "loop_weight", xavier_uniform(&dims, RELU_GAIN))?)
        } else {
            None
        };
        Ok(Self::from_parts(
            propagation,
            bias,
            loop_weight,
            options.dropout_rate,
            options.activation,
        ))
    }

    pub fn from_parts(
        propagation: Box<dyn Propagate>,
        bias: Option<Tensor>,
        loop_weight: Option<Tensor>,
        dropout_rate: f32,
        activation: Option<Activation>,
    ) -> Self {
        Self {
            propagation,
            bias,
            loop_weight,
            dropout: (dropout_rate > 0.0).then(|| Dropout::new(dropout_rate)),
            activation,
        }
    }

    pub fn basis(
        in_dim: usize,
        out_dim: usize,
        num_relations: usize,
        num_bases: usize,
        is_input_layer: bool,
        options: LayerOptions,
        vs: VarBuilder,
    ) -> Result<Self> {
        debug!(in_dim, out_dim, is_input_layer, ?options, "basis layer");
        let weights = RelationWeights::new(in_dim, out_dim, num_relations, num_bases, vs.clone())?;
        let propagation = Box::new(BasisPropagation::new(weights, is_input_layer));
        Self::new(propagation, in_dim, out_dim, options, vs)
    }

    pub fn block(
        in_dim: usize,
        out_dim: usize,
        num_relations: usize,
        num_bases: usize,
        options: LayerOptions,
        vs: VarBuilder,
    ) -> Result<Self> {
        debug!(in_dim, out_dim, ?options, "block-diagonal layer");
        let weights = BlockDiagonalWeights::new(in_dim, out_dim, num_relations, num_bases, vs.clone())?;
        Self::new(Box::new(BlockPropagation::new(weights)), in_dim, out_dim, options, vs)
    }
}

impl GraphModule for RgcnLayer {
    fn forward_t(&self, graph: &mut Graph, train: bool) -> Result<()> {
        let loop_message = match &self.loop_weight {
            Some(loop_weight) => {
                let message = graph.ndata(HIDDEN)?.matmul(loop_weight)?;
                Some(match &self.dropout {
                    Some(dropout) => dropout.forward(&message, train)?,
                    None => message,
                })
            }
            None => None,
        };

        self.propagation.propagate(graph)?;

        let mut h = graph.ndata(HIDDEN)?.clone();
        if let Some(bias) = &self.bias {
            h = h.broadcast_add(bias)?;
        }
        if let Some(loop_message) = loop_message {
            h = (h + loop_message)?;
        }
        if let Some(activation) = &self.activation {
            h = activation.forward(&h)?;
        }
        graph.set_ndata(HIDDEN, h)
    }
}

/// Learned node embeddings looked up by [`NODE_ID`], written to [`HIDDEN`].
pub struct EmbeddingLayer {
    embedding: Embedding,
}
impl EmbeddingLayer {
    pub fn new(num_nodes: usize, h_dim: usize, vs: VarBuilder) -> Result<Self> {
        Ok(Self {
            embedding: candle_nn::embedding(num_nodes, h_dim, vs)?,
        })
    }
}
impl GraphModule for EmbeddingLayer {
    fn forward_t(&self, graph: &mut Graph, _train: bool) -> Result<()> {
        let h = self.embedding.forward(graph.ndata(NODE_ID)?)?;
        graph.set_ndata(HIDDEN, h)
    }
}
