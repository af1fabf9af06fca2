use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{Activation, Dropout, Linear, Module, VarBuilder, VarMap};
use tracing::debug;

use crate::error::GnnError;
use crate::graph::{sum_reducer, Graph, NodeBatch, HIDDEN, NORM};
use crate::nn::message::copy_src;
use crate::nn::utils::linear;
use crate::nn::GcnParams;

/// Node update of one GCN layer: `act(linear(h * norm))`.
pub struct NodeApply {
    linear: Linear,
    activation_fn: Option<Activation>,
}
impl NodeApply {
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        activation_fn: Option<Activation>,
        vs: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            linear: linear(in_dim, out_dim, vs.pp("linear"))?,
            activation_fn,
        })
    }
    pub fn apply(&self, nodes: &NodeBatch) -> Result<Tensor> {
        let h = nodes.data(HIDDEN)?.broadcast_mul(nodes.data(NORM)?)?;
        let h = self.linear.forward(&h)?;
        match &self.activation_fn {
            Some(activation_fn) => activation_fn.forward(&h),
            None => Ok(h),
        }
    }
}

/// GCN written as explicit message passing: every layer normalises by the
/// source degree, sums the neighbours' states and runs a [`NodeApply`] that
/// normalises by the destination degree.
///
/// The graph must carry self-loops and a node [`NORM`] (`in_degree^-1/2`,
/// see [`symmetric_norm`](crate::graph::symmetric_norm)).
pub struct MessagePassingGcn {
    layers: Vec<NodeApply>,
    dropout: Dropout,
    varmap: VarMap,
}
impl MessagePassingGcn {
    /// `layer_sizes` is `[in, hidden.., classes]`; the last layer has no activation.
    pub fn with_params(layer_sizes: &[usize], params: GcnParams, device: &Device) -> Result<Self> {
        if layer_sizes.len() < 2 {
            Err(GnnError::LayerSizes(layer_sizes.to_vec()))?
        }
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let num_layers = layer_sizes.len() - 1;
        let mut layers = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            let activation_fn = (i + 1 < num_layers).then_some(params.activation_fn);
            layers.push(NodeApply::new(
                layer_sizes[i],
                layer_sizes[i + 1],
                activation_fn,
                vs.pp(format!("layer_{i}")),
            )?);
        }
        debug!(?layer_sizes, dropout = params.dropout_rate, "message passing gcn");
        Ok(Self {
            layers,
            dropout: Dropout::new(params.dropout_rate),
            varmap,
        })
    }
    pub fn new(layer_sizes: &[usize], device: &Device) -> Result<Self> {
        Self::with_params(layer_sizes, GcnParams::default(), device)
    }
    pub fn parameters(&self) -> Vec<candle_core::Var> {
        self.varmap.all_vars()
    }

    /// Seeds [`HIDDEN`] with `features`, runs every layer and takes the
    /// result back out of the graph.
    pub fn forward_t(&self, features: &Tensor, graph: &mut Graph, train: bool) -> Result<Tensor> {
        graph.set_ndata(HIDDEN, features.clone())?;
        for (idx, layer) in self.layers.iter().enumerate() {
            let mut h = graph.pop_ndata(HIDDEN)?;
            if idx > 0 {
                h = self.dropout.forward(&h, train)?;
            }
            h = h.broadcast_mul(graph.ndata(NORM)?)?;
            graph.set_ndata(HIDDEN, h)?;
            graph.update_all_with_apply(copy_src, sum_reducer, |nodes| layer.apply(nodes))?;
        }
        graph.pop_ndata(HIDDEN)
    }
    pub fn forward(&self, features: &Tensor, graph: &mut Graph) -> Result<Tensor> {
        self.forward_t(features, graph, false)
    }
}
