use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{Activation, Dropout, Init, Module, VarBuilder, VarMap};
use tracing::debug;

use super::{traits::GnnModule, utils::weighted_sum_agg};
use crate::error::GnnError;
use crate::graph::Graph;

/// Graph convolution with symmetric normalisation,
/// `D_in^-1/2 A D_out^-1/2 X W + b`. Add self-loops to the graph beforehand
/// to keep each node's own features.
pub struct GcnConv {
    weight: Tensor,
    bias: Tensor,
}
impl GcnConv {
    pub fn new(in_dim: usize, out_dim: usize, vs: VarBuilder) -> Result<Self> {
        // Xavier Uniform
        let bound = (6.0 / (in_dim + out_dim) as f64).sqrt();
        let weight = vs.get_with_hints(
            (in_dim, out_dim),
            "weight",
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;
        let bias = vs.get_with_hints((1, out_dim), "bias", Init::Const(0.0))?;
        Ok(Self { weight, bias })
    }
}
impl GnnModule for GcnConv {
    fn forward_t(&self, xs: &Tensor, graph: &Graph, _train: bool) -> Result<Tensor> {
        let out_degree = graph.out_degrees()?.maximum(1f64)?;
        let in_degree = graph.in_degrees()?.maximum(1f64)?;
        let edge_weight = out_degree
            .index_select(graph.src(), 0)?
            .mul(&in_degree.index_select(graph.dst(), 0)?)?
            .to_dtype(xs.dtype())?
            .powf(-0.5)?;
        let xs = xs.matmul(&self.weight)?;
        weighted_sum_agg(&xs, graph, &edge_weight)?.broadcast_add(&self.bias)
    }
}
pub struct GcnParams {
    pub dropout_rate: f32,
    pub activation_fn: Activation,
}
impl Default for GcnParams {
    fn default() -> Self {
        Self {
            dropout_rate: 0.0,
            activation_fn: Activation::Relu,
        }
    }
}
pub struct Gcn {
    layers: Vec<GcnConv>,
    dropout: Dropout,
    activation_fn: Activation,
    varmap: VarMap,
}
impl Gcn {
    pub fn with_params(layer_sizes: &[usize], params: GcnParams, device: &Device) -> Result<Self> {
        if layer_sizes.len() < 2 {
            Err(GnnError::LayerSizes(layer_sizes.to_vec()))?
        }
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let mut layers = Vec::new();
        for i in 0..layer_sizes.len() - 1 {
            layers.push(GcnConv::new(
                layer_sizes[i],
                layer_sizes[i + 1],
                vs.pp(i.to_string()),
            )?);
        }
        debug!(?layer_sizes, dropout = params.dropout_rate, "gcn");
        Ok(Self {
            layers,
            dropout: Dropout::new(params.dropout_rate),
            activation_fn: params.activation_fn,
            varmap,
        })
    }
    pub fn new(layer_sizes: &[usize], device: &Device) -> Result<Self> {
        Self::with_params(layer_sizes, GcnParams::default(), device)
    }
    pub fn parameters(&self) -> Vec<candle_core::Var> {
        self.varmap.all_vars()
    }
}
impl GnnModule for Gcn {
    fn forward_t(&self, x: &Tensor, graph: &Graph, train: bool) -> Result<Tensor> {
        let mut h = self.layers[0].forward(x, graph)?;
        for layer in &self.layers[1..] {
            h = self.activation_fn.forward(&h)?;
            h = self.dropout.forward(&h, train)?;
            h = layer.forward(&h, graph)?;
        }
        Ok(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv_normalises_by_both_degrees() -> Result<()> {
        let device = Device::Cpu;
        // 0 -> 2, 1 -> 2, 1 -> 0
        let g = Graph::from_edges(3, &[(0, 2), (1, 2), (1, 0)], &device)?;
        let conv = GcnConv {
            weight: Tensor::eye(1, DType::F32, &device)?,
            bias: Tensor::zeros((1, 1), DType::F32, &device)?,
        };
        let xs = Tensor::new(&[[1f32], [4.], [9.]], &device)?;
        let out = conv.forward(&xs, &g)?.flatten_all()?.to_vec1::<f32>()?;
        // node 2: 1 / sqrt(1 * 2) + 4 / sqrt(2 * 2)
        let expected = 1.0 / 2f32.sqrt() + 2.0;
        assert!((out[2] - expected).abs() < 1e-5);
        // node 0: 4 / sqrt(2 * 1)
        assert!((out[0] - 4.0 / 2f32.sqrt()).abs() < 1e-5);
        assert_eq!(out[1], 0.0);
        Ok(())
    }

    #[test]
    fn stacked_gcn_shapes() -> Result<()> {
        let device = Device::Cpu;
        let g = Graph::from_edges(4, &[(0, 1), (1, 2), (2, 3), (3, 0)], &device)?.add_self_loop()?;
        let gcn = Gcn::with_params(
            &[5, 8, 3],
            GcnParams {
                dropout_rate: 0.5,
                ..Default::default()
            },
            &device,
        )?;
        let xs = Tensor::randn(0f32, 1., (4, 5), &device)?;
        assert_eq!(gcn.forward_t(&xs, &g, true)?.dims(), &[4, 3]);
        assert_eq!(gcn.parameters().len(), 4);
        Ok(())
    }

    #[test]
    fn too_few_layer_sizes_are_rejected() {
        let device = Device::Cpu;
        assert!(Gcn::new(&[], &device).is_err());
        let err = Gcn::new(&[5], &device).err().expect("one size is not a layer");
        assert!(err.to_string().contains("[5]"), "{err}");
    }
}
