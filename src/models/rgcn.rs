use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{Activation, VarBuilder, VarMap};
use tracing::debug;

use crate::graph::{Graph, HIDDEN, NODE_ID};
use crate::nn::{EmbeddingLayer, GraphModule, LayerOptions, RgcnLayer};

pub struct RgcnParams {
    /// `0` uses one basis per relation.
    pub num_bases: usize,
    pub num_hidden_layers: usize,
    pub dropout_rate: f32,
    pub self_loop: bool,
    pub bias: bool,
    pub activation_fn: Activation,
}
impl Default for RgcnParams {
    fn default() -> Self {
        Self {
            num_bases: 0,
            num_hidden_layers: 1,
            dropout_rate: 0.0,
            self_loop: false,
            bias: false,
            activation_fn: Activation::Relu,
        }
    }
}

/// Stack of relational layers run over a graph in place.
///
/// When the model owns node features they are written to [`NODE_ID`] at the
/// start of every forward pass; otherwise the caller seeds the graph. The final
/// [`HIDDEN`] is removed from the graph and returned.
pub struct Rgcn {
    layers: Vec<Box<dyn GraphModule>>,
    features: Option<Tensor>,
    varmap: VarMap,
}

impl Rgcn {
    /// `varmap` must be the one the layers registered their variables in.
    pub fn from_layers(
        layers: Vec<Box<dyn GraphModule>>,
        features: Option<Tensor>,
        varmap: VarMap,
    ) -> Self {
        Self {
            layers,
            features,
            varmap,
        }
    }

    /// Node classification on featureless nodes: basis layers throughout, the
    /// input layer embedding raw node ids (`in_dim == num_nodes`).
    pub fn entity_classifier(
        num_nodes: usize,
        h_dim: usize,
        out_dim: usize,
        num_relations: usize,
        params: RgcnParams,
        device: &Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);
        // the input layer has no dense state to loop over
        let input = LayerOptions {
            bias: params.bias,
            self_loop: false,
            dropout_rate: params.dropout_rate,
            activation: Some(params.activation_fn),
        };
        let hidden = LayerOptions {
            self_loop: params.self_loop,
            ..input
        };

        let mut layers: Vec<Box<dyn GraphModule>> = Vec::new();
        layers.push(Box::new(RgcnLayer::basis(
            num_nodes,
            h_dim,
            num_relations,
            params.num_bases,
            true,
            input,
            vs.pp("i2h"),
        )?));
        for idx in 0..params.num_hidden_layers {
            layers.push(Box::new(RgcnLayer::basis(
                h_dim,
                h_dim,
                num_relations,
                params.num_bases,
                false,
                hidden,
                vs.pp(format!("h2h_{idx}")),
            )?));
        }
        layers.push(Box::new(RgcnLayer::basis(
            h_dim,
            out_dim,
            num_relations,
            params.num_bases,
            false,
            LayerOptions {
                activation: None,
                ..hidden
            },
            vs.pp("h2o"),
        )?));
        debug!(
            num_nodes,
            h_dim,
            out_dim,
            num_relations,
            num_layers = layers.len(),
            "entity classifier"
        );

        Ok(Self {
            layers,
            features: Some(Tensor::arange(0u32, num_nodes as u32, device)?),
            varmap,
        })
    }

    /// Node encoder for link prediction: learned embeddings followed by
    /// block-diagonal layers with self-loops. The last layer has no activation.
    pub fn link_predictor(
        num_nodes: usize,
        h_dim: usize,
        num_relations: usize,
        params: RgcnParams,
        device: &Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let mut layers: Vec<Box<dyn GraphModule>> =
            vec![Box::new(EmbeddingLayer::new(num_nodes, h_dim, vs.pp("embedding"))?)];
        for idx in 0..params.num_hidden_layers {
            let last = idx + 1 == params.num_hidden_layers;
            layers.push(Box::new(RgcnLayer::block(
                h_dim,
                h_dim,
                num_relations,
                params.num_bases,
                LayerOptions {
                    bias: params.bias,
                    self_loop: true,
                    dropout_rate: params.dropout_rate,
                    activation: (!last).then_some(params.activation_fn),
                },
                vs.pp(format!("h2h_{idx}")),
            )?));
        }
        debug!(num_nodes, h_dim, num_relations, num_layers = layers.len(), "link predictor");

        Ok(Self {
            layers,
            features: Some(Tensor::arange(0u32, num_nodes as u32, device)?),
            varmap,
        })
    }

    pub fn set_features(&mut self, features: Option<Tensor>) {
        self.features = features;
    }
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
    pub fn parameters(&self) -> Vec<candle_core::Var> {
        self.varmap.all_vars()
    }

    pub fn forward_t(&self, graph: &mut Graph, train: bool) -> Result<Tensor> {
        if let Some(features) = &self.features {
            graph.set_ndata(NODE_ID, features.clone())?;
        }
        for layer in &self.layers {
            layer.forward_t(graph, train)?;
        }
        graph.pop_ndata(HIDDEN)
    }
    pub fn forward(&self, graph: &mut Graph) -> Result<Tensor> {
        self.forward_t(graph, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{dst_degree_edge_norm, inverse_in_degree_norm, EDGE_TYPE, NORM};

    fn typed_cycle(device: &Device) -> Result<Graph> {
        let mut g = Graph::from_edges(5, &[(0, 1), (1, 2), (2, 3), (3, 4), (4, 0), (0, 2)], device)?;
        g.set_edata(EDGE_TYPE, Tensor::new(&[0u32, 1, 2, 0, 1, 2], device)?)?;
        let norm = dst_degree_edge_norm(&g)?;
        g.set_edata(NORM, norm)?;
        let norm = inverse_in_degree_norm(&g)?;
        g.set_ndata(NORM, norm)?;
        Ok(g)
    }

    #[test]
    fn entity_classifier_forward() -> Result<()> {
        let device = Device::Cpu;
        let mut g = typed_cycle(&device)?;
        let model = Rgcn::entity_classifier(
            5,
            8,
            3,
            3,
            RgcnParams {
                num_bases: 2,
                ..Default::default()
            },
            &device,
        )?;
        assert_eq!(model.num_layers(), 3);
        let logits = model.forward_t(&mut g, true)?;
        assert_eq!(logits.dims(), &[5, 3]);
        assert!(!g.has_ndata(HIDDEN));
        // a second pass re-seeds the ids from the model
        assert_eq!(model.forward(&mut g)?.dims(), &[5, 3]);
        Ok(())
    }

    #[test]
    fn link_predictor_forward() -> Result<()> {
        let device = Device::Cpu;
        let mut g = typed_cycle(&device)?;
        let model = Rgcn::link_predictor(
            5,
            8,
            3,
            RgcnParams {
                num_bases: 4,
                num_hidden_layers: 2,
                dropout_rate: 0.2,
                ..Default::default()
            },
            &device,
        )?;
        assert_eq!(model.forward_t(&mut g, true)?.dims(), &[5, 8]);
        // embedding + 2 x (weight, loop_weight)
        assert_eq!(model.parameters().len(), 5);
        Ok(())
    }

    #[test]
    fn custom_stack_trains_its_own_variables() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let layers: Vec<Box<dyn GraphModule>> = vec![
            Box::new(EmbeddingLayer::new(5, 4, vs.pp("embedding"))?),
            Box::new(RgcnLayer::basis(
                4,
                2,
                3,
                2,
                false,
                LayerOptions::default(),
                vs.pp("h2o"),
            )?),
        ];
        let model = Rgcn::from_layers(layers, Some(Tensor::arange(0u32, 5, &device)?), varmap.clone());
        // embedding, weight, w_comp
        assert_eq!(model.parameters().len(), 3);
        assert_eq!(model.parameters().len(), varmap.all_vars().len());

        let mut g = typed_cycle(&device)?;
        assert_eq!(model.forward(&mut g)?.dims(), &[5, 2]);
        Ok(())
    }

    #[test]
    fn link_predictor_rejects_indivisible_bases() {
        let device = Device::Cpu;
        let params = RgcnParams {
            num_bases: 3,
            ..Default::default()
        };
        assert!(Rgcn::link_predictor(5, 8, 3, params, &device).is_err());
    }

    #[test]
    fn without_features_the_caller_seeds_the_graph() -> Result<()> {
        let device = Device::Cpu;
        let mut g = typed_cycle(&device)?;
        let mut model = Rgcn::entity_classifier(5, 4, 2, 3, RgcnParams::default(), &device)?;
        model.set_features(None);
        assert!(model.forward(&mut g).is_err());
        g.set_ndata(NODE_ID, Tensor::new(&[4u32, 3, 2, 1, 0], &device)?)?;
        assert_eq!(model.forward(&mut g)?.dims(), &[5, 2]);
        Ok(())
    }
}
