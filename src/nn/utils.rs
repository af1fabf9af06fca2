use candle_core::{Result, Tensor};
use candle_nn::{Init, Linear, VarBuilder};

use crate::graph::{sum_reducer, Graph, Mailbox};

/// `torch.nn.init.calculate_gain("relu")`
pub const RELU_GAIN: f64 = std::f64::consts::SQRT_2;

//
// Xavier Uniform with torch's fan convention
//
//   fan_in = dims[1] * receptive_field, fan_out = dims[0] * receptive_field,
//   where receptive_field is the product of dims[2..].
//
pub fn xavier_uniform(dims: &[usize], gain: f64) -> Init {
    let (fan_in, fan_out) = match dims {
        [] => (1, 1),
        [n] => (*n, *n),
        [fan_out, fan_in, rest @ ..] => {
            let receptive: usize = rest.iter().product();
            (fan_in * receptive, fan_out * receptive)
        }
    };
    let bound = gain * (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

//
// Linear layer with torch-equivalent initialisation
//
//   torch.nn.Linear is initialised by Uniform(-1/sqrt(fan_in), 1/sqrt(fan_in)).
//   see https://github.com/pytorch/pytorch/issues/57109
//
pub(crate) fn linear(in_dim: usize, out_dim: usize, vs: VarBuilder) -> Result<Linear> {
    let bound = 1.0 / (in_dim as f64).sqrt();
    let init_ws = Init::Uniform { lo: -bound, up: bound };
    let init_bs = Init::Uniform { lo: -bound, up: bound };
    let ws = vs.get_with_hints((out_dim, in_dim), "weight", init_ws)?;
    let bs = vs.get_with_hints(out_dim, "bias", init_bs)?;
    Ok(Linear::new(ws, Some(bs)))
}

/// Scales the source rows of every edge by `edge_weight` (`[E]`) and sums them
/// into the destinations.
pub fn weighted_sum_agg(xs: &Tensor, graph: &Graph, edge_weight: &Tensor) -> Result<Tensor> {
    let messages = xs
        .index_select(graph.src(), 0)?
        .broadcast_mul(&edge_weight.unsqueeze(1)?)?;
    sum_reducer(&Mailbox {
        messages: &messages,
        dst: graph.dst(),
        num_nodes: graph.num_nodes(),
    })
}
