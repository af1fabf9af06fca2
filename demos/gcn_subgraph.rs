use candle_core::{Device, Tensor};
use candle_nn::{loss, Optimizer};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use candle_rgcn::graph::partition::{normalized_subgraph, partition};
use candle_rgcn::graph::Graph;
use candle_rgcn::models::MessagePassingGcn;
use candle_rgcn::nn::GcnParams;
use candle_rgcn::utils::accuracy;

const NUM_NODES: usize = 400;
const NUM_CLASSES: usize = 4;
const NUM_FEATURES: usize = 16;

// Planted partition: dense inside a class, sparse across classes.
fn synthetic_graph(rng: &mut ChaCha8Rng, device: &Device) -> candle_core::Result<(Graph, Tensor, Tensor)> {
    let labels: Vec<u32> = (0..NUM_NODES).map(|v| (v % NUM_CLASSES) as u32).collect();
    let mut edges = Vec::new();
    for u in 0..NUM_NODES {
        for v in 0..NUM_NODES {
            let p = if labels[u] == labels[v] { 0.05 } else { 0.005 };
            if u != v && rng.gen_bool(p) {
                edges.push((u as u32, v as u32));
            }
        }
    }
    let features: Vec<f32> = labels
        .iter()
        .flat_map(|&label| {
            (0..NUM_FEATURES)
                .map(|i| {
                    let signal = if i % NUM_CLASSES == label as usize { 0.5 } else { 0.0 };
                    signal + rng.gen_range(-1.0..1.0)
                })
                .collect::<Vec<f32>>()
        })
        .collect();
    let graph = Graph::from_edges(NUM_NODES, &edges, device)?;
    let xs = Tensor::from_vec(features, (NUM_NODES, NUM_FEATURES), device)?;
    let ys = Tensor::new(labels.as_slice(), device)?;
    Ok((graph, xs, ys))
}

// cargo run --example gcn_subgraph
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let device = Device::Cpu;
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    let (graph, xs, ys) = synthetic_graph(&mut rng, &device)?;
    info!(nodes = graph.num_nodes(), edges = graph.num_edges(), "built graph");
    let all_nodes: Vec<u32> = (0..NUM_NODES as u32).collect();
    let mut full = normalized_subgraph(&graph, &all_nodes)?;

    let model = MessagePassingGcn::with_params(
        &[NUM_FEATURES, 32, NUM_CLASSES],
        GcnParams {
            dropout_rate: 0.5,
            ..Default::default()
        },
        &device,
    )?;
    let mut optimizer = candle_nn::AdamW::new(
        model.parameters(),
        candle_nn::ParamsAdamW {
            lr: 0.01,
            ..Default::default()
        },
    )?;

    for epoch in 0..50 {
        let mut batches = partition(&graph, 4, true, &mut rng)?;
        let mut total_loss = 0f32;
        for batch in batches.iter_mut() {
            let features = batch.gather(&xs)?;
            let labels = batch.gather(&ys)?;
            let logits = model.forward_t(&features, &mut batch.graph, true)?;
            let loss = loss::cross_entropy(&batch.seed_rows(&logits)?, &batch.seed_rows(&labels)?)?;
            optimizer.backward_step(&loss)?;
            total_loss += loss.to_scalar::<f32>()?;
        }

        if epoch % 5 == 0 {
            let logits = model.forward(&xs, &mut full)?;
            info!(
                epoch,
                loss = total_loss / batches.len() as f32,
                accuracy = 100.0 * accuracy(&logits, &ys)?,
                "full graph"
            );
        }
    }
    let logits = model.forward(&xs, &mut full)?;
    info!(accuracy = 100.0 * accuracy(&logits, &ys)?, "done");
    Ok(())
}
