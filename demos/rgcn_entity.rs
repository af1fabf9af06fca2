use candle_core::{Device, IndexOp, Tensor};
use candle_nn::{loss, Optimizer};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use candle_rgcn::graph::{dst_degree_edge_norm, Graph, EDGE_TYPE, NORM};
use candle_rgcn::models::{Rgcn, RgcnParams};
use candle_rgcn::utils::{accuracy, mask_to_index};

const NUM_NODES: usize = 300;
const NUM_CLASSES: usize = 3;
const NUM_RELATIONS: usize = 6;

// Featureless typed graph: the relation of an edge depends on its endpoints'
// classes, so a node's class is only visible through its incoming relations.
fn synthetic_graph(
    rng: &mut ChaCha8Rng,
    device: &Device,
) -> candle_core::Result<(Graph, Tensor, Tensor)> {
    let labels: Vec<u32> = (0..NUM_NODES).map(|_| rng.gen_range(0..NUM_CLASSES as u32)).collect();
    let mut edges = Vec::new();
    let mut types = Vec::new();
    for _ in 0..NUM_NODES * 4 {
        let u = rng.gen_range(0..NUM_NODES);
        let v = rng.gen_range(0..NUM_NODES);
        if u == v {
            continue;
        }
        // forward relations by destination class, inverse ones by source class
        edges.push((u as u32, v as u32));
        types.push(labels[v]);
        edges.push((v as u32, u as u32));
        types.push(NUM_CLASSES as u32 + labels[u]);
    }
    let mut graph = Graph::from_edges(NUM_NODES, &edges, device)?;
    graph.set_edata(EDGE_TYPE, Tensor::new(types.as_slice(), device)?)?;
    let norm = dst_degree_edge_norm(&graph)?;
    graph.set_edata(NORM, norm)?;

    let mask: Vec<u8> = (0..NUM_NODES).map(|_| rng.gen_bool(0.8) as u8).collect();
    let train_mask = Tensor::new(mask.as_slice(), device)?;
    Ok((graph, Tensor::new(labels.as_slice(), device)?, train_mask))
}

// cargo run --example rgcn_entity
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let device = Device::Cpu;
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    let (mut graph, labels, train_mask) = synthetic_graph(&mut rng, &device)?;
    let train_index = mask_to_index(&train_mask)?;
    let test_index = mask_to_index(&train_mask.ones_like()?.sub(&train_mask)?)?;
    info!(
        nodes = graph.num_nodes(),
        edges = graph.num_edges(),
        train = train_index.dim(0)?,
        test = test_index.dim(0)?,
        "built graph"
    );

    let model = Rgcn::entity_classifier(
        NUM_NODES,
        16,
        NUM_CLASSES,
        NUM_RELATIONS,
        RgcnParams {
            num_bases: 2,
            num_hidden_layers: 0,
            ..Default::default()
        },
        &device,
    )?;
    let mut optimizer = candle_nn::AdamW::new(
        model.parameters(),
        candle_nn::ParamsAdamW {
            lr: 0.01,
            weight_decay: 5e-4,
            ..Default::default()
        },
    )?;

    for epoch in 0..50 {
        let logits = model.forward_t(&mut graph, true)?;
        let loss = loss::cross_entropy(&logits.i(&train_index)?, &labels.i(&train_index)?)?;
        optimizer.backward_step(&loss)?;

        if epoch % 5 == 0 {
            let logits = model.forward(&mut graph)?;
            info!(
                epoch,
                loss = loss.to_scalar::<f32>()?,
                train_accuracy = 100.0 * accuracy(&logits.i(&train_index)?, &labels.i(&train_index)?)?,
                test_accuracy = 100.0 * accuracy(&logits.i(&test_index)?, &labels.i(&test_index)?)?,
                "epoch"
            );
        }
    }
    Ok(())
}
