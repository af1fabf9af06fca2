use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{loss, Optimizer};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use candle_rgcn::graph::partition::partition;
use candle_rgcn::graph::{Graph, NORM};
use candle_rgcn::models::MessagePassingGcn;
use candle_rgcn::nn::{Gcn, GnnModule};

fn two_cliques(device: &Device) -> Result<Graph> {
    let mut edges = Vec::new();
    for group in [0u32..4, 4..8] {
        for u in group.clone() {
            for v in group.clone() {
                if u != v {
                    edges.push((u, v));
                }
            }
        }
    }
    edges.push((3, 4));
    Graph::from_edges(8, &edges, device)
}

#[test]
fn subgraph_batches_train_a_message_passing_gcn() -> Result<()> {
    let device = Device::Cpu;
    let graph = two_cliques(&device)?;
    let xs = Tensor::randn(0f32, 1., (8, 5), &device)?;
    let labels = Tensor::new(&[0u32, 0, 0, 0, 1, 1, 1, 1], &device)?;

    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let mut batches = partition(&graph, 2, true, &mut rng)?;
    assert_eq!(batches.iter().map(|b| b.num_seeds()).sum::<usize>(), 8);

    let model = MessagePassingGcn::new(&[5, 8, 2], &device)?;
    let mut optimizer = candle_nn::AdamW::new(
        model.parameters(),
        candle_nn::ParamsAdamW {
            lr: 0.05,
            ..Default::default()
        },
    )?;
    for _ in 0..5 {
        for batch in batches.iter_mut() {
            let features = batch.gather(&xs)?;
            let labels = batch.gather(&labels)?;
            let logits = model.forward_t(&features, &mut batch.graph, true)?;
            assert_eq!(logits.dims(), &[batch.graph.num_nodes(), 2]);
            let loss = loss::cross_entropy(
                &batch.seed_rows(&logits)?,
                &batch.seed_rows(&labels)?,
            )?;
            assert!(loss.to_scalar::<f32>()?.is_finite());
            optimizer.backward_step(&loss)?;
        }
    }
    Ok(())
}

#[test]
fn message_passing_and_dense_gcn_agree_on_shapes() -> Result<()> {
    let device = Device::Cpu;
    let mut graph = two_cliques(&device)?.add_self_loop()?;
    let norm = candle_rgcn::graph::symmetric_norm(&graph)?;
    graph.set_ndata(NORM, norm)?;
    let xs = Tensor::randn(0f32, 1., (8, 5), &device)?;

    let dense = Gcn::new(&[5, 16, 3], &device)?;
    let passing = MessagePassingGcn::new(&[5, 16, 3], &device)?;
    assert_eq!(dense.forward(&xs, &graph)?.dims(), &[8, 3]);
    assert_eq!(passing.forward(&xs, &mut graph)?.dims(), &[8, 3]);
    assert_eq!(graph.ndata(NORM)?.dtype(), DType::F32);
    Ok(())
}
