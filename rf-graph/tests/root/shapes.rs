use rf_graph::graph::Graph;
use rf_graph::network::{append_block, build_network, NetworkConfig};
use rf_graph::operator::{ConvParams, PoolParams, Rounding};
use rf_graph::plan::ExecutionPlan;
use rf_graph::shape;

#[test]
fn resnet50_shapes() {
    let config = NetworkConfig::resnet50();
    let network = build_network(&config).unwrap();
    let graph = &network.graph;

    assert_eq!(graph.shape(network.stem_output).unwrap(), &shape![64, 56, 56]);

    let stage_shapes = network
        .stage_outputs
        .iter()
        .map(|&t| graph.shape(t).unwrap().clone())
        .collect::<Vec<_>>();
    assert_eq!(
        stage_shapes,
        vec![
            shape![256, 56, 56],
            shape![512, 28, 28],
            shape![1024, 14, 14],
            shape![2048, 7, 7],
        ]
    );

    assert_eq!(graph.shape(network.pooled).unwrap(), &shape![2048, 1, 1]);
    assert_eq!(graph.shape(network.logits).unwrap(), &shape![1000]);
    assert_eq!(graph.output_tensor(), Some(network.logits));
}

#[test]
fn resnet50_counts() {
    let config = NetworkConfig::resnet50();
    let network = build_network(&config).unwrap();

    assert_eq!(config.operator_count(), 125);
    assert_eq!(network.graph.operator_count(), 125);
    assert_eq!(network.graph.tensor_count(), 126);

    // every tensor except the input has exactly one producer
    let produced = network
        .graph
        .tensors()
        .filter(|&t| network.graph[t].producer.is_some())
        .count();
    assert_eq!(produced, 125);
}

#[test]
fn block_branches_match() {
    let config = NetworkConfig::resnet50();
    let mut graph = Graph::new();
    let mut curr = graph.input(shape![64, 56, 56], "input").unwrap();
    let mut in_channels = 64;

    for (si, stage) in config.stages.iter().enumerate() {
        for (bi, block) in stage.block_configs(in_channels).into_iter().enumerate() {
            let outputs = append_block(&mut graph, curr, block, &format!("layer{}_block{}", si, bi)).unwrap();

            let main = graph.shape(outputs.main).unwrap();
            assert_eq!(main, graph.shape(outputs.shortcut).unwrap());
            assert_eq!(main, graph.shape(outputs.merged).unwrap());
            if block.shortcut {
                assert_ne!(outputs.shortcut, curr);
            } else {
                assert_eq!(outputs.shortcut, curr);
                assert_eq!(main, graph.shape(curr).unwrap());
            }

            // only the first block of each stage projects its shortcut
            assert_eq!(block.shortcut, bi == 0);
            curr = outputs.merged;
        }
        in_channels = stage.out_channels;
    }
}

#[test]
fn merge_reads_own_block() {
    let network = build_network(&NetworkConfig::resnet50()).unwrap();
    let graph = &network.graph;

    let add = graph
        .operators()
        .find(|&op| graph[op].debug_id == "layer3_block2_add")
        .unwrap();
    let inputs = graph[add]
        .inputs
        .iter()
        .map(|&t| graph[t].debug_id.as_str())
        .collect::<Vec<_>>();

    assert_eq!(inputs, vec!["layer3_block2_bn2_out", "layer3_block1_add_out"]);
}

#[test]
fn projection_names() {
    let network = build_network(&NetworkConfig::resnet50()).unwrap();
    let graph = &network.graph;

    let projections = graph
        .operators()
        .map(|op| graph[op].debug_id.as_str())
        .filter(|id| id.ends_with("_residual_conv"))
        .collect::<Vec<_>>();

    assert_eq!(
        projections,
        vec![
            "layer0_block0_residual_conv",
            "layer1_block0_residual_conv",
            "layer2_block0_residual_conv",
            "layer3_block0_residual_conv",
        ]
    );
}

#[test]
fn stem_only() {
    let mut graph = Graph::new();
    let input = graph.input(shape![3, 4, 4], "input").unwrap();
    let conv1 = graph.conv(input, ConvParams::pointwise(3, 2, 2), "conv1").unwrap();
    let bn1 = graph.batch_norm(conv1, 2, "bn1").unwrap();
    let pool1 = graph
        .max_pool(bn1, PoolParams::new(2, 2).with_rounding(Rounding::Ceil), "pool1")
        .unwrap();
    graph.set_output(pool1).unwrap();

    // floor((4 + 0 - 1) / 2) + 1 = 2
    assert_eq!(graph.shape(conv1).unwrap(), &shape![2, 2, 2]);
    assert_eq!(graph.shape(bn1).unwrap(), &shape![2, 2, 2]);
    // ceil((2 - 2) / 2) + 1 = 1
    assert_eq!(graph.shape(pool1).unwrap(), &shape![2, 1, 1]);

    let plan = ExecutionPlan::new(&graph).unwrap();
    let order = plan.iter().map(|op| graph[op].debug_id.as_str()).collect::<Vec<_>>();
    assert_eq!(order, vec!["conv1", "bn1", "pool1"]);
}

#[test]
fn activation_bytes() {
    let mut graph = Graph::new();
    let input = graph.input(shape![3, 4, 4], "input").unwrap();
    graph.conv(input, ConvParams::pointwise(3, 2, 2), "conv1").unwrap();

    assert_eq!(graph.activation_bytes(), (3 * 4 * 4 + 2 * 2 * 2) * 4);
}
