//! Data-driven construction of bottleneck residual networks.
//!
//! A network is described by a [NetworkConfig]: a stem, a list of [StageConfig]s and a classifier head.
//! [build_network] expands those descriptors into a [Graph] by repeatedly calling [append_block],
//! which emits the same operator pattern for every block.

use itertools::Itertools;

use crate::error::{GraphError, GraphResult};
use crate::graph::Graph;
use crate::operator::{ConvParams, FullyConnectedParams, OperatorKind, PoolParams, Rounding};
use crate::shape;
use crate::shape::Shape;
use crate::tensor::TensorId;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NetworkConfig {
    /// Shape of the network input as `[channels, height, width]`.
    pub input_shape: Shape,
    pub stem: StemConfig,
    pub stages: Vec<StageConfig>,
    /// Pooling applied to the output of the last stage, its output is declared as `[C, 1, 1]` up front.
    pub head_pool: PoolParams,
    pub classes: usize,
}

/// The initial convolution, batch norm and max pool applied to the raw input.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StemConfig {
    pub out_channels: usize,
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
    pub pool: PoolParams,
}

/// A sequence of bottleneck blocks sharing the same output channel count and resolution.
/// Only the first block changes the stride and channel count.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StageConfig {
    pub blocks: usize,
    pub mid_channels: usize,
    pub out_channels: usize,
    pub stride: usize,
}

/// A single bottleneck block, derived from a [StageConfig].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BlockConfig {
    pub in_channels: usize,
    pub mid_channels: usize,
    pub out_channels: usize,
    /// Stride of the 3x3 spatial convolution and of the shortcut projection.
    pub stride: usize,
    /// Whether the block input is projected with a 1x1 conv + batch norm before the merge.
    pub shortcut: bool,
}

/// The result of [build_network].
#[derive(Debug, Clone)]
pub struct Network {
    pub graph: Graph,
    /// Output of the stem max pool.
    pub stem_output: TensorId,
    /// Merged output of the last block of each stage.
    pub stage_outputs: Vec<TensorId>,
    /// Output of the head pool, the input of the classifier.
    pub pooled: TensorId,
    /// The classifier logits, also registered as the graph output.
    pub logits: TensorId,
}

/// The tensors created for a single block, returned so callers can inspect the merge operands.
#[derive(Debug, Copy, Clone)]
pub struct BlockOutputs {
    pub main: TensorId,
    pub shortcut: TensorId,
    pub merged: TensorId,
}

impl StageConfig {
    pub fn new(blocks: usize, mid_channels: usize, out_channels: usize, stride: usize) -> Self {
        StageConfig {
            blocks,
            mid_channels,
            out_channels,
            stride,
        }
    }

    /// Expand this stage into per-block configs, given the channel count of the stage input.
    pub fn block_configs(&self, in_channels: usize) -> Vec<BlockConfig> {
        (0..self.blocks)
            .map(|i| {
                if i == 0 {
                    BlockConfig {
                        in_channels,
                        mid_channels: self.mid_channels,
                        out_channels: self.out_channels,
                        stride: self.stride,
                        shortcut: self.stride != 1 || in_channels != self.out_channels,
                    }
                } else {
                    BlockConfig {
                        in_channels: self.out_channels,
                        mid_channels: self.mid_channels,
                        out_channels: self.out_channels,
                        stride: 1,
                        shortcut: false,
                    }
                }
            })
            .collect_vec()
    }
}

impl NetworkConfig {
    /// ResNet-50 for `224 x 224` RGB input and 1000 classes.
    pub fn resnet50() -> Self {
        NetworkConfig {
            input_shape: shape![3, 224, 224],
            stem: StemConfig {
                out_channels: 64,
                kernel: 7,
                stride: 2,
                padding: 3,
                pool: PoolParams::new(3, 2).with_rounding(Rounding::Ceil),
            },
            stages: vec![
                StageConfig::new(3, 64, 256, 1),
                StageConfig::new(4, 128, 512, 2),
                StageConfig::new(6, 256, 1024, 2),
                StageConfig::new(3, 512, 2048, 2),
            ],
            head_pool: PoolParams::new(7, 1),
            classes: 1000,
        }
    }

    /// Total number of operators [build_network] will emit for this config.
    pub fn operator_count(&self) -> usize {
        let mut in_channels = self.stem.out_channels;
        let mut count = 3;
        for stage in &self.stages {
            for block in stage.block_configs(in_channels) {
                count += if block.shortcut { 9 } else { 7 };
            }
            in_channels = stage.out_channels;
        }
        count + 2
    }
}

/// Append one bottleneck block to `graph`, reading `input`.
///
/// The main path is reduce (1x1) -> spatial (3x3, strided) -> expand (1x1), each followed by a batch norm.
/// The shortcut is either the block input itself or a strided 1x1 projection + batch norm of it.
/// Both paths are merged with an elementwise add.
pub fn append_block(
    graph: &mut Graph,
    input: TensorId,
    block: BlockConfig,
    prefix: &str,
) -> GraphResult<BlockOutputs> {
    let BlockConfig {
        in_channels,
        mid_channels,
        out_channels,
        stride,
        shortcut,
    } = block;

    if !shortcut && (stride != 1 || in_channels != out_channels) {
        return Err(GraphError::shape_mismatch(
            prefix,
            format!("block without shortcut must keep its shape, got {:?}", block),
        ));
    }

    let x = graph.conv(input, ConvParams::pointwise(in_channels, mid_channels, 1), format!("{prefix}_conv0"))?;
    let x = graph.batch_norm(x, mid_channels, format!("{prefix}_bn0"))?;
    let x = graph.conv(x, ConvParams::new(mid_channels, mid_channels, 3, stride, 1), format!("{prefix}_conv1"))?;
    let x = graph.batch_norm(x, mid_channels, format!("{prefix}_bn1"))?;
    let x = graph.conv(x, ConvParams::pointwise(mid_channels, out_channels, 1), format!("{prefix}_conv2"))?;
    let main = graph.batch_norm(x, out_channels, format!("{prefix}_bn2"))?;

    let shortcut = if shortcut {
        let y = graph.conv(
            input,
            ConvParams::pointwise(in_channels, out_channels, stride),
            format!("{prefix}_residual_conv"),
        )?;
        graph.batch_norm(y, out_channels, format!("{prefix}_residual_bn"))?
    } else {
        input
    };

    let merged = graph.add(main, shortcut, format!("{prefix}_add"))?;

    tracing::debug!(
        "{}: {} -> {}{}",
        prefix,
        graph.shape(input)?,
        graph.shape(merged)?,
        if block.shortcut { " (projected shortcut)" } else { "" }
    );

    Ok(BlockOutputs { main, shortcut, merged })
}

/// Append all blocks of `stage` to `graph`, returning the merged output of the last block.
pub fn append_stage(
    graph: &mut Graph,
    input: TensorId,
    stage: &StageConfig,
    stage_index: usize,
) -> GraphResult<TensorId> {
    let in_channels = graph.shape(input)?.dims.first().copied().unwrap_or(0);

    let mut curr = input;
    for (block_index, block) in stage.block_configs(in_channels).into_iter().enumerate() {
        let prefix = format!("layer{}_block{}", stage_index, block_index);
        curr = append_block(graph, curr, block, &prefix)?.merged;
    }

    Ok(curr)
}

/// Build the full network graph described by `config`.
pub fn build_network(config: &NetworkConfig) -> GraphResult<Network> {
    let mut graph = Graph::new();
    let input_channels = config.input_shape.dims.first().copied().unwrap_or(0);

    // stem
    let input = graph.input(config.input_shape.clone(), "input")?;
    let stem = &config.stem;
    let x = graph.conv(
        input,
        ConvParams::new(input_channels, stem.out_channels, stem.kernel, stem.stride, stem.padding),
        "conv1",
    )?;
    let x = graph.batch_norm(x, stem.out_channels, "bn1")?;
    let stem_output = graph.max_pool(x, stem.pool, "pool1")?;
    tracing::debug!("stem: {} -> {}", config.input_shape, graph.shape(stem_output)?);

    // stages
    let mut stage_outputs = vec![];
    let mut curr = stem_output;
    for (stage_index, stage) in config.stages.iter().enumerate() {
        curr = append_stage(&mut graph, curr, stage, stage_index)?;
        stage_outputs.push(curr);
    }

    // head, the pooled shape is known up front
    let channels = graph.shape(curr)?.dims.first().copied().unwrap_or(0);
    let pooled = graph.declare(Some(shape![channels, 1, 1]), Default::default(), "pool2_out");
    graph.push_operator(
        OperatorKind::MaxPool(config.head_pool),
        &[curr],
        pooled,
        "pool2",
    )?;
    let logits = graph.fully_connected(pooled, FullyConnectedParams::new(channels, config.classes), "fc1")?;
    graph.set_output(logits)?;

    tracing::debug!(
        "built network with {} operators and {} tensors",
        graph.operator_count(),
        graph.tensor_count()
    );

    Ok(Network {
        graph,
        stem_output,
        stage_outputs,
        pooled,
        logits,
    })
}
