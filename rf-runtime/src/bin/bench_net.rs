use std::error::Error;

use clap::Parser;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Uniform;

use rf_graph::cpu::WeightInit;
use rf_graph::network::{build_network, NetworkConfig};
use rf_runtime::config::LaunchConfig;
use rf_runtime::engine::Engine;
use rf_runtime::image_input::ImageBuffer;

/// Build ResNet-50 and measure how long repeated inference on a single input takes.
#[derive(Debug, clap::Parser)]
struct Args {
    /// Number of threads used inside each operator.
    #[clap(allow_negative_numbers = true)]
    threads: i64,
    /// Number of timed iterations.
    #[clap(allow_negative_numbers = true)]
    iterations: i64,

    /// Image file to use as input, seeded noise is used if not given.
    #[clap(short, long)]
    image: Option<String>,
    /// Seed for the synthetic weights and the noise input.
    #[clap(short, long, default_value_t = 0)]
    seed: u64,
    /// Number of untimed iterations before measuring, defaults to a tenth of the timed iterations.
    #[clap(short, long)]
    warmup: Option<usize>,
    /// Print per-operator timings of one extra run.
    #[clap(long)]
    profile: bool,
    /// Print the graph before running.
    #[clap(short, long)]
    print: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let Args {
        threads,
        iterations,
        image,
        seed,
        warmup,
        profile,
        print,
    } = Args::parse();

    let launch = LaunchConfig::new(threads, iterations)?;

    if cfg!(debug_assertions) {
        eprintln!("Warning: debug assertions are enabled, maybe this binary is not optimized either?");
    }

    let config = NetworkConfig::resnet50();
    let network = build_network(&config)?;
    if print {
        println!("{}", network.graph);
    }

    let mut engine = Engine::from_network(network, launch.settings(WeightInit::Random { seed }))?;
    engine.allocate_all()?;
    println!("The number of layers is: {}", engine.plan().len());

    let mut engine = match image {
        Some(path) => {
            let [_, height, width] = config.input_shape.unwrap_3();
            let image = ImageBuffer::load(&path, height, width)?;
            engine.fill_input_image(&image)?
        }
        None => {
            let mut rng = StdRng::seed_from_u64(seed);
            let dist = Uniform::new(0.0f32, 1.0);
            let data = (0..config.input_shape.size()).map(|_| rng.sample(dist)).collect_vec();
            engine.fill_input(&data)?
        }
    };

    let warmup = warmup.unwrap_or(launch.iterations / 10);
    engine.warmup(warmup);

    let report = engine.benchmark(launch.iterations);
    println!("elapsed time is {:.3} ms", report.elapsed.as_secs_f64() * 1e3);
    println!(
        "  {:.3} ms per iteration, throughput {:.2} it/s",
        report.per_iteration().as_secs_f64() * 1e3,
        report.throughput()
    );

    if profile {
        println!("{}", engine.profile_once());
    }

    let output = engine.finish();
    if let Some(logits) = &output.logits {
        let (best, value) = logits
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((0, f32::NAN));
        println!("top class after {} run(s): {} ({:.4})", output.runs, best, value);
    }

    Ok(())
}
