use rf_graph::network::{build_network, NetworkConfig};
use rf_runtime::config::EngineSettings;
use rf_runtime::engine::Engine;

#[test]
#[ignore]
fn resnet50_single_run() {
    let network = build_network(&NetworkConfig::resnet50()).unwrap();
    let mut engine = Engine::from_network(network, EngineSettings::default()).unwrap();
    engine.allocate_all().unwrap();

    let mut engine = engine.fill_input(&vec![0.5; 3 * 224 * 224]).unwrap();
    let report = engine.benchmark(1);
    println!("{}", report);

    let output = engine.finish();
    let logits = output.logits.unwrap();
    assert_eq!(logits.shape(), &[1000]);
    assert!(logits.iter().all(|x| x.is_finite()));
    assert_eq!(output.runs, 1);
}
