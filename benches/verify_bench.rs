use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use proof_bridge::testing::RecordingEngine;
use proof_bridge::{verify_proof_once, BridgeConfig, ModuleLocator, ProofVerificationTool};

fn locator() -> ModuleLocator {
    ModuleLocator::inline("pvtBundle.js", "module.exports = { verifyProof() {} };")
}

fn bench_reusable(c: &mut Criterion) {
    let mut group = c.benchmark_group("reusable_verify");
    for &size in &[32usize, 1024, 65_536] {
        let proof = vec![0xabu8; size];
        let mut tool =
            ProofVerificationTool::new(RecordingEngine::new(), locator(), BridgeConfig::default())
                .unwrap();
        tool.init().unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &proof, |b, proof| {
            b.iter(|| tool.verify_proof(black_box(proof)).unwrap());
        });
    }
    group.finish();
}

fn bench_once(c: &mut Criterion) {
    let engine = RecordingEngine::new();
    let locator = locator();
    let config = BridgeConfig::default();
    let proof = vec![0x01u8; 1024];

    c.bench_function("verify_once_1k", |b| {
        b.iter(|| verify_proof_once(&engine, &locator, &config, black_box(&proof)).unwrap());
    });
}

criterion_group!(benches, bench_reusable, bench_once);
criterion_main!(benches);
