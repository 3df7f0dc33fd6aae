use bridge_core::{build_bridge_app, run_tick, BridgeConfig, BridgeRuntime, TransportMode};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use sync_proto::{encode_inbound, InboundMessage, VehicleRecord};

fn batch(count: usize, step: usize) -> String {
    let vehicles = (0..count)
        .map(|index| VehicleRecord {
            vehicle_id: format!("veh{index}"),
            position: [index as f64 * 4.0 + step as f64 * 0.5, 0.0, 0.0],
            // Every fourth vehicle turns so both branches are exercised.
            angle: if index % 4 == 0 { 90.0 + step as f64 * 10.0 } else { 90.0 },
            type_tag: "AlmaBlue".to_string(),
            long_speed: 5.0,
            vert_speed: 0.0,
            lat_speed: 0.0,
        })
        .collect();
    encode_inbound(&InboundMessage::Vehicles { vehicles }).expect("batch encodes")
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    for count in [16usize, 64, 256, 1024] {
        group.bench_with_input(BenchmarkId::new("vehicles", count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let mut app = build_bridge_app(BridgeConfig::builtin(), TransportMode::Disabled);
                    app.world
                        .resource::<BridgeRuntime>()
                        .producer()
                        .push(batch(count, 0));
                    run_tick(&mut app);
                    app.world
                        .resource::<BridgeRuntime>()
                        .producer()
                        .push(batch(count, 1));
                    app
                },
                |mut app| {
                    run_tick(&mut app);
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(reconcile_benches, bench_tick);
criterion_main!(reconcile_benches);
