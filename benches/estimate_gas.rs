//! Benchmarks for call simulation and gas estimation on a dev chain.

use alloy_primitives::{Bytes, U256};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use evm_query::{AccountOverride, ApiConfig, CallMessage, Devnet, DevnetConfig, StateOverride};
use tokio::runtime::Runtime;

/// JUMPDEST, PUSH1 0, JUMP: burns whatever gas it is given.
const LOOP_CODE: &[u8] = &[0x5b, 0x60, 0x00, 0x56];

fn devnet() -> Devnet {
    Devnet::generate(DevnetConfig {
        num_accounts: 2,
        ..Default::default()
    })
}

fn transfer(devnet: &Devnet) -> CallMessage {
    let accounts = devnet.addresses();
    CallMessage {
        from: Some(accounts[0]),
        to: Some(accounts[1]),
        value: Some(U256::from(1)),
        ..Default::default()
    }
}

/// Single simulated transfer.
fn bench_call(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let devnet = devnet();
    let api = devnet.api(ApiConfig::default());
    let message = transfer(&devnet);

    c.bench_function("call/transfer", |b| {
        b.to_async(&runtime)
            .iter(|| async { api.call(black_box(&message), None, None).await.unwrap() });
    });
}

/// Estimation cost as the search range grows.
fn bench_estimate_ranges(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_gas/range");
    let runtime = Runtime::new().unwrap();
    let devnet = devnet();
    let api = devnet.api(ApiConfig::default());

    for gas in [100_000u64, 1_000_000, 30_000_000] {
        let message = CallMessage {
            gas: Some(gas),
            ..transfer(&devnet)
        };
        group.bench_with_input(BenchmarkId::new("transfer", gas), &message, |b, message| {
            b.to_async(&runtime)
                .iter(|| async { api.estimate_gas(black_box(message), None).await.unwrap() });
        });
    }

    group.finish();
}

/// A call that never stops, bounded only by the gas cap.
fn bench_gas_burner(c: &mut Criterion) {
    let mut group = c.benchmark_group("call/gas_burner");
    let runtime = Runtime::new().unwrap();
    let devnet = devnet();
    let contract = devnet.addresses()[1];
    let overrides = StateOverride::from([(
        contract,
        AccountOverride {
            code: Some(Bytes::from_static(LOOP_CODE)),
            ..Default::default()
        },
    )]);

    for cap in [1_000_000u64, 10_000_000] {
        let api = devnet.api(ApiConfig {
            rpc_gas_cap: cap,
            ..Default::default()
        });
        let message = CallMessage {
            to: Some(contract),
            ..Default::default()
        };
        group.bench_with_input(BenchmarkId::from_parameter(cap), &message, |b, message| {
            b.to_async(&runtime).iter(|| async {
                // Out of gas is the expected result.
                api.call(black_box(message), None, Some(&overrides)).await.is_err()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_call, bench_estimate_ranges, bench_gas_burner);
criterion_main!(benches);
