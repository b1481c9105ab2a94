//! Criterion benchmarks for vigil-core hot paths.
//!
//! Covers: non-hardened child derivation, address encoding, and
//! Base58Check round trips. Discovery derives a full gap window of keys
//! per batch, so these dominate its CPU time.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use vigil_core::address::{base58check_decode, base58check_encode, encode_address};
use vigil_core::constants::Network;
use vigil_core::crypto::ExtendedKey;

const XPUB: &str = "xpub68Gmy5EdvgibQVfPdqkBBCHxA5htiqg55crXYuXoQRKfDBFA1WEjWgP6LHhwBZeNK1VTsfTFUHCdrfp1bgwQ9xv5ski8PX9rL2dZXvgGDnw";

fn account_key() -> ExtendedKey {
    ExtendedKey::from_xpub(XPUB).expect("valid xpub").1
}

fn bench_derive_child(c: &mut Criterion) {
    let key = account_key();

    c.bench_function("derive_child", |b| {
        b.iter(|| black_box(&key).derive_child(black_box(7)))
    });

    c.bench_function("derive_gap_window_20", |b| {
        let chain = key.derive_child(0).expect("derivable");
        b.iter(|| {
            (0..20)
                .map(|i| chain.derive_child(i).expect("derivable"))
                .collect::<Vec<_>>()
        })
    });
}

fn bench_encode_address(c: &mut Criterion) {
    let key = account_key().derive_path(&[0, 0]).expect("derivable");

    c.bench_function("encode_p2sh_p2wpkh", |b| {
        b.iter(|| encode_address(black_box(&key), false, Network::Mainnet))
    });

    c.bench_function("encode_p2pkh", |b| {
        b.iter(|| encode_address(black_box(&key), true, Network::Mainnet))
    });
}

fn bench_base58check(c: &mut Criterion) {
    let payload = [0x42u8; 78];
    let encoded = base58check_encode(&payload);

    c.bench_function("base58check_encode_78", |b| {
        b.iter(|| base58check_encode(black_box(&payload)))
    });

    c.bench_function("base58check_decode_78", |b| {
        b.iter(|| base58check_decode(black_box(&encoded)))
    });
}

criterion_group!(
    benches,
    bench_derive_child,
    bench_encode_address,
    bench_base58check,
);
criterion_main!(benches);
