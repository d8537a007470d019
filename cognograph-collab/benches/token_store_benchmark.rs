use cognograph_collab::{
    parse_invite_link, LinkConfig, MemoryVault, Permission, SessionToken, TokenStore,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn bench_token_store(c: &mut Criterion) {
    let store = TokenStore::with_key(MemoryVault::new(), [0x5Au8; 32]);
    let token = SessionToken::new("bench-ws", "a".repeat(64), Permission::Write, u64::MAX);

    c.bench_function("token_store_seal_write", |b| {
        b.iter(|| store.store(black_box(&token)).unwrap())
    });

    store.store(&token).unwrap();
    c.bench_function("token_store_read_open", |b| {
        b.iter(|| black_box(store.get(black_box("bench-ws"))))
    });
}

fn bench_invite_parse(c: &mut Criterion) {
    let config = LinkConfig::default();
    let link = "cognograph://join/0b6f3c1e-8d4a-4a43-9a55-3c4f2f0e9d11?token=abcdef0123456789";

    c.bench_function("invite_parse", |b| {
        b.iter(|| parse_invite_link(black_box(link), &config).unwrap())
    });
}

criterion_group!(benches, bench_token_store, bench_invite_parse);
criterion_main!(benches);
