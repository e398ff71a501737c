use criterion::{Criterion, black_box, criterion_group, criterion_main};
use portfolio_server::oauth2::codes::{AuthorizationGrant, s256_challenge};
use portfolio_server::oauth2::{AuthorizationCodeStore, MemoryCodeStore, scopes};
use portfolio_server::password::{generate_token, sha256_hex};
use time::{Duration, OffsetDateTime};

const VERIFIER: &str = "dBjftJeZ4CVP-mJ92K9kqRFF1hMHQobyJqWcBBAhsbo4Gx";

fn grant(code: String) -> AuthorizationGrant {
    let now = OffsetDateTime::now_utc();
    AuthorizationGrant {
        code,
        client_id: "bench".to_string(),
        user_id: "user".to_string(),
        redirect_uri: "https://app.example/cb".to_string(),
        redirect_uri_explicit: true,
        scope: "openid profile".to_string(),
        code_challenge: Some(s256_challenge(VERIFIER)),
        code_challenge_method: Some("S256".to_string()),
        created_at: now,
        expires_at: now + Duration::minutes(10),
    }
}

fn benchmark_pkce(c: &mut Criterion) {
    c.bench_function("pkce_s256_challenge", |b| {
        b.iter(|| black_box(s256_challenge(black_box(VERIFIER))));
    });

    let g = grant("code".to_string());
    c.bench_function("pkce_verify", |b| {
        b.iter(|| black_box(g.verify_pkce(black_box(VERIFIER))));
    });
}

fn benchmark_tokens(c: &mut Criterion) {
    c.bench_function("generate_token", |b| {
        b.iter(|| black_box(generate_token()));
    });

    let token = generate_token();
    c.bench_function("session_token_digest", |b| {
        b.iter(|| black_box(sha256_hex(black_box(&token))));
    });
}

fn benchmark_scopes(c: &mut Criterion) {
    let allowed = scopes::parse("openid profile email profile:write downloads:read");
    c.bench_function("scope_negotiate", |b| {
        b.iter(|| {
            black_box(scopes::negotiate(
                black_box(Some("openid email unknown profile")),
                &allowed,
            ))
        });
    });

    c.bench_function("scope_union", |b| {
        b.iter(|| black_box(scopes::union(black_box("openid profile"), black_box("email openid"))));
    });
}

fn benchmark_code_store(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("memory_code_store_insert_take", |b| {
        let store = MemoryCodeStore::new();
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let code = format!("code-{counter}");
            rt.block_on(async {
                store.insert(grant(code.clone())).await.unwrap();
                black_box(store.take(black_box(&code)).await.unwrap());
            });
        });
    });

    c.bench_function("memory_code_store_purge", |b| {
        let store = MemoryCodeStore::new();
        rt.block_on(async {
            for i in 0..1000 {
                store.insert(grant(format!("live-{i}"))).await.unwrap();
            }
        });
        b.iter(|| black_box(rt.block_on(store.purge_expired()).unwrap()));
    });
}

criterion_group!(
    benches,
    benchmark_pkce,
    benchmark_tokens,
    benchmark_scopes,
    benchmark_code_store
);
criterion_main!(benches);
