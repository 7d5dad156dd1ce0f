use cookiescope::cookies::safari::decode_binary_cookies;
use cookiescope::cookies::{Browser, Cookie, CookieAggregator, NoopListener, SourceEvent};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use time::OffsetDateTime;

#[path = "../tests/common/mod.rs"]
mod common;

use common::{encode_file, encode_page, TestCookie};

fn sample_file(pages: usize, per_page: usize) -> Vec<u8> {
    let pages: Vec<Vec<u8>> = (0..pages)
        .map(|p| {
            let cookies: Vec<TestCookie> = (0..per_page)
                .map(|i| TestCookie::new(&format!("site{}.com", (p * per_page + i) / 4), &format!("c{i}"), "value").flags(1))
                .collect();
            encode_page(&cookies)
        })
        .collect();
    encode_file(&pages)
}

fn benchmark_decode(c: &mut Criterion) {
    let data = sample_file(20, 50);

    c.bench_function("binarycookies_decode_1000", |b| {
        b.iter(|| {
            black_box(decode_binary_cookies(black_box(data.clone())).unwrap());
        })
    });
}

fn benchmark_search(c: &mut Criterion) {
    let aggregator = CookieAggregator::new(Arc::new(NoopListener));
    for i in 0..2000 {
        let domain = format!("domain{i}.example");
        let cookies = vec![Cookie::new(Browser::Chrome, &domain, format!("sid{i}"), "v", "/", OffsetDateTime::UNIX_EPOCH)
            .with_flags(i % 3 == 0, false)];
        aggregator.apply(SourceEvent::DomainUpdated { browser: Browser::Chrome, domain, cookies });
    }

    c.bench_function("index_search_2000_domains", |b| {
        b.iter(|| {
            black_box(aggregator.search(black_box("secure domain19")));
        })
    });

    c.bench_function("index_domain_at", |b| {
        b.iter(|| {
            black_box(aggregator.domain_at(black_box(1234)));
        })
    });
}

criterion_group!(benches, benchmark_decode, benchmark_search);
criterion_main!(benches);
