//! OTLP/HTTP payload encoding as seen by a collector.

use axum::{Router, http::HeaderMap, http::StatusCode, routing::post};
use observe_config::{Compression, Config, Protocol, SamplingMode};
use observe_runtime::Client;
use opentelemetry::trace::{Span, Tracer};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

type Encodings = Arc<Mutex<Vec<Option<String>>>>;

/// Accepts trace exports and records each request's `content-encoding`.
async fn recording_collector() -> (SocketAddr, Encodings) {
    let seen: Encodings = Arc::default();
    let recorder = Arc::clone(&seen);
    let app = Router::new().route(
        "/v1/traces",
        post(move |headers: HeaderMap| {
            let recorder = Arc::clone(&recorder);
            async move {
                let encoding = headers
                    .get(http::header::CONTENT_ENCODING)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                recorder.lock().push(encoding);
                StatusCode::OK
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, seen)
}

fn config(collector: SocketAddr, compression: Compression) -> Config {
    let mut config = Config::builder()
        .service_name("checkout")
        .protocol(Protocol::Http)
        .endpoint(format!("http://{collector}"))
        .sampling(SamplingMode::AlwaysOn, 1.0)
        .retry(false)
        .diagnostics(false)
        .build();
    config.exporters.otlp.compression = compression;
    config.instrumentation.runtime_metrics.enabled = false;
    config
}

async fn export_one(compression: Compression) -> Vec<Option<String>> {
    let (collector, seen) = recording_collector().await;
    let client = Client::builder()
        .config(config(collector, compression))
        .init()
        .await
        .unwrap();

    let instance = client.current();
    tokio::task::spawn_blocking(move || {
        instance.tracer("http-export").start("checkout").end();
        instance.flush();
    })
    .await
    .unwrap();

    assert_eq!(client.snapshot().trace_dropped_spans, 0);
    client.shutdown().await.unwrap();

    let seen = seen.lock().clone();
    seen
}

#[tokio::test(flavor = "multi_thread")]
async fn test_gzip_applies_to_http_exports() {
    let seen = export_one(Compression::Gzip).await;

    assert!(!seen.is_empty());
    assert!(seen.iter().all(|e| e.as_deref() == Some("gzip")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_uncompressed_http_exports() {
    let seen = export_one(Compression::None).await;

    assert!(!seen.is_empty());
    assert!(seen.iter().all(Option::is_none));
}
