//! Tower layer producing server spans for HTTP and gRPC services.

use http::{HeaderMap, HeaderName, Request, Response};
use opentelemetry::metrics::Histogram;
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context as OtelContext, KeyValue};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracer;
use opentelemetry_semantic_conventions::attribute::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, RPC_GRPC_STATUS_CODE, RPC_METHOD,
    RPC_SERVICE, RPC_SYSTEM, URL_PATH,
};
use pin_project::pin_project;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Instant;
use tower::{Layer, Service};

const GRPC_METADATA_PREFIX: &str = "rpc.grpc.request.metadata.";

/// Reads W3C trace context from request headers.
pub(crate) struct HeaderExtractor<'a>(pub(crate) &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

pub(crate) enum Flavor {
    Http { ignored_routes: HashSet<String> },
    Grpc { metadata_allowlist: Vec<HeaderName> },
}

pub(crate) struct ServerTelemetry {
    pub(crate) tracer: SdkTracer,
    pub(crate) duration: Histogram<f64>,
    pub(crate) flavor: Flavor,
}

struct InFlight {
    cx: OtelContext,
    started: Instant,
    metric_attributes: Vec<KeyValue>,
}

impl ServerTelemetry {
    fn start<B>(&self, request: &Request<B>) -> Option<InFlight> {
        let path = request.uri().path();
        let (name, attributes, metric_attributes) = match &self.flavor {
            Flavor::Http { ignored_routes } => {
                if ignored_routes.contains(path) {
                    return None;
                }
                let method = request.method().as_str().to_string();
                (
                    format!("{method} {path}"),
                    vec![
                        KeyValue::new(HTTP_REQUEST_METHOD, method.clone()),
                        KeyValue::new(URL_PATH, path.to_string()),
                    ],
                    vec![KeyValue::new(HTTP_REQUEST_METHOD, method)],
                )
            }
            Flavor::Grpc { metadata_allowlist } => {
                let full_method = path.trim_start_matches('/');
                let (service, method) = full_method.split_once('/').unwrap_or((full_method, ""));
                let mut attributes = vec![
                    KeyValue::new(RPC_SYSTEM, "grpc"),
                    KeyValue::new(RPC_SERVICE, service.to_string()),
                    KeyValue::new(RPC_METHOD, method.to_string()),
                ];
                for key in metadata_allowlist {
                    if let Some(value) = request.headers().get(key).and_then(|v| v.to_str().ok())
                    {
                        attributes.push(KeyValue::new(
                            format!("{GRPC_METADATA_PREFIX}{}", key.as_str()),
                            value.to_string(),
                        ));
                    }
                }
                let metric_attributes = vec![
                    KeyValue::new(RPC_SYSTEM, "grpc"),
                    KeyValue::new(RPC_SERVICE, service.to_string()),
                    KeyValue::new(RPC_METHOD, method.to_string()),
                ];
                (full_method.to_string(), attributes, metric_attributes)
            }
        };

        let parent = TraceContextPropagator::new().extract(&HeaderExtractor(request.headers()));
        let span = self
            .tracer
            .span_builder(name)
            .with_kind(SpanKind::Server)
            .with_attributes(attributes)
            .start_with_context(&self.tracer, &parent);

        Some(InFlight {
            cx: parent.with_span(span),
            started: Instant::now(),
            metric_attributes,
        })
    }

    fn finish<B, E: fmt::Display>(
        &self,
        in_flight: InFlight,
        result: &Result<Response<B>, E>,
    ) {
        let InFlight {
            cx,
            started,
            mut metric_attributes,
        } = in_flight;
        let span = cx.span();

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                span.set_attribute(KeyValue::new(HTTP_RESPONSE_STATUS_CODE, i64::from(status)));
                metric_attributes.push(KeyValue::new(HTTP_RESPONSE_STATUS_CODE, i64::from(status)));

                let grpc_status = response
                    .headers()
                    .get("grpc-status")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<i64>().ok());

                match (&self.flavor, grpc_status) {
                    (Flavor::Grpc { .. }, Some(code)) => {
                        span.set_attribute(KeyValue::new(RPC_GRPC_STATUS_CODE, code));
                        if code != 0 {
                            span.set_status(Status::error(format!("grpc status {code}")));
                        }
                    }
                    _ if status >= 500 => {
                        span.set_status(Status::error(format!("status {status}")));
                    }
                    _ => {}
                }
            }
            Err(e) => span.set_status(Status::error(e.to_string())),
        }

        span.end();
        self.duration
            .record(started.elapsed().as_secs_f64(), &metric_attributes);
    }
}

/// Tower layer adding a server span around every request.
///
/// Obtained from [`HttpInstrumentation::layer`](crate::HttpInstrumentation::layer)
/// or [`GrpcInstrumentation::layer`](crate::GrpcInstrumentation::layer).
#[derive(Clone)]
pub struct TraceLayer {
    telemetry: Arc<ServerTelemetry>,
}

impl TraceLayer {
    pub(crate) fn new(telemetry: Arc<ServerTelemetry>) -> Self {
        Self { telemetry }
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService {
            inner,
            telemetry: Arc::clone(&self.telemetry),
        }
    }
}

/// Service produced by [`TraceLayer`].
#[derive(Clone)]
pub struct TraceService<S> {
    inner: S,
    telemetry: Arc<ServerTelemetry>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for TraceService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: fmt::Display,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let in_flight = self.telemetry.start(&request);
        let inner = match &in_flight {
            Some(state) => {
                let _guard = state.cx.clone().attach();
                self.inner.call(request)
            }
            None => self.inner.call(request),
        };

        ResponseFuture {
            inner,
            in_flight,
            telemetry: Arc::clone(&self.telemetry),
        }
    }
}

/// Future that ends the server span when the response is ready.
#[pin_project]
pub struct ResponseFuture<F> {
    #[pin]
    inner: F,
    in_flight: Option<InFlight>,
    telemetry: Arc<ServerTelemetry>,
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
    E: fmt::Display,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let result = {
            // Child spans created while polling see the server span as parent.
            let _guard = this.in_flight.as_ref().map(|state| state.cx.clone().attach());
            ready!(this.inner.poll(cx))
        };

        if let Some(in_flight) = this.in_flight.take() {
            this.telemetry.finish(in_flight, &result);
        }

        Poll::Ready(result)
    }
}
