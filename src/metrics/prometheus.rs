//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

lazy_static::lazy_static! {
    /// Total number of reconciliations by outcome
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "backstore_operator_reconciliations_total",
        "Total number of reconciliations by outcome",
        &["kind", "outcome"]
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "backstore_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Dependent resource creation attempts by result
    pub static ref DEPENDENT_CREATES: CounterVec = register_counter_vec!(
        "backstore_operator_dependent_creates_total",
        "Snapshot and volume claim creation attempts by result",
        &["kind", "result"]
    ).unwrap();

    /// Applied status transitions
    pub static ref STATUS_TRANSITIONS: CounterVec = register_counter_vec!(
        "backstore_operator_status_transitions_total",
        "Status progress transitions written",
        &["kind", "progress"]
    ).unwrap();

    /// Keys waiting in each work queue
    pub static ref QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "backstore_operator_queue_depth",
        "Number of keys waiting in the work queue",
        &["queue"]
    ).unwrap();

    /// Keys scheduled for retry
    pub static ref QUEUE_RETRIES: CounterVec = register_counter_vec!(
        "backstore_operator_queue_retries_total",
        "Number of keys re-enqueued with backoff",
        &["queue"]
    ).unwrap();

    /// Completion pollers currently running
    pub static ref ACTIVE_POLLERS: GaugeVec = register_gauge_vec!(
        "backstore_operator_active_pollers",
        "Number of in-flight completion pollers",
        &["kind"]
    ).unwrap();

    /// How completion polls ended
    pub static ref POLL_OUTCOMES: CounterVec = register_counter_vec!(
        "backstore_operator_poll_outcomes_total",
        "Completion poll results (ready, timeout, cancelled)",
        &["kind", "outcome"]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "backstore_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Serve `/metrics`, `/healthz` and `/readyz` on `port` until the listener fails
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Metrics server listening");

    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = service_fn(|req: Request<Incoming>| async move {
                Ok::<_, hyper::Error>(route(&req))
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%peer, error = %e, "Metrics connection closed with error");
            }
        });
    }
}

fn route<B>(req: &Request<B>) -> Response<Full<Bytes>> {
    match req.uri().path() {
        "/metrics" => encode_metrics(),
        "/healthz" | "/health" => text(StatusCode::OK, "ok"),
        // Unready once shutdown has begun
        "/readyz" | "/ready" if OPERATOR_HEALTH.get() < 1.0 => {
            text(StatusCode::SERVICE_UNAVAILABLE, "shutting down")
        }
        "/readyz" | "/ready" => text(StatusCode::OK, "ok"),
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn encode_metrics() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}
