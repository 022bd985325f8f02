//! # funkraum-observability
//!
//! Observability-Crate fuer Funkraum:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Health-Check-Endpunkt (`/health`)
//! - Structured Logging via tracing-subscriber
//! - Request-Tracing-Layer fuer die HTTP-Routen

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{health_router, HealthResponse, HealthStatus};
pub use logging::logging_initialisieren;
pub use metrics::{metrics_router, FunkraumMetrics};

use axum::Router;

/// Router mit `/metrics` und `/health`, zum Einhaengen in den Signaling-Server
pub fn observability_router(metriken: FunkraumMetrics) -> Router {
    Router::new()
        .merge(metrics_router(metriken.clone()))
        .merge(health_router(metriken))
}

/// HTTP-Trace-Layer (Methode, Pfad, Status, Dauer als tracing-Spans)
pub fn request_timing_layer() -> tower_http::trace::TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
> {
    tower_http::trace::TraceLayer::new_for_http()
}
