//! Prometheus-kompatible Metriken fuer Funkraum
//!
//! Registrierte Metriken:
//! - `funkraum_connected_clients` – Gauge: registrierte Identitaeten (alle Raeume)
//! - `funkraum_rooms_active` – Gauge: Raeume mit mindestens einem Mitglied
//! - `funkraum_envelopes_routed_total` – Counter: weitergeleitete Envelopes (type)
//! - `funkraum_envelopes_dropped_total` – Counter: verworfene Envelopes (reason)
//! - `funkraum_presence_broadcasts_total` – Counter: versendete Presence-Snapshots
//! - `funkraum_evictions_total` – Counter: zwangsweise entfernte Verbindungen

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Funkraum-Prometheus-Metriken
///
/// Clone teilt die Registry und alle Metrik-Handles.
#[derive(Clone)]
pub struct FunkraumMetrics {
    pub registry: Arc<Registry>,

    pub connected_clients: IntGauge,
    pub rooms_active: IntGauge,
    pub envelopes_routed_total: IntCounterVec,
    pub envelopes_dropped_total: IntCounterVec,
    pub presence_broadcasts_total: IntCounter,
    pub evictions_total: IntCounter,
}

impl FunkraumMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connected_clients = IntGauge::with_opts(Opts::new(
            "funkraum_connected_clients",
            "Anzahl registrierter Identitaeten ueber alle Raeume",
        ))?;
        registry.register(Box::new(connected_clients.clone()))?;

        let rooms_active = IntGauge::with_opts(Opts::new(
            "funkraum_rooms_active",
            "Anzahl Raeume mit mindestens einem Mitglied",
        ))?;
        registry.register(Box::new(rooms_active.clone()))?;

        let envelopes_routed_total = IntCounterVec::new(
            Opts::new(
                "funkraum_envelopes_routed_total",
                "Weitergeleitete Punkt-zu-Punkt-Envelopes",
            ),
            &["type"],
        )?;
        registry.register(Box::new(envelopes_routed_total.clone()))?;

        let envelopes_dropped_total = IntCounterVec::new(
            Opts::new(
                "funkraum_envelopes_dropped_total",
                "Verworfene Envelopes nach Grund",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(envelopes_dropped_total.clone()))?;

        let presence_broadcasts_total = IntCounter::with_opts(Opts::new(
            "funkraum_presence_broadcasts_total",
            "Gesamtanzahl versendeter Presence-Snapshots",
        ))?;
        registry.register(Box::new(presence_broadcasts_total.clone()))?;

        let evictions_total = IntCounter::with_opts(Opts::new(
            "funkraum_evictions_total",
            "Verbindungen die wegen Schreibfehlern entfernt wurden",
        ))?;
        registry.register(Box::new(evictions_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_clients,
            rooms_active,
            envelopes_routed_total,
            envelopes_dropped_total,
            presence_broadcasts_total,
            evictions_total,
        })
    }

    /// Zaehlt einen weitergeleiteten Envelope
    pub fn weitergeleitet(&self, typ: &str) {
        self.envelopes_routed_total.with_label_values(&[typ]).inc();
    }

    /// Zaehlt einen verworfenen Envelope
    pub fn verworfen(&self, grund: &str) {
        self.envelopes_dropped_total.with_label_values(&[grund]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: FunkraumMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<FunkraumMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = FunkraumMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn counter_mit_labels() {
        let metriken = FunkraumMetrics::neu().unwrap();
        metriken.weitergeleitet("offer");
        metriken.weitergeleitet("offer");
        metriken.verworfen("empfaenger_unbekannt");

        assert_eq!(
            metriken
                .envelopes_routed_total
                .with_label_values(&["offer"])
                .get(),
            2
        );
        assert_eq!(
            metriken
                .envelopes_dropped_total
                .with_label_values(&["empfaenger_unbekannt"])
                .get(),
            1
        );
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = FunkraumMetrics::neu().unwrap();
        metriken.connected_clients.set(2);
        metriken.presence_broadcasts_total.inc();

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("funkraum_connected_clients 2"));
        assert!(output.contains("funkraum_presence_broadcasts_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn getrennte_instanzen_teilen_nichts() {
        let a = FunkraumMetrics::neu().unwrap();
        let b = FunkraumMetrics::neu().unwrap();
        a.evictions_total.inc();
        assert_eq!(b.evictions_total.get(), 0);
    }
}
