//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Wird einmal beim Start erzeugt und als `Arc` an Listener und
//! Verbindungs-Tasks weitergereicht.

use funkraum_core::RoomName;
use funkraum_observability::FunkraumMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broadcast::SEND_QUEUE_GROESSE;
use crate::presence::PresenceRegistry;
use crate::router::MessageRouter;

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Pfad der WebSocket-Route
    pub ws_pfad: String,
    /// Intervall zwischen zwei Pings
    pub keepalive: Duration,
    /// Deadline fuer einzelne Schreibvorgaenge (inkl. Ping)
    pub schreib_timeout: Duration,
    /// Verbindung gilt als tot, wenn so lange nichts empfangen wurde
    pub verbindungs_timeout: Duration,
    /// Groesse der Send-Queue pro Client
    pub send_queue_groesse: usize,
    /// Raum fuer `join` ohne Raumangabe
    pub standard_raum: RoomName,
    /// Maximale Groesse eines Text-Frames
    pub max_frame_groesse: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            ws_pfad: "/ws".to_string(),
            keepalive: Duration::from_secs(30),
            schreib_timeout: Duration::from_secs(10),
            verbindungs_timeout: Duration::from_secs(90),
            send_queue_groesse: SEND_QUEUE_GROESSE,
            standard_raum: RoomName::default(),
            max_frame_groesse: funkraum_protocol::wire::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    pub config: Arc<SignalingConfig>,
    /// Presence-Registry (wer ist in welchem Raum)
    pub registry: PresenceRegistry,
    pub router: MessageRouter,
    pub metriken: FunkraumMetrics,
    /// Startzeitpunkt des Servers
    pub start_time: Instant,
}

impl SignalingState {
    /// Erstellt einen neuen SignalingState
    pub fn neu(config: SignalingConfig, metriken: FunkraumMetrics) -> Arc<Self> {
        let registry = PresenceRegistry::neu(metriken.clone());
        let router = MessageRouter::neu(
            registry.clone(),
            metriken.clone(),
            config.standard_raum.clone(),
        );
        Arc::new(Self {
            config: Arc::new(config),
            registry,
            router,
            metriken,
            start_time: Instant::now(),
        })
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
