//! funkraum-server – Bibliotheks-Root
//!
//! Deklariert die Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;

use anyhow::{Context, Result};
use config::ServerConfig;
use funkraum_observability::FunkraumMetrics;
use funkraum_signaling::{SignalingServer, SignalingState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Bindet den Listener und laeuft bis Ctrl-C
    ///
    /// Ein Bind-Fehler wird sofort zurueckgegeben.
    pub async fn starten(self) -> Result<()> {
        let adresse = self.config.bind_adresse();
        let listener = TcpListener::bind(&adresse)
            .await
            .with_context(|| format!("Listener auf {adresse} konnte nicht gebunden werden"))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown-Signal empfangen, Server wird beendet"),
                Err(e) => tracing::error!(fehler = %e, "Ctrl-C-Handler fehlgeschlagen"),
            }
            shutdown_tx.send_replace(true);
        });

        self.ausfuehren(listener, shutdown_rx).await
    }

    /// Bedient einen gebundenen Listener bis `shutdown_rx` auf `true` wechselt
    pub async fn ausfuehren(self, listener: TcpListener, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let metriken = FunkraumMetrics::neu().context("Metriken konnten nicht registriert werden")?;
        let signaling_config = self.config.signaling_config();

        tracing::info!(
            server_name = %self.config.server.name,
            pfad = %signaling_config.ws_pfad,
            standard_raum = %signaling_config.standard_raum,
            keepalive_sek = signaling_config.keepalive.as_secs(),
            "Server startet"
        );

        let state = SignalingState::neu(signaling_config, metriken);
        SignalingServer::neu(Arc::clone(&state))
            .mit_listener(listener, shutdown_rx)
            .await?;

        tracing::info!(
            laufzeit_sek = state.uptime_sek(),
            "Server beendet"
        );
        Ok(())
    }
}
