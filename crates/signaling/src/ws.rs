//! WebSocket-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! Der `SignalingServer` stellt einen axum-Router bereit: die WebSocket-Route
//! unter dem konfigurierten Pfad sowie `/health` und `/metrics`. Jede
//! aufgewertete Verbindung laeuft als eigener Task in einer `ClientConnection`.

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::Response,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::connection::ClientConnection;
use crate::error::SignalingResult;
use crate::server_state::SignalingState;

/// Zustand des WebSocket-Handlers
#[derive(Clone)]
struct WsZustand {
    state: Arc<SignalingState>,
    shutdown_rx: watch::Receiver<bool>,
}

/// WebSocket-Signaling-Server
pub struct SignalingServer {
    state: Arc<SignalingState>,
}

impl SignalingServer {
    /// Erstellt einen neuen SignalingServer
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    /// Baut den axum-Router (WebSocket-Route, Health, Metriken)
    pub fn router(&self, shutdown_rx: watch::Receiver<bool>) -> Router {
        let zustand = WsZustand {
            state: Arc::clone(&self.state),
            shutdown_rx,
        };

        Router::new()
            .route(&self.state.config.ws_pfad, get(ws_handler))
            .with_state(zustand)
            .merge(funkraum_observability::observability_router(
                self.state.metriken.clone(),
            ))
            .layer(funkraum_observability::request_timing_layer())
    }

    /// Bindet `bind_addr` und bedient Verbindungen bis zum Shutdown
    ///
    /// Ein Bind-Fehler wird an den Aufrufer zurueckgegeben.
    pub async fn starten(self, bind_addr: SocketAddr, shutdown_rx: watch::Receiver<bool>) -> SignalingResult<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        self.mit_listener(listener, shutdown_rx).await
    }

    /// Bedient einen bereits gebundenen Listener bis zum Shutdown
    pub async fn mit_listener(self, listener: TcpListener, shutdown_rx: watch::Receiver<bool>) -> SignalingResult<()> {
        let lokale_addr = listener.local_addr()?;
        tracing::info!(
            adresse = %lokale_addr,
            pfad = %self.state.config.ws_pfad,
            "WebSocket Signaling-Server gestartet"
        );

        let app = self.router(shutdown_rx.clone());
        let mut shutdown = shutdown_rx;

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            tracing::info!("Signaling-Server: Shutdown-Signal empfangen");
        })
        .await?;

        tracing::info!(
            online = self.state.registry.online_anzahl(),
            uptime_sek = self.state.uptime_sek(),
            "WebSocket Signaling-Server gestoppt"
        );
        Ok(())
    }
}

/// `GET <ws_pfad>` – WebSocket-Upgrade
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(zustand): State<WsZustand>,
) -> Response {
    let max = zustand.state.config.max_frame_groesse;
    tracing::debug!(peer = %peer_addr, "WebSocket-Upgrade angefordert");

    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| async move {
            let verbindung = ClientConnection::neu(zustand.state, peer_addr);
            verbindung.verarbeiten(socket, zustand.shutdown_rx).await;
        })
}
