//! Client-Kanal – Handle auf die Send-Queue einer Verbindung
//!
//! Die Presence-Registry und der Router schreiben nie direkt auf einen
//! Socket. Sie legen Envelopes in die begrenzte Queue des Empfaengers; der
//! Verbindungs-Task der Gegenseite schreibt sie auf die WebSocket-Verbindung.
//! Damit blockiert ein langsamer Peer weder die Registry noch andere Peers.

use funkraum_core::ConnectionId;
use funkraum_protocol::SignalingEnvelope;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::error::{SignalingError, SignalingResult};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Standard-Groesse der Send-Queue pro Client
pub const SEND_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// ClientChannel
// ---------------------------------------------------------------------------

/// Handle auf eine einzelne Verbindung (Send-Queue + Schliess-Signal)
///
/// Clone teilt Queue und Schliess-Signal.
#[derive(Clone, Debug)]
pub struct ClientChannel {
    pub connection_id: ConnectionId,
    tx: mpsc::Sender<SignalingEnvelope>,
    schliessen_tx: Arc<watch::Sender<bool>>,
}

/// Empfangsseite eines [`ClientChannel`], gehoert dem Verbindungs-Task
pub struct ChannelEmpfaenger {
    pub nachrichten: mpsc::Receiver<SignalingEnvelope>,
    pub schliessen: watch::Receiver<bool>,
}

impl ClientChannel {
    /// Erstellt einen neuen Kanal mit begrenzter Send-Queue
    pub fn neu(queue_groesse: usize) -> (Self, ChannelEmpfaenger) {
        let (tx, rx) = mpsc::channel(queue_groesse.max(1));
        let (schliessen_tx, schliessen_rx) = watch::channel(false);
        let kanal = Self {
            connection_id: ConnectionId::new(),
            tx,
            schliessen_tx: Arc::new(schliessen_tx),
        };
        let empfaenger = ChannelEmpfaenger {
            nachrichten: rx,
            schliessen: schliessen_rx,
        };
        (kanal, empfaenger)
    }

    /// Reiht einen Envelope nicht-blockierend ein
    ///
    /// Eine volle oder geschlossene Queue gilt als Schreibfehler.
    pub fn senden(&self, nachricht: SignalingEnvelope) -> SignalingResult<()> {
        if self.ist_geschlossen() {
            return Err(SignalingError::SendFehler);
        }
        match self.tx.try_send(nachricht) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection = %self.connection_id, "Send-Queue voll – Nachricht verworfen");
                Err(SignalingError::SendeQueueVoll)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(connection = %self.connection_id, "Send-Queue geschlossen (Client getrennt)");
                Err(SignalingError::SendFehler)
            }
        }
    }

    /// Fordert den Verbindungs-Task auf, die Verbindung zu schliessen
    pub fn schliessen(&self) {
        self.schliessen_tx.send_replace(true);
    }

    /// Wurde der Kanal geschlossen oder ist der Verbindungs-Task beendet?
    pub fn ist_geschlossen(&self) -> bool {
        *self.schliessen_tx.borrow() || self.tx.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
