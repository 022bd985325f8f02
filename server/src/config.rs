//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use funkraum_core::RoomName;
use funkraum_signaling::SignalingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Heartbeat, Queues und Standardraum
    pub signaling: SignalingEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Funkraum".into(),
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    pub bind_adresse: String,
    /// Port fuer WebSocket, Health und Metriken
    pub port: u16,
    /// Pfad der WebSocket-Route
    pub ws_pfad: String,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 8080,
            ws_pfad: "/ws".into(),
        }
    }
}

/// Signaling-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingEinstellungen {
    /// Ping-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Deadline pro Schreibvorgang in Sekunden
    pub schreib_timeout_sek: u64,
    /// Verbindung gilt nach so vielen Sekunden Stille als tot
    pub verbindungs_timeout_sek: u64,
    /// Kapazitaet der Send-Queue pro Verbindung
    pub send_queue_groesse: usize,
    /// Raum fuer `join` ohne Raumangabe
    pub standard_raum: String,
}

impl Default for SignalingEinstellungen {
    fn default() -> Self {
        Self {
            keepalive_sek: 30,
            schreib_timeout_sek: 10,
            verbindungs_timeout_sek: 90,
            send_queue_groesse: 64,
            standard_raum: funkraum_core::STANDARD_RAUM.into(),
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                config.pruefen()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Lehnt Werte ab, mit denen der Heartbeat nicht funktionieren kann
    pub fn pruefen(&self) -> anyhow::Result<()> {
        let s = &self.signaling;
        if s.keepalive_sek == 0 || s.schreib_timeout_sek == 0 {
            anyhow::bail!("keepalive_sek und schreib_timeout_sek muessen > 0 sein");
        }
        if s.verbindungs_timeout_sek <= s.keepalive_sek {
            anyhow::bail!(
                "verbindungs_timeout_sek ({}) muss groesser als keepalive_sek ({}) sein",
                s.verbindungs_timeout_sek,
                s.keepalive_sek
            );
        }
        if s.send_queue_groesse == 0 {
            anyhow::bail!("send_queue_groesse muss > 0 sein");
        }
        if !self.netzwerk.ws_pfad.starts_with('/') {
            anyhow::bail!("ws_pfad muss mit '/' beginnen: {}", self.netzwerk.ws_pfad);
        }
        Ok(())
    }

    /// Gibt die vollstaendige Bind-Adresse zurueck
    pub fn bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port)
    }

    /// Parameter fuer den Signaling-Server
    pub fn signaling_config(&self) -> SignalingConfig {
        let s = &self.signaling;
        SignalingConfig {
            ws_pfad: self.netzwerk.ws_pfad.clone(),
            keepalive: Duration::from_secs(s.keepalive_sek),
            schreib_timeout: Duration::from_secs(s.schreib_timeout_sek),
            verbindungs_timeout: Duration::from_secs(s.verbindungs_timeout_sek),
            send_queue_groesse: s.send_queue_groesse,
            standard_raum: RoomName::from(s.standard_raum.as_str()),
            ..SignalingConfig::default()
        }
    }
}
