//! Funkraum Server – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Server.

use clap::Parser;
use funkraum_observability::logging_initialisieren;
use funkraum_server::{config::ServerConfig, Server};

#[derive(Parser)]
#[command(name = "funkraum-server")]
#[command(about = "Signaling-Relay fuer Peer-to-Peer-Audio", version)]
struct Cli {
    /// Port fuer WebSocket, Health und Metriken (ueberschreibt die Konfiguration, Standard 8080)
    #[arg(short, long, env = "FUNKRAUM_PORT")]
    port: Option<u16>,

    /// Pfad zur TOML-Konfiguration
    #[arg(long, env = "FUNKRAUM_CONFIG", default_value = "funkraum.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let mut config = match ServerConfig::laden(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(2);
        }
    };
    if let Some(port) = cli.port {
        config.netzwerk.port = port;
    }

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config,
        adresse = %config.bind_adresse(),
        "Funkraum Server wird initialisiert"
    );

    if let Err(e) = Server::neu(config).starten().await {
        tracing::error!(fehler = %format!("{e:#}"), "Server abgebrochen");
        std::process::exit(1);
    }
}
