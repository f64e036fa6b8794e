//! place-server: runs the shared canvas over WebSocket.
//!
//! Every option can also come from the environment:
//! `PLACE_ADDR`, `PLACE_DATA_DIR`, `PLACE_BOARD_KEY`, `PLACE_UPDATE_LIMIT_MS`.
//! Log level via `RUST_LOG` (default `info`).

use clap::Parser;
use place_collab::hub::HubConfig;
use place_collab::server::{PlaceServer, ServerConfig};
use place_collab::session::SessionConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to listen on
    #[clap(long, env = "PLACE_ADDR", default_value = "127.0.0.1:9090")]
    addr: String,
    /// RocksDB directory; omit to keep the board in memory only
    #[clap(long, env = "PLACE_DATA_DIR")]
    data_dir: Option<PathBuf>,
    /// Key of the board snapshot inside the store
    #[clap(long, env = "PLACE_BOARD_KEY", default_value = "board")]
    board_key: String,
    /// Minimum milliseconds between two updates of one user
    #[clap(long, env = "PLACE_UPDATE_LIMIT_MS", default_value = "1000")]
    update_limit_ms: u64,
    /// Seconds without inbound traffic before a connection is dropped
    #[clap(long, default_value = "60", value_parser = clap::value_parser!(u64).range(1..))]
    read_timeout_secs: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.addr,
            storage_path: self.data_dir,
            board_key: self.board_key,
            hub: HubConfig {
                min_interval: Duration::from_millis(self.update_limit_ms),
                ..HubConfig::default()
            },
            session: SessionConfig::with_read_timeout(Duration::from_secs(self.read_timeout_secs)),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    log::info!(
        "Starting place server (update limit {:?}, storage {})",
        config.hub.min_interval,
        config
            .storage_path
            .as_ref()
            .map_or_else(|| "in-memory".to_string(), |p| p.display().to_string())
    );

    let server = match PlaceServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            log::error!("Failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                log::error!("Server stopped: {e}");
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutting down");
        }
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Args::parse_from(["place-server"]).into_config();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert!(config.storage_path.is_none());
        assert_eq!(config.hub.min_interval, Duration::from_secs(1));
        assert_eq!(config.session.ping_interval, Duration::from_secs(54));
    }

    #[test]
    fn test_flags() {
        let config = Args::parse_from([
            "place-server",
            "--addr",
            "0.0.0.0:80",
            "--data-dir",
            "/var/lib/place",
            "--board-key",
            "staging",
            "--update-limit-ms",
            "250",
        ])
        .into_config();
        assert_eq!(config.bind_addr, "0.0.0.0:80");
        assert_eq!(config.storage_path, Some(PathBuf::from("/var/lib/place")));
        assert_eq!(config.board_key, "staging");
        assert_eq!(config.hub.min_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_read_timeout_refused() {
        assert!(Args::try_parse_from(["place-server", "--read-timeout-secs", "0"]).is_err());

        let config = Args::parse_from(["place-server", "--read-timeout-secs", "1"]).into_config();
        assert!(config.session.validate().is_ok());
        assert!(config.session.ping_interval < config.session.read_timeout);
    }
}
