#![forbid(unsafe_code)]

//! HTTP entry point: resolves configuration, opens the download store and
//! serves the API until Ctrl+C.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tikgrab::{
    api::{AppState, router},
    config::{ConfigOverrides, resolve_service_config},
    extractor::{ExtractorPolicy, YtDlpExtractor},
    logging::init_logging,
    store::DownloadStore,
};
use tokio::signal;

#[derive(Debug, Clone, Parser)]
#[command(name = "backend", version, about = "Short-video download service")]
struct BackendArgs {
    /// Directory holding one sub-directory per download (UPLOAD_FOLDER).
    #[arg(long, value_name = "DIR")]
    storage_root: Option<PathBuf>,
    /// Listen address (HOST).
    #[arg(long)]
    host: Option<String>,
    /// Listen port (PORT).
    #[arg(long)]
    port: Option<u16>,
    /// yt-dlp executable (YT_DLP_BIN).
    #[arg(long, value_name = "PATH")]
    ytdlp_bin: Option<PathBuf>,
    /// dotenv file consulted after the process environment.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            storage_root: self.storage_root,
            host: self.host,
            port: self.port,
            ytdlp_bin: self.ytdlp_bin,
            env_path: self.env_file,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = BackendArgs::parse();
    let config = resolve_service_config(args.into_overrides())?;
    init_logging(&config.log_level);

    let store = DownloadStore::open(&config.storage_root)
        .with_context(|| format!("creating {}", config.storage_root.display()))?;
    let extractor = YtDlpExtractor::new(&config.ytdlp_bin, ExtractorPolicy::from_config(&config));
    let state = AppState::new(store, Arc::new(extractor));
    let app = router(state, config.max_body_bytes);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(
        %addr,
        profile = ?config.profile,
        storage_root = %config.storage_root.display(),
        ytdlp_bin = %config.ytdlp_bin.display(),
        "API server listening"
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    tracing::info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on the handler; the process still exits
    // on Ctrl+C without it.
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_leave_config_to_the_environment() {
        let args = BackendArgs::try_parse_from(["backend"]).unwrap();
        let overrides = args.into_overrides();
        assert!(overrides.storage_root.is_none());
        assert!(overrides.port.is_none());
        assert!(overrides.env_path.is_none());
    }

    #[test]
    fn flags_map_onto_overrides() {
        let args = BackendArgs::try_parse_from([
            "backend",
            "--storage-root",
            "/srv/downloads",
            "--host=127.0.0.1",
            "--port",
            "9000",
            "--ytdlp-bin",
            "/opt/yt-dlp",
            "--env-file",
            "prod.env",
        ])
        .unwrap();
        let overrides = args.into_overrides();
        assert_eq!(overrides.storage_root, Some(PathBuf::from("/srv/downloads")));
        assert_eq!(overrides.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(overrides.port, Some(9000));
        assert_eq!(overrides.ytdlp_bin, Some(PathBuf::from("/opt/yt-dlp")));
        assert_eq!(overrides.env_path, Some(PathBuf::from("prod.env")));
    }

    #[test]
    fn invalid_port_is_rejected() {
        assert!(BackendArgs::try_parse_from(["backend", "--port", "99999"]).is_err());
        assert!(BackendArgs::try_parse_from(["backend", "--unknown"]).is_err());
    }
}
