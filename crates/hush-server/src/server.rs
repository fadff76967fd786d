use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use directories::ProjectDirs;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    auth::require_admin_token,
    handlers::{cleanup, decrypt_message, encrypt_message, generate_key, get_message, health},
    service::MessageService,
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    /// Bearer token for `/admin/*` routes; unset leaves them open.
    pub admin_token: Option<String>,
    pub cors_origins: Option<String>,
    pub sweep_interval: Duration,
    /// Expiry applied when a create request omits `expiry_hours`.
    pub default_expiry_hours: u32,
    /// View limit applied when a create request omits `max_views`.
    pub default_max_views: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HUSH_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("HUSH_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            data_dir: std::env::var("HUSH_DATA_DIR").ok().map(PathBuf::from),
            admin_token: std::env::var("HUSH_ADMIN_TOKEN").ok(),
            cors_origins: std::env::var("HUSH_CORS_ORIGINS").ok(),
            sweep_interval: Duration::from_secs(300),
            default_expiry_hours: std::env::var("HUSH_DEFAULT_EXPIRY_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),
            default_max_views: std::env::var("HUSH_DEFAULT_MAX_VIEWS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
        }
    }
}

/// Resolve the data directory for the message database, creating it if
/// needed. `HUSH_DATA_DIR` arrives through `ServerConfig`; without an
/// override this falls back to the platform data dir
/// (`~/.local/share/hush` on Linux).
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    let path = match data_dir {
        Some(d) => d.clone(),
        None => ProjectDirs::from("", "", "hush")
            .context("could not determine platform data directory")?
            .data_dir()
            .to_owned(),
    };
    std::fs::create_dir_all(&path).context("create data dir")?;
    Ok(path)
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    let db_path = data_dir.join("hush.db");
    let store = crate::store::Store::open(&db_path).context("open store")?;

    store.clone().spawn_sweep(cfg.sweep_interval);

    let service = MessageService::new(store, cfg.default_expiry_hours, cfg.default_max_views);
    let state = AppState {
        service,
        admin_token: cfg.admin_token,
    };

    let cors = build_cors(cfg.cors_origins.as_deref());

    let public = Router::new()
        .route("/health", get(health))
        .route("/generate_key", get(generate_key))
        .route("/encrypt", post(encrypt_message))
        .route("/message/{message_id}", get(get_message))
        .route("/decrypt", post(decrypt_message));

    let admin = Router::new()
        .route("/admin/cleanup", post(cleanup))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    let app = Router::new()
        .merge(public)
        .merge(admin)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "hush server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_data_dir_is_created_and_returned() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("data");
        let resolved = resolve_data_dir(Some(&target)).unwrap();
        assert_eq!(resolved, target);
        assert!(target.is_dir());
    }
}
