//! # Cream Server
//!
//! Reference binary: loads `config.json` (or the path given as the first
//! argument), connects the configured database and serves the demo
//! controllers until Ctrl-C.
//!
//! Set `CREAM_JWT_SECRET` to require a bearer token under `/notes`.

mod controllers;

use anyhow::Context;
use cream_core::{App, AppConfig, BearerAuthPlugin, RequestIdPlugin};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config.json";

/// Initialize JSON logging; `RUST_LOG` overrides the default filter
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cream_core=info,cream_server=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .try_init();
}

/// A missing or invalid file stops startup
fn load_config(path: &str) -> anyhow::Result<AppConfig> {
    AppConfig::load(path).with_context(|| format!("loading configuration from {path}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = load_config(&path)?;
    info!(address = %config.address(), base_path = %config.base_path, "Starting");

    let mut app = App::new()
        .config(config)
        .connect_database()
        .await
        .context("connecting database")?
        .plugin(RequestIdPlugin::new());

    if let Ok(secret) = std::env::var("CREAM_JWT_SECRET") {
        app = app.plugin(BearerAuthPlugin::new(&secret).protect("/notes"));
    }

    let server = controllers::install(app).into_server()?;
    if let Some(database) = server.dispatcher().database() {
        controllers::ensure_schema(database)
            .await
            .context("creating notes schema")?;
    }
    server.serve().await?;

    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_fails_startup() {
        let path = "/definitely/not/here/cream.json";
        let err = load_config(path).unwrap_err();
        assert!(format!("{err:#}").contains(path));
    }

    #[test]
    fn test_config_file_is_read() {
        let path = std::env::temp_dir().join(format!("cream-server-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"port": 9321}"#).unwrap();
        let config = load_config(path.to_str().unwrap());
        std::fs::remove_file(&path).ok();
        assert_eq!(config.unwrap().port, 9321);
    }
}
