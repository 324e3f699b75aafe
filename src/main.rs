//! kitten - binary RPC server
//!
//! Accepts `CONNECT` upgrades on plain TCP and serves kitten frames.

use bytes::Bytes;
use kitten_protocol::Message;
use kitten_server::{Config, Router, Server, ServerConfig, ServerError};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

/// Builds the router with the methods every kitten server answers.
fn builtin_router() -> Router {
    let mut router = Router::new();
    router
        .register("Kitten.Echo", |request: &Message| Ok(request.payload.clone()))
        .register("Kitten.Time", |_: &Message| {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| ServerError::Handler(e.to_string()))?;
            let body = serde_json::json!({
                "unix_secs": now.as_secs(),
                "unix_millis": now.as_millis() as u64,
            });
            serde_json::to_vec(&body)
                .map(Bytes::from)
                .map_err(|e| ServerError::Handler(e.to_string()))
        });

    let mut methods: Vec<String> = router.methods().iter().map(|m| m.to_string()).collect();
    methods.push("Kitten.Methods".to_string());
    methods.sort();
    router.register("Kitten.Methods", move |_: &Message| {
        serde_json::to_vec(&methods)
            .map(Bytes::from)
            .map_err(|e| ServerError::Handler(e.to_string()))
    });

    router
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if KITTEN_CONFIG is set, then env overrides)
    let config_path = std::env::var("KITTEN_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // An explicitly named config file must load
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::warn!("Invalid environment configuration ({}), using defaults", e);
            Config::default()
        }
    };

    tracing::info!("Starting kitten server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  RPC path: {}", config.rpc.rpc_path);
    tracing::info!("  Debug path: {}", config.rpc.debug_path);
    tracing::info!(
        "  Frame limits: metadata {} bytes, payload {} bytes",
        config.rpc.max_metadata_size,
        config.rpc.max_payload_size
    );

    let router = builtin_router();
    tracing::info!("  Methods: {}", router.methods().join(", "));

    let server = Arc::new(Server::new(ServerConfig::from(&config), router));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitten_server::RequestHandler;
    use kitten_protocol::METHOD_KEY;

    fn call(method: &str) -> Message {
        Message::request(1)
            .with_meta(METHOD_KEY, method)
            .with_payload(&b"meow"[..])
    }

    #[test]
    fn test_echo() {
        let router = builtin_router();
        assert_eq!(router.handle(&call("Kitten.Echo")).unwrap(), &b"meow"[..]);
    }

    #[test]
    fn test_time_is_json() {
        let router = builtin_router();
        let body = router.handle(&call("Kitten.Time")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(value["unix_secs"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_methods_lists_builtins() {
        let router = builtin_router();
        let body = router.handle(&call("Kitten.Methods")).unwrap();
        let methods: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert_eq!(methods, vec!["Kitten.Echo", "Kitten.Methods", "Kitten.Time"]);
        assert_eq!(router.methods(), vec!["Kitten.Echo", "Kitten.Methods", "Kitten.Time"]);
    }
}
