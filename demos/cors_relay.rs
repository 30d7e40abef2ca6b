//! CORS relay example
//!
//! Serves the relay with settings from the environment:
//!
//! - `RELAY_API_KEY`: upstream credential (required for POSTs to succeed)
//! - `RELAY_PROVIDER`: `dashscope` (default), `openai`, `lmstudio`, `ollama`
//! - `RELAY_UPSTREAM_URL`, `RELAY_DEFAULT_MODEL`: override the provider defaults
//! - `RELAY_BIND`: listen address, default `127.0.0.1:8787`
//!
//! Run with `RUST_LOG=info` to see startup and forwarding logs.

use streamchat::relay::{self, RelayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = RelayConfig::from_env()?;
    println!("Relaying http://{} -> {}", config.bind, config.upstream_url);

    relay::serve(config).await?;
    Ok(())
}
