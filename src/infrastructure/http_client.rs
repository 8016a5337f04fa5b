// Proxy-aware HTTP client for the backend
use anyhow::{Context, Result};

/// Build the shared client, routing through `proxy` when one is configured.
pub fn build_http_client(proxy: Option<&str>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(concat!(
        env!("CARGO_PKG_NAME"),
        "/",
        env!("CARGO_PKG_VERSION")
    ));

    match proxy {
        Some(url) => {
            let proxy = reqwest::Proxy::all(url).with_context(|| format!("Invalid proxy URL {}", url))?;
            tracing::info!("Using HTTP proxy {}", url);
            builder = builder.proxy(proxy);
        }
        None => {
            builder = builder.no_proxy();
        }
    }

    builder.build().context("Failed to build HTTP client")
}
