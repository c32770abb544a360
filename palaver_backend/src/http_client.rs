use std::time::Duration;

use anyhow::{Context, Result};

/// System proxy discovery is opt-in via `PALAVER_ENABLE_SYSTEM_PROXY`;
/// otherwise, and whenever discovery fails, the client is built with no proxy.
pub fn build_http_client_with_timeout(timeout: Option<Duration>) -> Result<reqwest::Client> {
    if system_proxy_enabled() {
        match std::panic::catch_unwind(|| attempt_build(timeout, false)) {
            Ok(Ok(client)) => return Ok(client),
            Ok(Err(error)) => tracing::warn!(
                "HTTP client with system proxy failed ({}); retrying with no_proxy",
                error
            ),
            Err(_) => tracing::warn!(
                "HTTP client system proxy discovery panicked; retrying with no_proxy"
            ),
        }
    }

    match std::panic::catch_unwind(|| attempt_build(timeout, true)) {
        Ok(result) => result.context("Failed to initialize HTTP client"),
        Err(_) => anyhow::bail!("Failed to initialize HTTP client (no_proxy build panicked)"),
    }
}

fn system_proxy_enabled() -> bool {
    std::env::var("PALAVER_ENABLE_SYSTEM_PROXY")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn attempt_build(
    timeout: Option<Duration>,
    no_proxy: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if no_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}
