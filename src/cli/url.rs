use anyhow::{bail, Result};

use crate::cli::config::{Config, CONFIG_FILENAME};

/// Aggregator address with the scheme hint stripped off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `host[:port]`
    pub address: String,
    /// `Some(true)` for https/wss, `Some(false)` for http/ws, `None` when bare.
    pub secure: Option<bool>,
}

/// Resolve the endpoint from an explicit flag or the config file.
pub fn resolve_endpoint(explicit: Option<&str>, config: Option<&Config>) -> Result<Endpoint> {
    if let Some(raw) = explicit {
        return parse_endpoint(raw);
    }

    if let Some(raw) = config.and_then(|c| c.endpoint.as_deref()) {
        return parse_endpoint(raw);
    }

    bail!(
        "No --endpoint provided and no endpoint in {}.\n\n\
        Either:\n  \
        1. Provide --endpoint logs.example.com:4443 (or set LOGTAIL_ENDPOINT)\n  \
        2. Run 'logtail init --endpoint ...' to write a config file",
        CONFIG_FILENAME
    )
}

/// Accept `host:port` or a URL with an http(s)/ws(s) scheme.
pub fn parse_endpoint(raw: &str) -> Result<Endpoint> {
    let trimmed = raw.trim();

    let (rest, secure) = if let Some(rest) = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("wss://"))
    {
        (rest, Some(true))
    } else if let Some(rest) = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("ws://"))
    {
        (rest, Some(false))
    } else {
        (trimmed, None)
    };
    let address = rest.trim_end_matches('/');

    if address.is_empty() {
        bail!("Endpoint '{}' has no host", raw);
    }
    if address.contains("://") {
        bail!("Unsupported scheme in endpoint '{}'", raw);
    }

    Ok(Endpoint {
        address: address.to_string(),
        secure,
    })
}
