use anyhow::{bail, Result};
use std::time::Duration;

use crate::cli::config::{try_load_config, Config};
use crate::cli::output::format_record;
use crate::cli::url::resolve_endpoint;
use crate::cli::TailArgs;
use crate::connection::{Connection, ConnectionConfig, ProxyConfig, TlsConfig};

/// Everything needed to open a connection, after flags, env and config file
/// have been merged.
#[derive(Debug)]
pub struct TailSettings {
    pub endpoint: String,
    pub tls: Option<TlsConfig>,
    pub proxy: Option<ProxyConfig>,
    pub config: ConnectionConfig,
}

/// Flags win over the config file; a URL scheme on the endpoint wins over both
/// for the TLS decision.
pub fn resolve_settings(args: &TailArgs, file: Option<&Config>) -> Result<TailSettings> {
    let endpoint = resolve_endpoint(args.endpoint.as_deref(), file)?;

    let insecure = args.insecure_skip_verify || file.is_some_and(|c| c.insecure_skip_verify);
    let wants_tls = match endpoint.secure {
        Some(secure) => secure,
        None => args.tls || insecure || file.is_some_and(|c| c.tls),
    };
    if insecure && !wants_tls {
        bail!("--insecure-skip-verify requires a TLS endpoint");
    }
    let tls = wants_tls.then(|| {
        if insecure {
            TlsConfig::insecure_skip_verify()
        } else {
            TlsConfig::native_roots()
        }
    });

    let proxy = args
        .proxy
        .clone()
        .or_else(|| file.and_then(|c| c.proxy.clone()))
        .map(ProxyConfig::new);

    let mut config = file.map(Config::connection_config).unwrap_or_default();
    if let Some(secs) = args.keepalive_secs {
        config.keepalive_interval = Duration::from_secs(secs.max(1));
    }

    Ok(TailSettings {
        endpoint: endpoint.address,
        tls,
        proxy,
        config,
    })
}

pub async fn execute_tail(args: TailArgs) -> Result<()> {
    let file = try_load_config();
    let settings = resolve_settings(&args, file.as_ref())?;

    eprintln!(
        "Connecting to {}{}...",
        settings.endpoint,
        if settings.tls.is_some() { " (tls)" } else { "" }
    );

    let connection = Connection::with_config(
        settings.endpoint,
        settings.tls,
        settings.proxy,
        settings.config,
    );
    let (mut records, mut errors) = connection.tail(&args.app_id, &args.token);

    eprintln!("Streaming logs for app '{}'...", args.app_id);
    eprintln!("Press Ctrl+C to stop.\n");

    let mut records_open = true;
    let mut errors_open = true;
    let mut terminal_error = None;

    while records_open || errors_open {
        tokio::select! {
            record = records.recv(), if records_open => match record {
                Some(record) => println!("{}", format_record(&record, args.format)?),
                None => records_open = false,
            },
            err = errors.recv(), if errors_open => match err {
                Some(err) if err.is_terminal() => {
                    eprintln!("Error: {}", err);
                    terminal_error = Some(err);
                }
                Some(err) => eprintln!("Skipping frame: {}", err),
                None => errors_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Closing connection...");
                if let Err(e) = connection.close() {
                    tracing::debug!(error = %e, "close after interrupt");
                }
            }
        }
    }

    if let Some(err) = terminal_error {
        bail!("Stream ended: {}", err);
    }

    eprintln!("Connection closed");
    Ok(())
}
