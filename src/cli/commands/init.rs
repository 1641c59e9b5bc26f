use anyhow::{bail, Result};
use std::path::Path;

use crate::cli::config::{Config, CONFIG_FILENAME};
use crate::cli::url::parse_endpoint;

pub struct InitArgs {
    pub endpoint: String,
    pub tls: bool,
    pub insecure_skip_verify: bool,
    pub proxy: Option<String>,
    pub keepalive_secs: Option<u64>,
    pub force: bool,
}

pub fn execute_init(args: InitArgs) -> Result<()> {
    // Check if config already exists
    if Path::new(CONFIG_FILENAME).exists() && !args.force {
        bail!(
            "{} already exists. Use --force to overwrite.",
            CONFIG_FILENAME
        );
    }

    let endpoint = parse_endpoint(&args.endpoint)?;
    let tls = args.tls || args.insecure_skip_verify || endpoint.secure.unwrap_or(false);

    let config = Config {
        endpoint: Some(endpoint.address),
        tls,
        insecure_skip_verify: args.insecure_skip_verify,
        proxy: args.proxy,
        keepalive_secs: args.keepalive_secs,
        connect_timeout_secs: None,
    };

    config.save()?;

    eprintln!("Created {}", CONFIG_FILENAME);
    if let Some(ref endpoint) = config.endpoint {
        eprintln!("  endpoint: {}", endpoint);
    }
    eprintln!("  tls: {}", config.tls);
    if let Some(ref proxy) = config.proxy {
        eprintln!("  proxy: {}", proxy);
    }
    eprintln!();
    eprintln!("Next: logtail tail <app-id>");

    Ok(())
}
