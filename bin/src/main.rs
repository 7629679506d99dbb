#![allow(clippy::cognitive_complexity)]
use anyhow::{Context, Result, anyhow};
use prometheus::{Encoder, TextEncoder};

mod apply;
mod manifest;

use apply::{Registry, Report};
use manifest::Manifest;
use nsx_core::{
    config::{
        cli::{self, Parser},
        trace,
    },
    nsx_api::{NsxClient, Transport},
    serde_json,
    tokio::runtime::Builder,
    tracing::*,
};

fn main() -> Result<()> {
    // .env has to be loaded before parsing so its values reach the cli
    let dotenv = dotenv::dotenv();
    // parses from cli or environment var
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.nsx_log, config.log_format)?;
    debug!(?config, ?trace_config);
    if let Err(err) = dotenv {
        debug!(?err, ".env file not loaded");
    }

    // every operation runs to completion before the next starts
    let rt = Builder::new_current_thread().enable_all().build()?;
    let report = rt.block_on(start(&config))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if config.print_metrics {
        print_metrics();
    }
    match report.error {
        Some(err) => Err(anyhow!(err)),
        None => Ok(()),
    }
}

async fn start(config: &cli::Config) -> Result<Report> {
    debug!(path = %config.manifest_path.display(), "parsing manifest");
    let manifest = Manifest::parse(&config.manifest_path)?;
    info!(
        action = config.action.as_str(),
        count = manifest.resources.len(),
        dry_run = config.dry_run,
        "loaded manifest"
    );

    let client: Box<dyn Transport> = if config.dry_run {
        Box::new(apply::dry_run_manager(&manifest))
    } else {
        Box::new(NsxClient::new(config.nsx_config()).context("invalid NSX manager settings")?)
    };
    let registry = Registry::<dyn Transport>::with_defaults(config.retry_policy());
    debug!(?registry);

    Ok(apply::run(client.as_ref(), &registry, &manifest, config.action).await)
}

fn print_metrics() {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    match encoder.encode(&prometheus::gather(), &mut buf) {
        Err(err) => error!(?err, "error text encoding prometheus metrics"),
        Ok(_) => eprintln!("{}", String::from_utf8_lossy(&buf)),
    }
}
