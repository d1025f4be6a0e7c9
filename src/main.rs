use std::sync::Arc;
use std::thread;

use color_eyre::{
    Result,
    eyre::{WrapErr, eyre},
};
use log::info;
use strum::VariantArray;
use tracing_subscriber::EnvFilter;

mod config;
mod diff;
mod error;
mod http;
mod monitor;
mod scraper;
mod storage;
mod webhook;

use config::Config;
use http::HttpClient;
use monitor::Monitor;
use scraper::Category;
use storage::KnownProducts;

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Initializing...");
    let config = Config::load().wrap_err("failed to load config")?;
    let client = HttpClient::new(&config).wrap_err("failed to build http client")?;
    let known = KnownProducts::load(&config.products_file);
    let monitor = Monitor::new(&config, Arc::new(client), known, Category::VARIANTS.to_vec());

    let poller = thread::Builder::new()
        .name("poll-loop".into())
        .spawn(move || monitor.run())?;
    match poller.join() {
        Ok(Ok(never)) => match never {},
        Ok(Err(e)) => Err(e).wrap_err("monitor stopped"),
        Err(_) => Err(eyre!("poll loop panicked")),
    }
}
