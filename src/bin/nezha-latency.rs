use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::fs;
use std::path::Path;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use nezha_latency::config::{AppConfig, Cli};
use nezha_latency::monitor::Monitor;
use nezha_latency::probe::NetDialer;
use nezha_latency::report::compose_block;
use nezha_latency::readme;
use nezha_latency::version::VERSION;

fn init_logging(log_dir: &str) {
    // JSON to a daily-rotated file, human-readable to stdout.
    let file_appender = rolling::daily(log_dir, "nezha-latency.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // RUST_LOG wins; `info` otherwise.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

/// Link target for the SVG as seen from the document that embeds it.
fn svg_link(svg_path: &Path, readme_path: &Path) -> String {
    let relative = readme_path
        .parent()
        .and_then(|dir| svg_path.strip_prefix(dir).ok())
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(svg_path);
    relative.to_string_lossy().replace('\\', "/")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&cli.log_dir);
    info!(version = VERSION, "Starting nezha-latency...");

    let config = match AppConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Critical error loading configuration. Exiting.");
            return Err(e.into());
        }
    };

    let monitor = Monitor::new(&config, NetDialer::new()?)?;
    let report = match monitor.run_once(Utc::now()).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Pass failed; history and document left untouched.");
            return Err(e.into());
        }
    };

    let link = match &config.output.svg_path {
        Some(svg_path) => {
            fs::write(svg_path, &report.svg)?;
            info!(path = ?svg_path, "Wrote latency chart.");
            Some(svg_link(svg_path, &config.output.readme_path))
        }
        None => None,
    };

    let block = compose_block(&report.status_table, &report.chart, link.as_deref());
    readme::update_file(&config.output.readme_path, &block)?;

    let reachable = report.results.iter().filter(|(_, l)| l.is_reachable()).count();
    info!(tick = %report.tick, reachable, total = report.results.len(), "Done.");
    Ok(())
}
