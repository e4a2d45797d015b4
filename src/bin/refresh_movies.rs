use anyhow::Result;
use film_harvest::cli::refresh_movies::{run, RefreshMoviesConfig};
use film_harvest::telemetry::{init_tracing, DEFAULT_LOG_FILTER};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    film_harvest::util::env::init_env();
    init_tracing(DEFAULT_LOG_FILTER)?;
    film_harvest::util::env::bootstrap_cli("refresh_movies");

    let report = run(RefreshMoviesConfig::default()).await?;
    let written: u64 = report.phases.iter().map(|p| p.writes.written()).sum();
    info!(
        phases = report.phases.len(),
        skipped_phases = report.skipped.len(),
        written,
        "refresh finished"
    );
    Ok(())
}
