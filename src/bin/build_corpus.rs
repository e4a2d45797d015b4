use anyhow::Result;
use film_harvest::cli::build_corpus::{run, BuildCorpusConfig};
use film_harvest::telemetry::{init_tracing, DEFAULT_LOG_FILTER};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    film_harvest::util::env::init_env();
    init_tracing(DEFAULT_LOG_FILTER)?;
    film_harvest::util::env::bootstrap_cli("build_corpus");

    let paths = run(BuildCorpusConfig::default()).await?;
    info!(
        training = %paths.training.display(),
        movie_list = %paths.movie_list.display(),
        "corpus written"
    );
    Ok(())
}
