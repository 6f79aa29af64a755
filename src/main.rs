use anyhow::{Context, bail};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::time::Instant;
use synthpop::pipeline::require_existing_marginals;
use synthpop::{ArtifactPaths, Configuration, run_batch};

#[global_allocator]
static ALLOC: snmalloc_rs::SnMalloc = snmalloc_rs::SnMalloc;

const USAGE: &str = "usage: synthpop [--config FILE] DATA_DIR STATE:PUMA [STATE:PUMA ...]";

struct Args {
    config: Option<PathBuf>,
    data_dir: PathBuf,
    runs: Vec<(String, String)>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut config = None;
    let mut positional = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(args.next().context(USAGE)?)),
            "-h" | "--help" => bail!(USAGE),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let data_dir = PathBuf::from(positional.next().context(USAGE)?);
    let runs = positional
        .map(|run| {
            run.split_once(':')
                .map(|(state, puma)| (state.to_string(), puma.to_string()))
                .with_context(|| format!("expected STATE:PUMA, got {run:?}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if runs.is_empty() {
        bail!(USAGE);
    }
    Ok(Args {
        config,
        data_dir,
        runs,
    })
}

fn load_configuration(path: Option<&Path>) -> anyhow::Result<Configuration> {
    match path {
        Some(path) => Configuration::from_file(path)
            .with_context(|| format!("failed to load configuration {}", path.display())),
        None => Ok(Configuration::default()),
    }
}

fn main() -> anyhow::Result<()> {
    // Setup logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args()?;
    let config = load_configuration(args.config.as_deref())?;
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build_global()
        .context("failed to configure worker threads")?;
    info!("{config}");

    let runs = args
        .runs
        .iter()
        .map(|(state, puma)| ArtifactPaths::new(&args.data_dir, state, puma))
        .collect::<Vec<_>>();

    let start = Instant::now();
    let outcomes = run_batch(&config, &runs, require_existing_marginals);
    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(summary) => {
                info!(
                    "{}",
                    summary
                        .stats
                        .summary(&format!("state {} PUMA {}", outcome.paths.state, outcome.paths.puma))
                );
                for geography in summary.infeasible() {
                    info!(
                        "Geography {} allocated with relative residual {:.4}",
                        geography.geography_id, geography.diagnostics.relative_residual
                    );
                }
            }
            Err(e) => {
                failed += 1;
                error!("State {} PUMA {}: {e}", outcome.paths.state, outcome.paths.puma);
            }
        }
    }
    info!("Finished {} runs in {:?}", outcomes.len(), start.elapsed());

    if failed > 0 {
        bail!("{failed} of {} runs failed", outcomes.len());
    }
    Ok(())
}
