use clap::{Parser, Subcommand};
use ktforge::cache::KeytabCache;
use ktforge::config::{Config, RunPlan};
use ktforge::engine::{IdentityOutcome, MaterializeEngine};
use ktforge::provider::DerivedKeyProvider;
use std::io;
use std::path::PathBuf;
use tracing::{debug, error, info};

#[derive(Debug, clap::Parser)]
#[clap(about = "Materializes Kerberos keytab files, as instructed")]
struct OptParser {
    #[clap(subcommand)]
    command: Opt,
}

#[derive(Debug, Subcommand)]
enum Opt {
    /// Materialize every identity in the run manifest.
    Run { config: PathBuf },
}

fn main_run(config: Config) -> io::Result<()> {
    let plan = RunPlan::from(&config);

    info!(
        "materializing {} identities under {}",
        plan.records.len(),
        config.data_dir.display()
    );

    let mut engine = MaterializeEngine::new(
        config.data_dir.clone(),
        KeytabCache::new(config.cache_dir.clone()),
        plan.store,
        DerivedKeyProvider,
    );

    let report = engine
        .process_identities(&plan.records, &plan.passwords, &plan.kvnos)
        .map_err(|err| {
            error!(?err, "materialization aborted");
            io::Error::other("materialization aborted")
        })?;

    for ((principal, identity), outcome) in plan.records.iter().zip(report.outcomes.iter()) {
        match outcome {
            IdentityOutcome::Materialized => {
                info!("created keytab for {} on host {}", principal, identity.host)
            }
            IdentityOutcome::Skipped => {
                debug!("skipped keytab for {} on host {}", principal, identity.host)
            }
            IdentityOutcome::Failed { message, .. } => error!("{}", message),
        }
    }

    match report.last_failure {
        Some(message) => Err(io::Error::other(message)),
        None => Ok(()),
    }
}

fn main() -> io::Result<()> {
    let opt = OptParser::parse();

    tracing_subscriber::fmt::init();

    match opt.command {
        Opt::Run { config } => {
            let cfg = Config::parse(&config)?;
            main_run(cfg)
        }
    }
}
