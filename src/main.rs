use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

mod catalog;
mod cli;
mod config;
mod error;
mod pipeline;
mod steps;

use catalog::{AssetDecl, Bbox, CatalogBuilder, TemporalRange};
use cli::{
    CatalogBuildArgs, CatalogCommand, Command, ConfigAction, PipelineCommand, PipelineRunArgs,
    RootArgs,
};
use config::ConfigStore;
use pipeline::{Orchestrator, RunOptions, StepStatus};

fn main() -> Result<()> {
    let args = RootArgs::parse();
    match args.command {
        Command::Config(args) => {
            init_tracing("info");
            run_config(&args.config, args.action)
        }
        Command::Pipeline(args) => match args.action {
            PipelineCommand::Run(args) => run_pipeline(args),
        },
        Command::Catalog(args) => match args.action {
            CatalogCommand::Build(args) => {
                init_tracing("info");
                run_catalog(args)
            }
        },
    }
}

/// RUST_LOG wins; otherwise fall back to the given default level.
fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_config(path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let store = ConfigStore::init(path, force)?;
            println!("wrote {}", store.path().display());
        }
        ConfigAction::Set { key, value } => {
            let mut store = ConfigStore::open(path)
                .with_context(|| format!("open {}", path.display()))?;
            store.set_and_save(&key, &value)?;
            println!("set {key} = {value}");
        }
        ConfigAction::Get { key } => {
            let store = ConfigStore::open(path)
                .with_context(|| format!("open {}", path.display()))?;
            println!("{}", store.get(&key)?);
        }
        ConfigAction::List => {
            let store = ConfigStore::open(path)
                .with_context(|| format!("open {}", path.display()))?;
            print!("{}", store.render());
        }
    }
    Ok(())
}

fn run_pipeline(args: PipelineRunArgs) -> Result<()> {
    // Auto-create a default config on first use, the way a fresh workflow
    // job starts from a clean volume.
    let mut store = if args.config.exists() {
        ConfigStore::open(&args.config)
            .with_context(|| format!("open {}", args.config.display()))?
    } else {
        ConfigStore::init(&args.config, false)?
    };

    let overrides = args
        .sets
        .iter()
        .map(|raw| config::parse_override(raw))
        .collect::<Result<Vec<_>, _>>()?;
    store.merge(&overrides)?;

    let level = store
        .get_opt_str("logging.log_level")?
        .unwrap_or_else(|| "INFO".to_string());
    init_tracing(&level.to_lowercase());

    which::which("bash").context("bash is required to invoke pipeline steps")?;

    let workdir = resolve_workdir(&store)?;
    std::fs::create_dir_all(&workdir)
        .with_context(|| format!("create working dir {}", workdir.display()))?;

    let cancel = pipeline::install_cancel_handler();
    let orchestrator = Orchestrator::new(&store, &workdir).with_cancel_flag(cancel);
    let opts = RunOptions {
        only_step: args.step,
        dry_run: args.dry_run,
        resume: args.resume,
    };
    let record = orchestrator.run(&opts)?;

    write_run_record(&store, &workdir, &record)?;
    for step in &record.steps {
        let status = match step.status {
            StepStatus::Skipped => "skipped",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "FAILED",
            StepStatus::NotAttempted => "not attempted",
        };
        println!("{:<28} {}", step.name, status);
    }
    if let Some(failed) = record.failed_step() {
        bail!(
            "pipeline failed at {}: {}",
            failed.name,
            failed.detail.as_deref().unwrap_or("no detail")
        );
    }
    Ok(())
}

fn resolve_workdir(store: &ConfigStore) -> Result<PathBuf> {
    let configured = store
        .get_opt_str("working_dir")?
        .unwrap_or_else(|| "./".to_string());
    Ok(PathBuf::from(configured))
}

fn write_run_record(
    store: &ConfigStore,
    workdir: &Path,
    record: &pipeline::RunRecord,
) -> Result<()> {
    let log_dir = workdir.join(
        store
            .get_opt_str("logging.log_dir")?
            .unwrap_or_else(|| "logs".to_string()),
    );
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("create {}", log_dir.display()))?;
    let path = log_dir.join("run_record.json");
    let bytes = serde_json::to_vec_pretty(record).context("serialize run record")?;
    std::fs::write(&path, bytes).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn run_catalog(args: CatalogBuildArgs) -> Result<()> {
    let item_id = if args.auto_item_id {
        let service_uid = args
            .service_uid
            .as_deref()
            .ok_or_else(|| anyhow!("--service-uid is required with --auto-item-id"))?;
        catalog::auto_item_id(service_uid)
    } else {
        args.item_id
            .clone()
            .ok_or_else(|| anyhow!("either --item-id or --auto-item-id is required"))?
    };

    let bbox = Bbox::parse(&args.bbox)?;
    let temporal = TemporalRange {
        start: args
            .start_date
            .as_deref()
            .map(catalog::parse_compact_date)
            .transpose()?,
        end: args
            .end_date
            .as_deref()
            .map(catalog::parse_compact_date)
            .transpose()?,
    };

    let mut assets: Vec<AssetDecl> = args
        .assets
        .iter()
        .map(|raw| catalog::parse_asset_arg(raw))
        .collect::<Result<_, _>>()?;
    if assets.is_empty() {
        bail!("at least one --asset role=path is required");
    }
    for raw in &args.asset_dates {
        let (role, date) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("--asset-date expects role=YYYYMMDD, got {raw:?}"))?;
        let date = catalog::parse_compact_date(date.trim())?;
        let decl = assets
            .iter_mut()
            .find(|decl| decl.role == role.trim())
            .ok_or_else(|| anyhow!("--asset-date names undeclared asset role {role:?}"))?;
        decl.date = Some(date);
    }

    let builder = CatalogBuilder::new(&args.output_dir, &args.collection_id);
    let built = builder.build(&item_id, bbox, temporal, &assets)?;
    println!("wrote {}", built.item_path.display());
    println!("wrote {}", built.collection_path.display());
    Ok(())
}
