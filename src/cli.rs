//! CLI argument parsing for the pipeline workflow.
//!
//! The CLI is intentionally thin: the same config/orchestrator/catalog core
//! is driven identically from an operator shell or a workflow-engine job.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sbas",
    version,
    about = "Sentinel-1 SBAS deformation pipeline orchestrator",
    after_help = "Examples:\n  sbas config init\n  sbas config set sentinel.start_date 20250115\n  sbas pipeline run --config config.toml --set runtime.resume=true\n  sbas pipeline run --config config.toml --step step4_stack_interferograms\n  sbas catalog build --collection-id LS-DF --auto-item-id --service-uid LS-DF-SB-S1 \\\n      --bbox 24.07,35.37,24.22,35.27 --asset velocity=topsStack/mintpy/geo_velocity.tif",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage the pipeline configuration document
    Config(ConfigArgs),
    /// Execute the processing step sequence
    Pipeline(PipelineArgs),
    /// Package produced artifacts as STAC metadata
    Catalog(CatalogArgs),
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Config file path
    #[arg(long, value_name = "PATH", default_value = "config.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Create the config from defaults
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
    /// Set/add a value at a dotted key (e.g. sentinel.start_date 20250115)
    Set { key: String, value: String },
    /// Print the value at a dotted key
    Get { key: String },
    /// Print the entire config
    List,
}

#[derive(Parser, Debug)]
pub struct PipelineArgs {
    #[command(subcommand)]
    pub action: PipelineCommand,
}

#[derive(Subcommand, Debug)]
pub enum PipelineCommand {
    /// Run the enabled steps in order
    Run(PipelineRunArgs),
}

#[derive(Parser, Debug)]
pub struct PipelineRunArgs {
    /// Config file path (created from defaults if absent)
    #[arg(long, value_name = "PATH", default_value = "config.toml")]
    pub config: PathBuf,

    /// Override a config value before the run (repeatable, key=value)
    #[arg(long = "set", value_name = "KV")]
    pub sets: Vec<String>,

    /// Run a single step only
    #[arg(long, value_name = "NAME")]
    pub step: Option<String>,

    /// Log invocations without executing them
    #[arg(long)]
    pub dry_run: bool,

    /// Resume from runtime.start_from_step
    #[arg(long)]
    pub resume: bool,
}

#[derive(Parser, Debug)]
pub struct CatalogArgs {
    #[command(subcommand)]
    pub action: CatalogCommand,
}

#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
    /// Build a Collection/Item/Asset tree for produced rasters
    Build(CatalogBuildArgs),
}

#[derive(Parser, Debug)]
pub struct CatalogBuildArgs {
    /// Identifier for the STAC collection
    #[arg(long, value_name = "ID")]
    pub collection_id: String,

    /// Explicit STAC item id (omit when using --auto-item-id)
    #[arg(long, value_name = "ID", conflicts_with = "auto_item_id")]
    pub item_id: Option<String>,

    /// Generate an ad-hoc item id from --service-uid and the current time
    #[arg(long, requires = "service_uid")]
    pub auto_item_id: bool,

    /// Service UID for generated item ids (e.g. LS-DF-SB-S1)
    #[arg(long, value_name = "UID")]
    pub service_uid: Option<String>,

    /// Asset declaration, repeatable: role=path or role=HDF5:"file"://dataset
    #[arg(long = "asset", value_name = "ROLE=PATH")]
    pub assets: Vec<String>,

    /// Per-asset acquisition date override, repeatable: role=YYYYMMDD
    #[arg(long = "asset-date", value_name = "ROLE=DATE")]
    pub asset_dates: Vec<String>,

    /// Item bbox as lon1,lat1,lon2,lat2
    #[arg(long, value_name = "BBOX")]
    pub bbox: String,

    /// Item start date (YYYYMMDD)
    #[arg(long, value_name = "DATE")]
    pub start_date: Option<String>,

    /// Item end date (YYYYMMDD)
    #[arg(long, value_name = "DATE")]
    pub end_date: Option<String>,

    /// Catalog root directory
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,
}
