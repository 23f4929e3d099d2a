//! The fixed step catalog for the deformation-monitoring chain.
//!
//! Each step is an opaque unit of external work: it declares the config keys
//! it reads and the artifacts it must leave on the working directory, and it
//! builds a bash invocation for the scientific toolchain (ISCE2 topsStack,
//! MintPy, and the discovery/download helpers in the processing image). The
//! orchestrator owns sequencing, skip detection, and failure handling.
use crate::config::ConfigStore;
use crate::error::{ConfigError, StepError};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

mod dem;
mod download;
mod mintpy;
mod orbits;
mod run_stack;
mod stack;

pub use dem::DemCreation;
pub use download::DownloadSentinel;
pub use mintpy::RunMintpy;
pub use orbits::DownloadOrbits;
pub use run_stack::RunStack;
pub use stack::StackInterferograms;

/// One external invocation: a bash script plus the log file it writes to.
#[derive(Debug)]
pub struct Invocation {
    pub script: String,
    pub log_name: String,
}

/// A filesystem artifact a step must leave behind, relative to the working
/// directory. Validity means present and non-empty.
#[derive(Debug, Clone)]
pub enum ArtifactSpec {
    File(PathBuf),
    NonEmptyDir(PathBuf),
    FileWithSuffix { dir: PathBuf, suffix: String },
}

impl ArtifactSpec {
    pub fn describe(&self) -> String {
        match self {
            ArtifactSpec::File(path) => path.display().to_string(),
            ArtifactSpec::NonEmptyDir(path) => format!("{}/ (non-empty)", path.display()),
            ArtifactSpec::FileWithSuffix { dir, suffix } => {
                format!("{}/*{suffix}", dir.display())
            }
        }
    }

    pub fn is_satisfied(&self, workdir: &Path) -> bool {
        match self {
            ArtifactSpec::File(path) => {
                let path = workdir.join(path);
                fs::metadata(&path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
            }
            ArtifactSpec::NonEmptyDir(path) => {
                let path = workdir.join(path);
                fs::read_dir(&path)
                    .map(|mut entries| entries.next().is_some())
                    .unwrap_or(false)
            }
            ArtifactSpec::FileWithSuffix { dir, suffix } => {
                find_with_suffix(&workdir.join(dir), suffix).is_some()
            }
        }
    }
}

/// First non-empty file under `dir` whose name ends with `suffix`.
pub fn find_with_suffix(dir: &Path, suffix: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(suffix))
                && fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

/// Contract every pipeline step implements.
pub trait StepContract {
    fn name(&self) -> &'static str;

    /// Position in the fixed sequence; total order, no cycles.
    fn order(&self) -> u32;

    /// Config key controlling whether this step runs.
    fn enabled_key(&self) -> String {
        format!("steps.{}", self.name())
    }

    /// Config keys the step reads; checked before invocation.
    fn required_inputs(&self) -> &'static [&'static str];

    /// Artifacts whose valid presence permits skipping the step.
    fn produces(&self, cfg: &ConfigStore) -> Result<Vec<ArtifactSpec>, StepError>;

    /// Host-side preparation (credential files, rendered tool configs).
    fn prepare(&self, _cfg: &ConfigStore, _workdir: &Path) -> Result<(), StepError> {
        Ok(())
    }

    fn build_invocation(
        &self,
        cfg: &ConfigStore,
        workdir: &Path,
    ) -> Result<Invocation, StepError>;
}

/// The full ordered catalog, constructed once per process.
pub fn registry() -> Vec<Box<dyn StepContract>> {
    vec![
        Box::new(DownloadSentinel),
        Box::new(DownloadOrbits),
        Box::new(DemCreation),
        Box::new(StackInterferograms),
        Box::new(RunStack),
        Box::new(RunMintpy),
    ]
}

pub(crate) fn config_err(step: &str, source: ConfigError) -> StepError {
    StepError::Config {
        step: step.to_string(),
        source,
    }
}

pub(crate) fn cfg_str(cfg: &ConfigStore, step: &str, key: &str) -> Result<String, StepError> {
    cfg.get_str(key).map_err(|err| config_err(step, err))
}

/// Quote a value for interpolation into a bash script.
pub(crate) fn sh(value: &str) -> String {
    shell_words::quote(value).into_owned()
}

/// `20250101` -> `2025-01-01`, rejecting anything that is not a real date.
pub(crate) fn compact_date_to_iso(step: &str, key: &str, raw: &str) -> Result<String, StepError> {
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .map(|date| date.format("%Y-%m-%d").to_string())
        .map_err(|_| StepError::MissingInput {
            step: step.to_string(),
            detail: format!("{key} must be YYYYMMDD, got {raw:?}"),
        })
}

/// Shared environment preamble for toolchain invocations: puts topsStack and
/// the ISCE2 applications on PATH/PYTHONPATH the way the processing image
/// expects.
pub(crate) fn env_preamble(cfg: &ConfigStore, step: &str) -> Result<String, StepError> {
    let tops_dir = cfg_str(cfg, step, "environment.topsStack_dir")?;
    let isce_dir = cfg_str(cfg, step, "environment.isce_stack_dir")?;
    let tops_parent = Path::new(&tops_dir)
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    Ok(format!(
        "source ~/.bashrc\n\
         export PATH=$PATH:{tops}\n\
         export ISCE_STACK={isce}\n\
         export PYTHONPATH=$PYTHONPATH:{parent}:$ISCE_STACK\n",
        tops = sh(&tops_dir),
        isce = sh(&isce_dir),
        parent = sh(&tops_parent),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn registry_is_ordered_and_unique() {
        let steps = registry();
        let orders: Vec<u32> = steps.iter().map(|s| s.order()).collect();
        let mut sorted = orders.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(orders, sorted, "step orders must be strictly ascending");

        let names: Vec<&str> = steps.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "step1_download_sentinel",
                "step2_download_orbits",
                "step3_dem_creation",
                "step4_stack_interferograms",
                "step5_run_stack",
                "step6_run_mintpy",
            ]
        );
    }

    #[test]
    fn artifact_checks_require_non_empty() {
        let dir = TempDir::new().unwrap();
        let spec = ArtifactSpec::File(PathBuf::from("out.csv"));
        assert!(!spec.is_satisfied(dir.path()));
        fs::write(dir.path().join("out.csv"), "").unwrap();
        assert!(!spec.is_satisfied(dir.path()));
        fs::write(dir.path().join("out.csv"), "id,title\n").unwrap();
        assert!(spec.is_satisfied(dir.path()));

        let spec = ArtifactSpec::NonEmptyDir(PathBuf::from("SLC"));
        assert!(!spec.is_satisfied(dir.path()));
        fs::create_dir(dir.path().join("SLC")).unwrap();
        assert!(!spec.is_satisfied(dir.path()));
        fs::write(dir.path().join("SLC/scene.zip"), "x").unwrap();
        assert!(spec.is_satisfied(dir.path()));
    }

    #[test]
    fn suffix_lookup_finds_dem() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("DEM")).unwrap();
        fs::write(dir.path().join("DEM/demLat_N34_N36.dem.wgs84"), "dem").unwrap();
        fs::write(dir.path().join("DEM/demLat_N34_N36.dem.wgs84.xml"), "meta").unwrap();
        let found = find_with_suffix(&dir.path().join("DEM"), ".dem.wgs84").unwrap();
        assert!(found.to_string_lossy().ends_with(".dem.wgs84"));
    }

    #[test]
    fn compact_date_conversion() {
        assert_eq!(
            compact_date_to_iso("s", "k", "20250115").unwrap(),
            "2025-01-15"
        );
        assert!(compact_date_to_iso("s", "k", "2025-01-15").is_err());
        assert!(compact_date_to_iso("s", "k", "20251301").is_err());
    }
}
