//! Step 2: precise orbit (POEORB) retrieval for the downloaded scenes.
//!
//! The orbit fetcher matches acquisitions from the step-1 metadata CSV
//! against the ASF orbit archive; a missing CSV surfaces as a step failure
//! here, not a silent pass-through.
use super::{cfg_str, sh, ArtifactSpec, Invocation, StepContract};
use crate::config::ConfigStore;
use crate::error::StepError;
use std::path::{Path, PathBuf};

pub struct DownloadOrbits;

const NAME: &str = "step2_download_orbits";

impl StepContract for DownloadOrbits {
    fn name(&self) -> &'static str {
        NAME
    }

    fn order(&self) -> u32 {
        2
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[
            "sentinel.username",
            "sentinel.password",
            "environment.scripts_dir",
        ]
    }

    fn produces(&self, _cfg: &ConfigStore) -> Result<Vec<ArtifactSpec>, StepError> {
        Ok(vec![ArtifactSpec::NonEmptyDir(PathBuf::from("orbits"))])
    }

    fn build_invocation(
        &self,
        cfg: &ConfigStore,
        _workdir: &Path,
    ) -> Result<Invocation, StepError> {
        let username = cfg_str(cfg, NAME, "sentinel.username")?;
        let password = cfg_str(cfg, NAME, "sentinel.password")?;
        let scripts_dir = cfg_str(cfg, NAME, "environment.scripts_dir")?;

        let script = format!(
            "set -e\n\
             mkdir -p orbits\n\
             {scripts}/download_orbits.py --metadata downloaded_metadata.csv \
             --out orbits --username {user} --password {pass}\n",
            scripts = sh(&scripts_dir),
            user = sh(&username),
            pass = sh(&password),
        );
        Ok(Invocation {
            script,
            log_name: format!("{NAME}.log"),
        })
    }
}
