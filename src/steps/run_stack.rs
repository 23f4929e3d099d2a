//! Step 5: execute the generated topsStack run files in order.
//!
//! `stackSentinel.py` emits eleven `run_*` job files; each one is driven by
//! the topsStack `run.py` wrapper and logged to its own file so a failure in
//! one stage points straight at the right log.
use super::{cfg_str, env_preamble, sh, ArtifactSpec, Invocation, StepContract};
use crate::config::ConfigStore;
use crate::error::StepError;
use std::path::{Path, PathBuf};

pub struct RunStack;

const NAME: &str = "step5_run_stack";

pub const RUN_FILES: &[&str] = &[
    "run_01_unpack_topo_reference",
    "run_02_unpack_secondary_slc",
    "run_03_average_baseline",
    "run_04_fullBurst_geo2rdr",
    "run_05_fullBurst_resample",
    "run_06_extract_stack_valid_region",
    "run_07_merge_reference_secondary_slc",
    "run_08_generate_burst_igram",
    "run_09_merge_burst_igram",
    "run_10_filter_coherence",
    "run_11_unwrap",
];

impl StepContract for RunStack {
    fn name(&self) -> &'static str {
        NAME
    }

    fn order(&self) -> u32 {
        5
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[
            "environment.topsStack_dir",
            "environment.isce_stack_dir",
            "logging.log_dir",
        ]
    }

    fn produces(&self, _cfg: &ConfigStore) -> Result<Vec<ArtifactSpec>, StepError> {
        Ok(vec![ArtifactSpec::NonEmptyDir(PathBuf::from(
            "topsStack/merged/interferograms",
        ))])
    }

    fn build_invocation(
        &self,
        cfg: &ConfigStore,
        _workdir: &Path,
    ) -> Result<Invocation, StepError> {
        let tops_dir = cfg_str(cfg, NAME, "environment.topsStack_dir")?;
        let log_dir = cfg_str(cfg, NAME, "logging.log_dir")?;
        let preamble = env_preamble(cfg, NAME)?;

        let mut script = format!(
            "{preamble}\
             set -e\n\
             mkdir -p {logs}\n",
            logs = sh(&log_dir),
        );
        for run_file in RUN_FILES {
            script.push_str(&format!(
                "echo \"=== {run_file} ===\"\n\
                 {runner}/run.py -i topsStack/run_files/{run_file} \
                 > {logs}/{run_file}.log 2>&1\n",
                runner = sh(&tops_dir),
                logs = sh(&log_dir),
            ));
        }
        Ok(Invocation {
            script,
            log_name: format!("{NAME}.log"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn script_runs_all_eleven_stages_in_order() {
        let dir = TempDir::new().unwrap();
        let cfg = ConfigStore::init(&dir.path().join("config.toml"), false).unwrap();
        let invocation = RunStack.build_invocation(&cfg, dir.path()).unwrap();
        let mut last = 0;
        for run_file in RUN_FILES {
            let pos = invocation
                .script
                .find(&format!("run_files/{run_file}"))
                .unwrap_or_else(|| panic!("missing {run_file}"));
            assert!(pos > last, "{run_file} out of order");
            last = pos;
        }
        assert!(invocation.script.contains("run_11_unwrap.log"));
    }
}
