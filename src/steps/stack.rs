//! Step 4: interferogram stack setup with `stackSentinel.py`.
use super::{
    cfg_str, config_err, env_preamble, find_with_suffix, sh, ArtifactSpec, Invocation,
    StepContract,
};
use crate::config::ConfigStore;
use crate::error::StepError;
use std::path::{Path, PathBuf};

pub struct StackInterferograms;

const NAME: &str = "step4_stack_interferograms";

/// The stack setup reads the DEM produced by step 3; exactly which tile file
/// came out depends on the bbox, so it is located at invocation time.
fn find_dem(workdir: &Path) -> Result<String, StepError> {
    let dem = find_with_suffix(&workdir.join("DEM"), ".dem.wgs84").ok_or_else(|| {
        StepError::MissingInput {
            step: NAME.to_string(),
            detail: "no .dem.wgs84 file in DEM/ (did step3_dem_creation run?)".to_string(),
        }
    })?;
    dem.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| StepError::MissingInput {
            step: NAME.to_string(),
            detail: format!("DEM file name is not valid UTF-8: {}", dem.display()),
        })
}

impl StepContract for StackInterferograms {
    fn name(&self) -> &'static str {
        NAME
    }

    fn order(&self) -> u32 {
        4
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[
            "stack.bbox",
            "stack.reference_date",
            "stack.aux_cal_path",
            "environment.topsStack_dir",
            "environment.isce_stack_dir",
        ]
    }

    fn produces(&self, _cfg: &ConfigStore) -> Result<Vec<ArtifactSpec>, StepError> {
        Ok(vec![ArtifactSpec::NonEmptyDir(PathBuf::from(
            "topsStack/run_files",
        ))])
    }

    fn build_invocation(
        &self,
        cfg: &ConfigStore,
        workdir: &Path,
    ) -> Result<Invocation, StepError> {
        let bbox = cfg
            .get_f64_list("stack.bbox")
            .map_err(|err| config_err(NAME, err))?;
        if bbox.len() != 4 {
            return Err(StepError::MissingInput {
                step: NAME.to_string(),
                detail: format!("stack.bbox must have 4 components, got {}", bbox.len()),
            });
        }
        let bbox = bbox
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let dem = find_dem(workdir)?;
        let reference_date = cfg_str(cfg, NAME, "stack.reference_date")?;
        let aux_cal = cfg_str(cfg, NAME, "stack.aux_cal_path")?;
        let preamble = env_preamble(cfg, NAME)?;

        let mut command = format!(
            "stackSentinel.py --bbox '{bbox}' --dem ../DEM/{dem} --swath_num '1 2 3' \
             --reference_date {rdate} --coregistration geometry -W interferogram \
             --num_connections 3 --azimuth_looks 5 --range_looks 15 \
             -s ../SLC -a {aux} -o ../orbits",
            dem = sh(&dem),
            rdate = sh(&reference_date),
            aux = sh(&aux_cal),
        );
        let tops_cfg = cfg
            .get_opt_str("stack.config")
            .map_err(|err| config_err(NAME, err))?;
        if let Some(tops_cfg) = tops_cfg {
            command.push_str(&format!(" --config ../{}", sh(&tops_cfg)));
        }
        let extra = cfg
            .get_opt_str("stack.extra_args")
            .map_err(|err| config_err(NAME, err))?;
        if let Some(extra) = extra {
            let words = shell_words::split(&extra).map_err(|err| StepError::MissingInput {
                step: NAME.to_string(),
                detail: format!("stack.extra_args does not split as shell words: {err}"),
            })?;
            for word in words {
                command.push(' ');
                command.push_str(&sh(&word));
            }
        }

        let script = format!(
            "{preamble}\
             set -e\n\
             mkdir -p topsStack\n\
             cd topsStack\n\
             {command}\n"
        );
        Ok(Invocation {
            script,
            log_name: format!("{NAME}.log"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn workdir_with_dem() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("DEM")).unwrap();
        fs::write(dir.path().join("DEM/demLat_N34_N36.dem.wgs84"), "dem").unwrap();
        dir
    }

    #[test]
    fn invocation_references_found_dem() {
        let dir = workdir_with_dem();
        let cfg = ConfigStore::init(&dir.path().join("config.toml"), false).unwrap();
        let invocation = StackInterferograms
            .build_invocation(&cfg, dir.path())
            .unwrap();
        assert!(invocation
            .script
            .contains("--dem ../DEM/demLat_N34_N36.dem.wgs84"));
        assert!(invocation.script.contains("--reference_date 20250112"));
        assert!(invocation.script.contains("--bbox '34.56 35.89 23 26.68'"));
    }

    #[test]
    fn missing_dem_is_a_missing_input() {
        let dir = TempDir::new().unwrap();
        let cfg = ConfigStore::init(&dir.path().join("config.toml"), false).unwrap();
        let err = StackInterferograms
            .build_invocation(&cfg, dir.path())
            .unwrap_err();
        assert!(matches!(err, StepError::MissingInput { .. }));
    }

    #[test]
    fn extra_args_are_split_and_appended() {
        let dir = workdir_with_dem();
        let mut cfg = ConfigStore::init(&dir.path().join("config.toml"), false).unwrap();
        cfg.set("stack.extra_args", "--useGPU --text_cmd 'source env'")
            .unwrap();
        let invocation = StackInterferograms
            .build_invocation(&cfg, dir.path())
            .unwrap();
        assert!(invocation.script.contains("--useGPU"));
        assert!(invocation.script.contains("'source env'"));
    }
}
