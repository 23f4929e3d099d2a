//! Step 3: DEM generation with the ISCE2 `dem.py` stitcher.
//!
//! SRTM tile access goes through Earthdata, which reads credentials from
//! `~/.netrc`; the file is written host-side before the invocation.
use super::{cfg_str, config_err, env_preamble, sh, ArtifactSpec, Invocation, StepContract};
use crate::config::ConfigStore;
use crate::error::StepError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct DemCreation;

const NAME: &str = "step3_dem_creation";

fn dem_dir(cfg: &ConfigStore) -> Result<String, StepError> {
    Ok(cfg
        .get_opt_str("dem.output_dir")
        .map_err(|err| config_err(NAME, err))?
        .unwrap_or_else(|| "DEM".to_string()))
}

fn write_netrc(username: &str, password: &str) -> Result<(), StepError> {
    let home = dirs::home_dir().ok_or_else(|| StepError::MissingInput {
        step: NAME.to_string(),
        detail: "cannot locate home directory for ~/.netrc".to_string(),
    })?;
    let netrc = home.join(".netrc");
    let content = format!(
        "machine urs.earthdata.nasa.gov\nlogin {username}\npassword {password}\n"
    );
    fs::write(&netrc, content).map_err(|source| StepError::Io {
        step: NAME.to_string(),
        source,
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&netrc, fs::Permissions::from_mode(0o600)).map_err(|source| {
            StepError::Io {
                step: NAME.to_string(),
                source,
            }
        })?;
    }
    info!("wrote {} for Earthdata access", netrc.display());
    Ok(())
}

impl StepContract for DemCreation {
    fn name(&self) -> &'static str {
        NAME
    }

    fn order(&self) -> u32 {
        3
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[
            "dem.bbox",
            "environment.topsStack_dir",
            "environment.isce_stack_dir",
        ]
    }

    fn produces(&self, cfg: &ConfigStore) -> Result<Vec<ArtifactSpec>, StepError> {
        Ok(vec![ArtifactSpec::FileWithSuffix {
            dir: PathBuf::from(dem_dir(cfg)?),
            suffix: ".dem.wgs84".to_string(),
        }])
    }

    fn prepare(&self, cfg: &ConfigStore, _workdir: &Path) -> Result<(), StepError> {
        let username = cfg.get_opt_str("sentinel.username").map_err(|e| config_err(NAME, e))?;
        let password = cfg.get_opt_str("sentinel.password").map_err(|e| config_err(NAME, e))?;
        match (username, password) {
            (Some(user), Some(pass)) => write_netrc(&user, &pass),
            _ => {
                warn!("no Earthdata credentials in config; skipping ~/.netrc");
                Ok(())
            }
        }
    }

    fn build_invocation(
        &self,
        cfg: &ConfigStore,
        _workdir: &Path,
    ) -> Result<Invocation, StepError> {
        let bbox = cfg_str(cfg, NAME, "dem.bbox")?;
        let out_dir = dem_dir(cfg)?;
        let preamble = env_preamble(cfg, NAME)?;
        let script = format!(
            "{preamble}\
             set -e\n\
             mkdir -p {dir}\n\
             cd {dir}\n\
             dem.py -a stitch -r -s 1 -c --filling --filling_value 0 --bbox {bbox}\n",
            dir = sh(&out_dir),
            // dem.py takes the bbox as four separate tokens, not one string.
            bbox = bbox,
        );
        Ok(Invocation {
            script,
            log_name: format!("{NAME}.log"),
        })
    }
}
