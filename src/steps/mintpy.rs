//! Step 6: MintPy time-series inversion and velocity export.
//!
//! The MintPy config is rendered host-side into `topsStack/mintpy/`, then the
//! invocation runs `prep_isce.py`, `smallbaselineApp.py`, and `save_gdal.py`
//! to leave the geocoded velocity raster behind.
use super::{config_err, env_preamble, ArtifactSpec, Invocation, StepContract};
use crate::config::ConfigStore;
use crate::error::StepError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub struct RunMintpy;

const NAME: &str = "step6_run_mintpy";
const CONFIG_FILENAME: &str = "mintpy_config.txt";

fn reference_lalo(cfg: &ConfigStore) -> Result<String, StepError> {
    match cfg.get_f64_list("mintpy.reference_lalo") {
        Ok(lalo) if lalo.len() == 2 => Ok(format!("{},{}", lalo[0], lalo[1])),
        Ok(lalo) => Err(StepError::MissingInput {
            step: NAME.to_string(),
            detail: format!(
                "mintpy.reference_lalo must have 2 components, got {}",
                lalo.len()
            ),
        }),
        // A plain string like "auto" is allowed too.
        Err(_) => cfg
            .get_str("mintpy.reference_lalo")
            .map_err(|err| config_err(NAME, err)),
    }
}

fn render_mintpy_config(ref_lalo: &str) -> String {
    format!(
        "##-------------------------------- MintPy -----------------------------##\n\
         mintpy.load.processor        = isce\n\
         mintpy.load.metaFile         = ../reference/IW*.xml\n\
         mintpy.load.baselineDir      = ../baselines\n\
         mintpy.load.unwFile          = ../merged/interferograms/*/filt_*.unw\n\
         mintpy.load.corFile          = ../merged/interferograms/*/filt_*.cor\n\
         mintpy.load.connCompFile     = ../merged/interferograms/*/filt_*.unw.conncomp\n\
         mintpy.load.demFile          = ../merged/geom_reference/hgt.rdr\n\
         mintpy.load.lookupYFile      = ../merged/geom_reference/lat.rdr\n\
         mintpy.load.lookupXFile      = ../merged/geom_reference/lon.rdr\n\
         mintpy.load.incAngleFile     = ../merged/geom_reference/los.rdr\n\
         mintpy.load.azAngleFile      = ../merged/geom_reference/los.rdr\n\
         mintpy.load.shadowMaskFile   = ../merged/geom_reference/shadowMask.rdr\n\
         mintpy.load.waterMaskFile    = None\n\
         \n\
         mintpy.reference.lalo        = {ref_lalo}\n\
         \n\
         mintpy.unwrapError.method          = bridging\n\
         mintpy.unwrapError.waterMaskFile   = no\n\
         mintpy.unwrapError.connCompMinArea = auto\n\
         \n\
         mintpy.networkInversion.weightFunc      = auto\n\
         mintpy.networkInversion.waterMaskFile   = no\n\
         mintpy.networkInversion.maskDataset     = coherence\n\
         mintpy.networkInversion.maskThreshold   = 0.1\n\
         \n\
         mintpy.troposphericDelay.method = no\n\
         \n\
         mintpy.topographicResidual                   = auto\n\
         mintpy.topographicResidual.polyOrder         = auto\n\
         mintpy.topographicResidual.phaseVelocity     = auto\n\
         \n\
         mintpy.timeFunc.uncertaintyQuantification = auto\n\
         mintpy.timeFunc.timeSeriesCovFile         = auto\n\
         mintpy.timeFunc.bootstrapCount            = auto\n\
         \n\
         mintpy.geocode              = auto\n\
         mintpy.geocode.laloStep     = -0.000555556,0.000555556\n\
         mintpy.geocode.interpMethod = auto\n\
         mintpy.geocode.fillValue    = auto\n\
         \n\
         mintpy.save.kmz             = auto\n"
    )
}

impl StepContract for RunMintpy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn order(&self) -> u32 {
        6
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[
            "mintpy.reference_lalo",
            "environment.topsStack_dir",
            "environment.isce_stack_dir",
        ]
    }

    fn produces(&self, _cfg: &ConfigStore) -> Result<Vec<ArtifactSpec>, StepError> {
        Ok(vec![
            ArtifactSpec::File(PathBuf::from("topsStack/mintpy/geo/geo_velocity.h5")),
            ArtifactSpec::File(PathBuf::from("topsStack/mintpy/geo_velocity.tif")),
        ])
    }

    fn prepare(&self, cfg: &ConfigStore, workdir: &Path) -> Result<(), StepError> {
        let ref_lalo = reference_lalo(cfg)?;
        let mintpy_dir = workdir.join("topsStack").join("mintpy");
        fs::create_dir_all(&mintpy_dir).map_err(|source| StepError::Io {
            step: NAME.to_string(),
            source,
        })?;
        let config_path = mintpy_dir.join(CONFIG_FILENAME);
        fs::write(&config_path, render_mintpy_config(&ref_lalo)).map_err(|source| {
            StepError::Io {
                step: NAME.to_string(),
                source,
            }
        })?;
        info!("MintPy config written to {}", config_path.display());
        Ok(())
    }

    fn build_invocation(
        &self,
        cfg: &ConfigStore,
        _workdir: &Path,
    ) -> Result<Invocation, StepError> {
        let preamble = env_preamble(cfg, NAME)?;
        let script = format!(
            "{preamble}\
             set -e\n\
             echo \"=== prep_isce.py ===\"\n\
             cd topsStack\n\
             prep_isce.py -f \"./merged/interferograms/*/filt_*.unw\" -m ./reference/IW1.xml \
             -b ./baselines/ -g ./merged/geom_reference/\n\
             echo \"=== smallbaselineApp.py ===\"\n\
             cd mintpy\n\
             smallbaselineApp.py {CONFIG_FILENAME}\n\
             echo \"=== save_gdal.py ===\"\n\
             save_gdal.py geo/geo_velocity.h5 -o geo_velocity.tif\n"
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
    use tempfile::TempDir;

    #[test]
    fn prepare_renders_reference_point() {
        let dir = TempDir::new().unwrap();
        let cfg = ConfigStore::init(&dir.path().join("config.toml"), false).unwrap();
        RunMintpy.prepare(&cfg, dir.path()).unwrap();
        let rendered =
            fs::read_to_string(dir.path().join("topsStack/mintpy/mintpy_config.txt")).unwrap();
        assert!(rendered.contains("mintpy.reference.lalo        = 35.5,24.02"));
        assert!(rendered.contains("mintpy.load.processor        = isce"));
    }

    #[test]
    fn string_reference_point_is_accepted() {
        let dir = TempDir::new().unwrap();
        let mut cfg = ConfigStore::init(&dir.path().join("config.toml"), false).unwrap();
        cfg.set("mintpy.reference_lalo", "auto").unwrap();
        assert_eq!(reference_lalo(&cfg).unwrap(), "auto");
    }
}
