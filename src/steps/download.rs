//! Step 1: Sentinel-1 SLC discovery and download.
//!
//! Product discovery and the actual HTTPS transfers live in the
//! `download_slc.py` helper shipped with the processing image; this step only
//! resolves the search window from config and hands it over.
use super::{cfg_str, compact_date_to_iso, config_err, sh, ArtifactSpec, Invocation, StepContract};
use crate::catalog::Bbox;
use crate::config::ConfigStore;
use crate::error::StepError;
use std::path::{Path, PathBuf};

pub struct DownloadSentinel;

const NAME: &str = "step1_download_sentinel";

/// AOI config values are either a 4-component bbox string or verbatim WKT.
fn aoi_to_wkt(aoi: &str) -> Result<String, StepError> {
    let trimmed = aoi.trim();
    if trimmed.to_ascii_uppercase().starts_with("POLYGON") {
        return Ok(trimmed.to_string());
    }
    let bbox = Bbox::parse(trimmed).map_err(|err| StepError::MissingInput {
        step: NAME.to_string(),
        detail: format!("sentinel.aoi: {err}"),
    })?;
    Ok(bbox.to_wkt_polygon())
}

impl StepContract for DownloadSentinel {
    fn name(&self) -> &'static str {
        NAME
    }

    fn order(&self) -> u32 {
        1
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        &[
            "sentinel.aoi",
            "sentinel.orbit",
            "sentinel.start_date",
            "sentinel.end_date",
            "sentinel.username",
            "sentinel.password",
            "environment.scripts_dir",
        ]
    }

    fn produces(&self, _cfg: &ConfigStore) -> Result<Vec<ArtifactSpec>, StepError> {
        Ok(vec![
            ArtifactSpec::NonEmptyDir(PathBuf::from("SLC")),
            ArtifactSpec::File(PathBuf::from("downloaded_metadata.csv")),
        ])
    }

    fn build_invocation(
        &self,
        cfg: &ConfigStore,
        _workdir: &Path,
    ) -> Result<Invocation, StepError> {
        let wkt = aoi_to_wkt(&cfg_str(cfg, NAME, "sentinel.aoi")?)?;
        let start = compact_date_to_iso(
            NAME,
            "sentinel.start_date",
            &cfg_str(cfg, NAME, "sentinel.start_date")?,
        )?;
        let end = compact_date_to_iso(
            NAME,
            "sentinel.end_date",
            &cfg_str(cfg, NAME, "sentinel.end_date")?,
        )?;
        let orbit = cfg_str(cfg, NAME, "sentinel.orbit")?;
        let username = cfg_str(cfg, NAME, "sentinel.username")?;
        let password = cfg_str(cfg, NAME, "sentinel.password")?;
        let scripts_dir = cfg_str(cfg, NAME, "environment.scripts_dir")?;

        let mut command = format!(
            "{scripts}/download_slc.py --aoi {aoi} --start {start} --end {end} \
             --orbit-direction {orbit} --out SLC --metadata downloaded_metadata.csv \
             --username {user} --password {pass}",
            scripts = sh(&scripts_dir),
            aoi = sh(&wkt),
            start = sh(&start),
            end = sh(&end),
            orbit = sh(&orbit),
            user = sh(&username),
            pass = sh(&password),
        );
        let path_filter = cfg
            .get_opt_str("sentinel.path")
            .map_err(|err| config_err(NAME, err))?;
        if let Some(path) = path_filter {
            command.push_str(&format!(" --relative-orbit {}", sh(&path)));
        }
        let frame_filter = cfg
            .get_opt_str("sentinel.frame_id")
            .map_err(|err| config_err(NAME, err))?;
        if let Some(frame) = frame_filter {
            command.push_str(&format!(" --frame {}", sh(&frame)));
        }

        Ok(Invocation {
            script: format!("set -e\nmkdir -p SLC\n{command}\n"),
            log_name: format!("{NAME}.log"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn bbox_aoi_becomes_polygon() {
        let wkt = aoi_to_wkt("24.07,35.37,24.22,35.27").unwrap();
        assert!(wkt.starts_with("POLYGON(("));
        assert!(wkt.contains("24.07"));
    }

    #[test]
    fn wkt_aoi_passes_through() {
        let wkt = "POLYGON((24 35, 25 35, 25 36, 24 36, 24 35))";
        assert_eq!(aoi_to_wkt(wkt).unwrap(), wkt);
    }

    #[test]
    fn invocation_carries_search_window() {
        let dir = TempDir::new().unwrap();
        let cfg = ConfigStore::init(&dir.path().join("config.toml"), false).unwrap();
        let invocation = DownloadSentinel
            .build_invocation(&cfg, dir.path())
            .unwrap();
        assert!(invocation.script.contains("download_slc.py"));
        assert!(invocation.script.contains("--start 2025-01-01"));
        assert!(invocation.script.contains("--orbit-direction DESCENDING"));
    }
}
