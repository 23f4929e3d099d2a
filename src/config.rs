//! Round-trip configuration store.
//!
//! The pipeline is driven by a single TOML document addressed with dotted
//! keys (`sentinel.start_date`, `steps.step3_dem_creation`). Edits go through
//! `toml_edit` so comments, quoting, and ordering of everything the
//! orchestrator does not touch survive a `set` byte-for-byte.
use crate::error::ConfigError;
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use toml_edit::{Array, DocumentMut, Item, Table, Value};

/// Default configuration written by `config init`. Comments are part of the
/// template and survive later edits.
pub const DEFAULT_CONFIG: &str = r#"# SBAS deformation pipeline configuration.
# Edited in place by `sbas config set`; unrelated content is preserved.

project_name = "SBAS_SAT4GAIA"
working_dir = "./"

# Per-step enable flags. Disabled steps are skipped unconditionally.
[steps]
step1_download_sentinel = true
step2_download_orbits = true
step3_dem_creation = true
step4_stack_interferograms = true
step5_run_stack = true
step6_run_mintpy = true

[sentinel]
# AOI as "lon1,lat1,lon2,lat2" (WKT polygons are accepted verbatim).
aoi = "24.07,35.37,24.22,35.27"
orbit = "DESCENDING"
start_date = "20250101"
end_date = "20250301"
# Optional relative-orbit (path) and frame filters; empty means unfiltered.
path = ""
frame_id = ""
username = "EARTHDATA_username"
password = "EARTHDATA_password"

[dem]
# dem.py bbox: "S N W E" in whole degrees.
bbox = "34 36 23 27"
output_dir = "DEM"

[stack]
bbox = [34.56, 35.89, 23.0, 26.68]
reference_date = "20250112"
aux_cal_path = "/home/sbas/aux_cal"
# Optional extra stackSentinel config file; empty means none.
config = ""
extra_args = ""

[mintpy]
reference_lalo = [35.5, 24.02]

[logging]
log_dir = "logs"
log_level = "INFO"

[environment]
isce2_env = "base"
mintpy_env = "base"
topsStack_dir = "/opt/conda/share/isce2/topsStack"
isce_stack_dir = "/opt/conda/share/isce2"
conda_python_path = "/opt/conda/bin/python"
conda_env_path = "/opt/conda/bin"
# Discovery/download helpers shipped in the processing image (steps 1-2).
scripts_dir = "/opt/sbas/scripts"

[runtime]
resume = false
dry_run = false
# Step name to resume from when runtime.resume is true; empty means first.
start_from_step = ""
"#;

/// Keys whose values always stay strings even when they look numeric, so a
/// date like `20250101` never degrades into an integer on write.
const FORCE_STRING: &[&str] = &[
    "sentinel.aoi",
    "sentinel.orbit",
    "sentinel.start_date",
    "sentinel.end_date",
    "sentinel.path",
    "sentinel.frame_id",
    "dem.bbox",
    "dem.output_dir",
    "stack.dem_file",
    "stack.reference_date",
    "stack.aux_cal_path",
    "stack.config",
    "stack.extra_args",
    "logging.log_dir",
    "logging.log_level",
    "runtime.start_from_step",
    "environment.isce2_env",
    "environment.mintpy_env",
    "environment.topsStack_dir",
    "environment.isce_stack_dir",
    "environment.conda_python_path",
    "environment.conda_env_path",
    "environment.scripts_dir",
];

/// Declared value shape for keys with a known schema.
enum KeySchema {
    Bool,
    FloatList(usize),
    String,
    Free,
}

fn schema_for(key: &str) -> KeySchema {
    if key.starts_with("steps.") {
        return KeySchema::Bool;
    }
    match key {
        "runtime.resume" | "runtime.dry_run" => KeySchema::Bool,
        "stack.bbox" => KeySchema::FloatList(4),
        "mintpy.reference_lalo" => KeySchema::FloatList(2),
        _ if FORCE_STRING.contains(&key) => KeySchema::String,
        _ => KeySchema::Free,
    }
}

#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    doc: DocumentMut,
}

impl ConfigStore {
    /// Create `path` from the default template. Refuses to clobber an
    /// existing file unless `force` is set.
    pub fn init(path: &Path, force: bool) -> Result<ConfigStore, ConfigError> {
        if path.exists() && !force {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        let store = ConfigStore {
            path: path.to_path_buf(),
            doc: parse_document(path, DEFAULT_CONFIG)?,
        };
        store.write_out(false)?;
        Ok(store)
    }

    pub fn open(path: &Path) -> Result<ConfigStore, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(ConfigStore {
            path: path.to_path_buf(),
            doc: parse_document(path, &text)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn render(&self) -> String {
        self.doc.to_string()
    }

    fn lookup(&self, key: &str) -> Result<&Item, ConfigError> {
        let mut item: &Item = self.doc.as_item();
        for part in key.split('.') {
            item = item
                .as_table_like()
                .and_then(|table| table.get(part))
                .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;
        }
        Ok(item)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_ok()
    }

    /// Rendered value at `key` for CLI display.
    pub fn get(&self, key: &str) -> Result<String, ConfigError> {
        let item = self.lookup(key)?;
        if let Some(text) = item.as_str() {
            return Ok(text.to_string());
        }
        Ok(item.to_string().trim().to_string())
    }

    pub fn get_str(&self, key: &str) -> Result<String, ConfigError> {
        self.lookup(key)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ConfigError::MalformedValue {
                key: key.to_string(),
                reason: "expected a string".to_string(),
            })
    }

    /// String value treated as unset when missing or empty.
    pub fn get_opt_str(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.lookup(key) {
            Ok(item) => {
                let text = item.as_str().ok_or_else(|| ConfigError::MalformedValue {
                    key: key.to_string(),
                    reason: "expected a string".to_string(),
                })?;
                let text = text.trim();
                Ok((!text.is_empty()).then(|| text.to_string()))
            }
            Err(ConfigError::KeyNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Boolean flag; an absent key reads as `false` (a step that is not
    /// declared is not enabled).
    pub fn get_flag(&self, key: &str) -> Result<bool, ConfigError> {
        match self.lookup(key) {
            Ok(item) => item.as_bool().ok_or_else(|| ConfigError::MalformedValue {
                key: key.to_string(),
                reason: "expected true or false".to_string(),
            }),
            Err(ConfigError::KeyNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn get_f64_list(&self, key: &str) -> Result<Vec<f64>, ConfigError> {
        let item = self.lookup(key)?;
        let array = item
            .as_array()
            .ok_or_else(|| ConfigError::MalformedValue {
                key: key.to_string(),
                reason: "expected an array of numbers".to_string(),
            })?;
        let mut values = Vec::with_capacity(array.len());
        for entry in array.iter() {
            let number = entry
                .as_float()
                .or_else(|| entry.as_integer().map(|n| n as f64))
                .ok_or_else(|| ConfigError::MalformedValue {
                    key: key.to_string(),
                    reason: format!("non-numeric array element: {entry}"),
                })?;
            values.push(number);
        }
        Ok(values)
    }

    /// Coerce `raw` per the key's schema and stage it in the in-memory
    /// document. Nothing touches disk until `save`.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<(), ConfigError> {
        let value = coerce_value(key, raw)?;
        let parts: Vec<&str> = key.split('.').collect();
        let (leaf, branch) = parts
            .split_last()
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;
        let mut table = self.doc.as_table_mut();
        for part in branch {
            let item = table
                .entry(part)
                .or_insert_with(|| Item::Table(Table::new()));
            table = item
                .as_table_mut()
                .ok_or_else(|| ConfigError::MalformedValue {
                    key: key.to_string(),
                    reason: format!("{part} is a value, not a table"),
                })?;
        }
        table[*leaf] = Item::Value(value);
        Ok(())
    }

    pub fn set_and_save(&mut self, key: &str, raw: &str) -> Result<(), ConfigError> {
        self.set(key, raw)?;
        self.save()
    }

    /// Apply an ordered `key=value` override sequence, last write wins, and
    /// write the document once. Any failure leaves the file untouched.
    pub fn merge(&mut self, overrides: &[(String, String)]) -> Result<(), ConfigError> {
        if overrides.is_empty() {
            return Ok(());
        }
        let staged = self.doc.to_string();
        for (key, raw) in overrides {
            if let Err(err) = self.set(key, raw) {
                // Roll the staging buffer back; the template is known-valid.
                self.doc = parse_document(&self.path, &staged)?;
                return Err(err);
            }
        }
        self.save()
    }

    /// Write the document back: timestamped backup of the previous content,
    /// then temp-file-and-rename so a partial write can never land.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.write_out(true)
    }

    fn write_out(&self, backup: bool) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        if backup && self.path.exists() {
            let stamp = Local::now().format("%Y%m%d-%H%M%S");
            let backup_path = self.path.with_extension(format!("toml.bak.{stamp}"));
            fs::copy(&self.path, &backup_path)?;
        }
        let file_name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("config.toml");
        let tmp_path = self
            .path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!(".{file_name}.tmp"));
        fs::write(&tmp_path, self.doc.to_string())?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn parse_document(path: &Path, text: &str) -> Result<DocumentMut, ConfigError> {
    text.parse::<DocumentMut>()
        .map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
}

/// Parse `key=value` override syntax used by `pipeline run --set`.
pub fn parse_override(arg: &str) -> Result<(String, String), ConfigError> {
    let (key, value) = arg.split_once('=').ok_or_else(|| ConfigError::MalformedValue {
        key: arg.to_string(),
        reason: "expected key=value".to_string(),
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::MalformedValue {
            key: arg.to_string(),
            reason: "empty key".to_string(),
        });
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn coerce_value(key: &str, raw: &str) -> Result<Value, ConfigError> {
    let malformed = |reason: String| ConfigError::MalformedValue {
        key: key.to_string(),
        reason,
    };
    match schema_for(key) {
        KeySchema::Bool => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::from(true)),
            "false" => Ok(Value::from(false)),
            other => Err(malformed(format!("expected true or false, got {other:?}"))),
        },
        KeySchema::FloatList(len) => {
            // "auto" is a valid reference-point spelling downstream.
            if raw.trim().eq_ignore_ascii_case("auto") {
                return Ok(Value::from("auto"));
            }
            let numbers = parse_float_list(raw).map_err(&malformed)?;
            if numbers.len() != len {
                return Err(malformed(format!(
                    "expected {len} numeric components, got {}",
                    numbers.len()
                )));
            }
            let mut array = Array::new();
            for number in numbers {
                array.push(number);
            }
            Ok(Value::from(array))
        }
        KeySchema::String => Ok(Value::from(raw)),
        KeySchema::Free => Ok(infer_value(raw)),
    }
}

/// Accept `[a, b, c]` inline-array syntax or bare comma-separated numbers.
fn parse_float_list(raw: &str) -> Result<Vec<f64>, String> {
    let inner = raw
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim();
    if inner.is_empty() {
        return Err("empty list".to_string());
    }
    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| format!("non-numeric component: {:?}", part.trim()))
        })
        .collect()
}

/// Untyped keys: infer booleans, integers, floats, and inline arrays from
/// the literal; anything else stays a string.
fn infer_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => return Value::from(true),
        "false" => return Value::from(false),
        _ => {}
    }
    if let Ok(number) = trimmed.parse::<i64>() {
        return Value::from(number);
    }
    if let Ok(number) = trimmed.parse::<f64>() {
        return Value::from(number);
    }
    if trimmed.starts_with('[') {
        if let Ok(Value::Array(array)) = trimmed.parse::<Value>() {
            return Value::from(array);
        }
    }
    Value::from(raw)
}
