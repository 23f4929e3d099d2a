//! STAC packaging of produced rasters.
//!
//! Builds a Collection/Item/Asset tree under a catalog root with a
//! deterministic layout: `<root>/<collection_id>/collection.json` and
//! `<root>/<collection_id>/items/<item_id>.json`. Repeated builds against the
//! same collection append items; the collection document is never replaced
//! wholesale.
use crate::error::CatalogError;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

const STAC_VERSION: &str = "1.0.0";
const PROCESSING_EXT: &str = "https://stac-extensions.github.io/processing/v1.2.0/schema.json";

const PROCESSING_FACILITY: &str = "AXIS-3 LAND";
const PROCESSING_LEVEL: &str = "L3";
const PROCESSING_SOFTWARE_NAME: &str = "Axis3LandSbas";
const PROCESSING_VERSION: &str = "1.1.0";

pub const MEDIA_GEOTIFF: &str = "image/tiff; application=geotiff";
pub const MEDIA_HDF5: &str = "application/x-hdf5";
pub const MEDIA_OCTET: &str = "application/octet-stream";

/// Collections this deployment publishes, with their catalog descriptions.
const KNOWN_COLLECTIONS: &[(&str, &str)] = &[
    ("LS-DF", "Deformation Monitoring"),
    ("LS-LC", "Land Use/Land Cover"),
    ("LS-UA", "Urban Analytics Services"),
    ("FS-FM", "Forest Types Mapping"),
];

pub fn collection_description(collection_id: &str) -> String {
    KNOWN_COLLECTIONS
        .iter()
        .find(|(id, _)| *id == collection_id)
        .map(|(_, description)| (*description).to_string())
        .unwrap_or_else(|| collection_id.to_string())
}

/// Geographic bounding box parsed from the 4-component AOI string.
///
/// Longitudes must come in strictly ascending order; the upstream convention
/// writes latitudes in either order, so those are normalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub lon_min: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lat_max: f64,
}

impl Bbox {
    pub fn parse(aoi: &str) -> Result<Bbox, CatalogError> {
        let invalid = |reason: String| CatalogError::InvalidGeometry {
            aoi: aoi.to_string(),
            reason,
        };
        let components: Vec<f64> = aoi
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| invalid("non-numeric component".to_string()))?;
        if components.len() != 4 {
            return Err(invalid(format!(
                "expected 4 components, got {}",
                components.len()
            )));
        }
        if components.iter().any(|v| !v.is_finite()) {
            return Err(invalid("non-finite component".to_string()));
        }
        let (lon1, lat1, lon2, lat2) =
            (components[0], components[1], components[2], components[3]);
        if lon1 >= lon2 {
            return Err(invalid(format!(
                "longitudes must be strictly ascending ({lon1} >= {lon2})"
            )));
        }
        if lat1 == lat2 {
            return Err(invalid("degenerate latitude span".to_string()));
        }
        Ok(Bbox {
            lon_min: lon1,
            lat_min: lat1.min(lat2),
            lon_max: lon2,
            lat_max: lat1.max(lat2),
        })
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.lon_min, self.lat_min, self.lon_max, self.lat_max]
    }

    /// Closed exterior ring, counter-clockwise from the south-west corner.
    pub fn ring(&self) -> Vec<[f64; 2]> {
        vec![
            [self.lon_min, self.lat_min],
            [self.lon_max, self.lat_min],
            [self.lon_max, self.lat_max],
            [self.lon_min, self.lat_max],
            [self.lon_min, self.lat_min],
        ]
    }

    pub fn to_wkt_polygon(&self) -> String {
        let ring = self
            .ring()
            .iter()
            .map(|[lon, lat]| format!("{lon} {lat}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("POLYGON(({ring}))")
    }

    fn union(&self, other: &Bbox) -> Bbox {
        Bbox {
            lon_min: self.lon_min.min(other.lon_min),
            lat_min: self.lat_min.min(other.lat_min),
            lon_max: self.lon_max.max(other.lon_max),
            lat_max: self.lat_max.max(other.lat_max),
        }
    }
}

// --- Item id conventions ---------------------------------------------------
//
// Systematic products: <SERVICE_UID>_<YYYYMMDD>
// Ad-hoc products:     <SERVICE_UID>_<YYYYMMDDTHHMMSSdmmm>
// with a literal 'd' between seconds and milliseconds.

fn adhoc_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<svc>[A-Z0-9\-]+)_(?P<ts>\d{8}T\d{6}d\d{3})$").unwrap())
}

fn systematic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<svc>[A-Z0-9\-]+)_(?P<date>\d{8})$").unwrap())
}

/// UTC timestamp in the hub validator format `YYYYMMDDTHHMMSSdmmm`.
pub fn hub_timestamp(now: DateTime<Utc>) -> String {
    let millis = now.timestamp_subsec_millis().min(999);
    format!("{}d{millis:03}", now.format("%Y%m%dT%H%M%S"))
}

/// Ad-hoc item id for on-demand products.
pub fn auto_item_id(service_uid: &str) -> String {
    format!("{service_uid}_{}", hub_timestamp(Utc::now()))
}

fn service_uid_of(item_id: &str) -> Option<&str> {
    adhoc_re()
        .captures(item_id)
        .or_else(|| systematic_re().captures(item_id))
        .and_then(|caps| caps.name("svc"))
        .map(|m| m.as_str())
}

/// Known collections take only convention-formed ids whose service UID
/// extends the collection id (e.g. `LS-DF-SB-S1` under `LS-DF`). Ids under
/// unknown collections are accepted as-is.
pub fn validate_item_id(collection_id: &str, item_id: &str) -> Result<(), CatalogError> {
    let known = KNOWN_COLLECTIONS.iter().any(|(id, _)| *id == collection_id);
    if !known {
        if item_id.is_empty() {
            return Err(CatalogError::InvalidItemId {
                collection_id: collection_id.to_string(),
                item_id: item_id.to_string(),
            });
        }
        return Ok(());
    }
    match service_uid_of(item_id) {
        Some(svc) if svc.starts_with(collection_id) => Ok(()),
        _ => Err(CatalogError::InvalidItemId {
            collection_id: collection_id.to_string(),
            item_id: item_id.to_string(),
        }),
    }
}

// --- Assets ----------------------------------------------------------------

/// One declared asset: a logical role bound to a file path or a GDAL
/// subdataset locator, with an optional acquisition date.
#[derive(Debug, Clone)]
pub struct AssetDecl {
    pub role: String,
    pub locator: String,
    pub date: Option<NaiveDate>,
}

/// Parse a `role=path` CLI declaration.
pub fn parse_asset_arg(arg: &str) -> Result<AssetDecl, CatalogError> {
    let (role, locator) = arg
        .split_once('=')
        .ok_or_else(|| CatalogError::InvalidAsset(arg.to_string()))?;
    let role = role.trim();
    let locator = locator.trim();
    if role.is_empty() || locator.is_empty() {
        return Err(CatalogError::InvalidAsset(arg.to_string()));
    }
    Ok(AssetDecl {
        role: role.to_string(),
        locator: locator.to_string(),
        date: None,
    })
}

/// GDAL subdataset locators reference a dataset inside a container file,
/// e.g. `HDF5:"topsStack/mintpy/geo/geo_velocity.h5"://velocityStd`.
pub fn is_subdataset_locator(locator: &str) -> bool {
    ((locator.contains("HDF5:\"") || locator.contains("NETCDF:\"")) && locator.contains("\"://"))
        || locator.starts_with("HDF5:")
        || locator.starts_with("NETCDF:")
}

/// Container file path inside a subdataset locator.
fn container_path(locator: &str) -> Option<&str> {
    let start = locator.find('"')? + 1;
    let end = start + locator[start..].find('"')?;
    Some(&locator[start..end])
}

fn infer_media_type(locator: &str) -> &'static str {
    if is_subdataset_locator(locator) {
        return MEDIA_HDF5;
    }
    let lower = locator.to_ascii_lowercase();
    if lower.ends_with(".tif") || lower.ends_with(".tiff") {
        MEDIA_GEOTIFF
    } else if lower.ends_with(".h5") || lower.ends_with(".hdf5") {
        MEDIA_HDF5
    } else {
        MEDIA_OCTET
    }
}

/// The on-disk file an asset locator points at, for existence checks.
fn backing_path(locator: &str) -> PathBuf {
    if is_subdataset_locator(locator) {
        if let Some(path) = container_path(locator) {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(locator)
}

// --- Records ---------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct Collection {
    #[serde(rename = "type")]
    pub kind: String,
    pub stac_version: String,
    pub id: String,
    pub description: String,
    pub license: String,
    pub extent: Extent,
    pub links: Vec<Link>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Extent {
    pub spatial: SpatialExtent,
    pub temporal: TemporalExtent,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SpatialExtent {
    pub bbox: Vec<[f64; 4]>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TemporalExtent {
    pub interval: Vec<[Option<String>; 2]>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Link {
    pub rel: String,
    pub href: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "type")]
    pub kind: String,
    pub stac_version: String,
    pub stac_extensions: Vec<String>,
    pub id: String,
    pub collection: String,
    pub geometry: Geometry,
    pub bbox: [f64; 4],
    pub properties: ItemProperties,
    pub links: Vec<Link>,
    pub assets: BTreeMap<String, Asset>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ItemProperties {
    pub datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_datetime: Option<String>,
    #[serde(rename = "processing:facility")]
    pub processing_facility: String,
    #[serde(rename = "processing:level")]
    pub processing_level: String,
    #[serde(rename = "processing:software")]
    pub processing_software: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Asset {
    pub href: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub title: String,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
}

// --- Builder ---------------------------------------------------------------

/// Item-level acquisition interval; per-asset dates widen it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

pub struct CatalogBuilder {
    output_dir: PathBuf,
    collection_id: String,
}

/// Paths written by one `build` call.
#[derive(Debug)]
pub struct BuiltItem {
    pub collection_path: PathBuf,
    pub item_path: PathBuf,
}

fn date_to_rfc3339(date: NaiveDate) -> String {
    format!("{}T00:00:00Z", date.format("%Y-%m-%d"))
}

/// Parse a compact `YYYYMMDD` date from the CLI.
pub fn parse_compact_date(raw: &str) -> Result<NaiveDate, CatalogError> {
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .map_err(|_| CatalogError::InvalidTemporalExtent(format!("expected YYYYMMDD, got {raw:?}")))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("record");
    let tmp = path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{file_name}.tmp"));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl CatalogBuilder {
    pub fn new(output_dir: &Path, collection_id: &str) -> CatalogBuilder {
        CatalogBuilder {
            output_dir: output_dir.to_path_buf(),
            collection_id: collection_id.to_string(),
        }
    }

    fn collection_path(&self) -> PathBuf {
        self.output_dir
            .join(&self.collection_id)
            .join("collection.json")
    }

    fn item_path(&self, item_id: &str) -> PathBuf {
        self.output_dir
            .join(&self.collection_id)
            .join("items")
            .join(format!("{item_id}.json"))
    }

    /// Verify every declared asset, write the Item record, and append it to
    /// the collection (creating the collection document on first use).
    pub fn build(
        &self,
        item_id: &str,
        bbox: Bbox,
        temporal: TemporalRange,
        assets: &[AssetDecl],
    ) -> Result<BuiltItem, CatalogError> {
        validate_item_id(&self.collection_id, item_id)?;

        let mut start = temporal.start;
        let mut end = temporal.end.or(temporal.start);
        let mut asset_records = BTreeMap::new();
        for decl in assets {
            let path = backing_path(&decl.locator);
            let valid = fs::metadata(&path)
                .map(|meta| meta.is_file() && meta.len() > 0)
                .unwrap_or(false);
            if !valid {
                return Err(CatalogError::MissingAsset {
                    role: decl.role.clone(),
                    path,
                });
            }
            if let Some(date) = decl.date {
                start = Some(start.map_or(date, |s| s.min(date)));
                end = Some(end.map_or(date, |e| e.max(date)));
            }
            asset_records.insert(
                decl.role.clone(),
                Asset {
                    href: decl.locator.clone(),
                    media_type: infer_media_type(&decl.locator).to_string(),
                    title: format!(
                        "{} - {} - {}",
                        collection_description(&self.collection_id),
                        self.collection_id,
                        decl.role
                    ),
                    roles: vec![decl.role.clone()],
                    datetime: decl.date.map(date_to_rfc3339),
                },
            );
        }

        let start_rfc = start.map(date_to_rfc3339);
        let end_rfc = end.map(date_to_rfc3339);
        let mut software = BTreeMap::new();
        software.insert(
            PROCESSING_SOFTWARE_NAME.to_string(),
            PROCESSING_VERSION.to_string(),
        );
        let item = Item {
            kind: "Feature".to_string(),
            stac_version: STAC_VERSION.to_string(),
            stac_extensions: vec![PROCESSING_EXT.to_string()],
            id: item_id.to_string(),
            collection: self.collection_id.clone(),
            geometry: Geometry {
                kind: "Polygon".to_string(),
                coordinates: vec![bbox.ring()],
            },
            bbox: bbox.as_array(),
            properties: ItemProperties {
                datetime: start_rfc.clone(),
                start_datetime: start_rfc.clone(),
                end_datetime: end_rfc.clone(),
                processing_facility: PROCESSING_FACILITY.to_string(),
                processing_level: PROCESSING_LEVEL.to_string(),
                processing_software: software,
            },
            links: vec![Link {
                rel: "collection".to_string(),
                href: "../collection.json".to_string(),
                media_type: Some("application/json".to_string()),
            }],
            assets: asset_records,
        };

        let item_path = self.item_path(item_id);
        write_json_atomic(&item_path, &item)?;

        let collection_path = self.collection_path();
        let mut collection = self.load_or_create_collection(&collection_path)?;
        self.append_item(&mut collection, item_id, bbox, &start_rfc, &end_rfc);
        write_json_atomic(&collection_path, &collection)?;
        info!(
            "catalog item {} written under collection {}",
            item_id, self.collection_id
        );

        Ok(BuiltItem {
            collection_path,
            item_path,
        })
    }

    fn load_or_create_collection(&self, path: &Path) -> Result<Collection, CatalogError> {
        if path.is_file() {
            let text = fs::read_to_string(path)?;
            let collection: Collection = serde_json::from_str(&text)?;
            if collection.id != self.collection_id {
                return Err(CatalogError::CollectionMismatch {
                    path: path.to_path_buf(),
                    found: collection.id,
                    expected: self.collection_id.clone(),
                });
            }
            return Ok(collection);
        }
        Ok(Collection {
            kind: "Collection".to_string(),
            stac_version: STAC_VERSION.to_string(),
            id: self.collection_id.clone(),
            description: collection_description(&self.collection_id),
            license: "proprietary".to_string(),
            extent: Extent {
                spatial: SpatialExtent { bbox: Vec::new() },
                temporal: TemporalExtent {
                    interval: vec![[None, None]],
                },
            },
            links: Vec::new(),
        })
    }

    fn append_item(
        &self,
        collection: &mut Collection,
        item_id: &str,
        bbox: Bbox,
        start: &Option<String>,
        end: &Option<String>,
    ) {
        let link = Link {
            rel: "item".to_string(),
            href: format!("./items/{item_id}.json"),
            media_type: Some("application/json".to_string()),
        };
        if !collection.links.contains(&link) {
            collection.links.push(link);
        }

        let spatial = &mut collection.extent.spatial.bbox;
        if let Some(existing) = spatial.first_mut() {
            let current = Bbox {
                lon_min: existing[0],
                lat_min: existing[1],
                lon_max: existing[2],
                lat_max: existing[3],
            };
            *existing = current.union(&bbox).as_array();
        } else {
            spatial.push(bbox.as_array());
        }

        let interval = &mut collection.extent.temporal.interval;
        if interval.is_empty() {
            interval.push([None, None]);
        }
        let [lo, hi] = &mut interval[0];
        if let Some(start) = start {
            if lo.as_ref().is_none_or(|existing| start < existing) {
                *lo = Some(start.clone());
            }
        }
        if let Some(end) = end {
            if hi.as_ref().is_none_or(|existing| end > existing) {
                *hi = Some(end.clone());
            }
        }
    }
}
