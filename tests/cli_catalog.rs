//! Catalog command surface: STAC trees built from produced rasters, item
//! accumulation across invocations, and geometry/asset rejection paths.
mod common;

use common::Sandbox;
use serde_json::Value;
use std::fs;

fn touch(sb: &Sandbox, rel: &str) {
    fs::write(sb.path().join(rel), b"raster-bytes").expect("write asset");
}

fn read_json(sb: &Sandbox, rel: &str) -> Value {
    serde_json::from_str(&sb.read(rel)).unwrap_or_else(|err| panic!("parse {rel}: {err}"))
}

#[test]
fn build_writes_item_collection_and_processing_metadata() {
    let sb = Sandbox::new();
    touch(&sb, "geo_velocity.tif");
    sb.sbas_ok(&[
        "catalog",
        "build",
        "--collection-id",
        "LS-DF",
        "--item-id",
        "LS-DF-SB-S1_20250112T060000d000",
        "--bbox",
        "24.07,35.37,24.22,35.27",
        "--start-date",
        "20250101",
        "--end-date",
        "20250301",
        "--asset",
        "velocity=geo_velocity.tif",
        "--output-dir",
        "catalog",
    ]);

    let item = read_json(
        &sb,
        "catalog/LS-DF/items/LS-DF-SB-S1_20250112T060000d000.json",
    );
    assert_eq!(item["type"], "Feature");
    assert_eq!(item["properties"]["processing:level"], "L3");
    assert_eq!(item["properties"]["processing:facility"], "AXIS-3 LAND");
    assert_eq!(
        item["assets"]["velocity"]["type"],
        "image/tiff; application=geotiff"
    );
    // Latitudes are normalized south-to-north in the stored bbox.
    let bbox: Vec<f64> = serde_json::from_value(item["bbox"].clone()).unwrap();
    assert_eq!(bbox, vec![24.07, 35.27, 24.22, 35.37]);

    let collection = read_json(&sb, "catalog/LS-DF/collection.json");
    assert_eq!(collection["id"], "LS-DF");
    let items: Vec<&str> = collection["links"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|l| l["rel"] == "item")
        .map(|l| l["href"].as_str().unwrap())
        .collect();
    assert_eq!(items, ["./items/LS-DF-SB-S1_20250112T060000d000.json"]);
}

#[test]
fn repeated_builds_accumulate_items_and_widen_extents() {
    let sb = Sandbox::new();
    touch(&sb, "a.tif");
    touch(&sb, "b.tif");
    let base = [
        "catalog",
        "build",
        "--collection-id",
        "LS-DF",
        "--output-dir",
        "catalog",
    ];

    let mut first = base.to_vec();
    first.extend([
        "--item-id",
        "LS-DF-SB-S1_20250112T060000d000",
        "--bbox",
        "24.07,35.27,24.22,35.37",
        "--start-date",
        "20250101",
        "--end-date",
        "20250201",
        "--asset",
        "velocity=a.tif",
    ]);
    sb.sbas_ok(&first);

    let mut second = base.to_vec();
    second.extend([
        "--item-id",
        "LS-DF-SB-S1_20250301T060000d000",
        "--bbox",
        "24.00,35.20,24.30,35.40",
        "--start-date",
        "20250215",
        "--end-date",
        "20250401",
        "--asset",
        "velocity=b.tif",
    ]);
    sb.sbas_ok(&second);

    let collection = read_json(&sb, "catalog/LS-DF/collection.json");
    let item_links = collection["links"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|l| l["rel"] == "item")
        .count();
    assert_eq!(item_links, 2);

    let spatial: Vec<f64> =
        serde_json::from_value(collection["extent"]["spatial"]["bbox"][0].clone()).unwrap();
    assert_eq!(spatial, vec![24.00, 35.20, 24.30, 35.40]);
    let interval = &collection["extent"]["temporal"]["interval"][0];
    assert_eq!(interval[0], "2025-01-01T00:00:00Z");
    assert_eq!(interval[1], "2025-04-01T00:00:00Z");
}

#[test]
fn auto_item_id_uses_the_service_uid_and_hub_timestamp() {
    let sb = Sandbox::new();
    touch(&sb, "geo_velocity.tif");
    sb.sbas_ok(&[
        "catalog",
        "build",
        "--collection-id",
        "LS-DF",
        "--auto-item-id",
        "--service-uid",
        "LS-DF-SB-S1",
        "--bbox",
        "24.07,35.27,24.22,35.37",
        "--asset",
        "velocity=geo_velocity.tif",
        "--output-dir",
        "catalog",
    ]);

    let items: Vec<String> = fs::read_dir(sb.path().join("catalog/LS-DF/items"))
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(items.len(), 1);
    let re = regex::Regex::new(r"^LS-DF-SB-S1_\d{8}T\d{6}d\d{3}\.json$").unwrap();
    assert!(re.is_match(&items[0]), "unexpected item file {}", items[0]);
}

#[test]
fn swapped_longitudes_are_rejected() {
    let sb = Sandbox::new();
    touch(&sb, "geo_velocity.tif");
    let out = sb.sbas(&[
        "catalog",
        "build",
        "--collection-id",
        "LS-DF",
        "--item-id",
        "LS-DF-SB-S1_20250112T060000d000",
        "--bbox",
        "24.22,35.27,24.07,35.37",
        "--asset",
        "velocity=geo_velocity.tif",
        "--output-dir",
        "catalog",
    ]);
    assert!(!out.status.success());
    assert!(!sb.exists("catalog/LS-DF"));
}

#[test]
fn missing_asset_file_leaves_no_catalog_behind() {
    let sb = Sandbox::new();
    let out = sb.sbas(&[
        "catalog",
        "build",
        "--collection-id",
        "LS-DF",
        "--item-id",
        "LS-DF-SB-S1_20250112T060000d000",
        "--bbox",
        "24.07,35.27,24.22,35.37",
        "--asset",
        "velocity=no_such.tif",
        "--output-dir",
        "catalog",
    ]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("velocity"));
    assert!(!sb.exists("catalog"));
}

#[test]
fn item_id_must_match_the_collection_prefix() {
    let sb = Sandbox::new();
    touch(&sb, "geo_velocity.tif");
    let out = sb.sbas(&[
        "catalog",
        "build",
        "--collection-id",
        "LS-DF",
        "--item-id",
        "FS-FM-XX-S2_20250112T060000d000",
        "--bbox",
        "24.07,35.27,24.22,35.37",
        "--asset",
        "velocity=geo_velocity.tif",
        "--output-dir",
        "catalog",
    ]);
    assert!(!out.status.success());
    assert!(!sb.exists("catalog/LS-DF"));
}
