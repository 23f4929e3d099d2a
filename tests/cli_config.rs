//! Config command surface: init / set / get / list round-trips through the
//! binary, with the byte-preservation and rejection guarantees the store makes.
mod common;

use common::Sandbox;

#[test]
fn init_writes_commented_template() {
    let sb = Sandbox::new();
    let stdout = sb.sbas_ok(&["config", "init"]);
    assert!(stdout.contains("config.toml"), "stdout: {stdout}");
    let text = sb.read("config.toml");
    assert!(text.contains("[steps]"));
    assert!(text.contains("step6_run_mintpy = true"));
    assert!(text.contains("# SBAS deformation pipeline configuration."));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let sb = Sandbox::new();
    sb.sbas_ok(&["config", "init"]);
    sb.sbas_ok(&["config", "set", "sentinel.orbit", "ASCENDING"]);

    let out = sb.sbas(&["config", "init"]);
    assert!(!out.status.success());
    // The edited value survives the refused re-init.
    assert_eq!(
        sb.sbas_ok(&["config", "get", "sentinel.orbit"]).trim(),
        "ASCENDING"
    );

    sb.sbas_ok(&["config", "init", "--force"]);
    assert_eq!(
        sb.sbas_ok(&["config", "get", "sentinel.orbit"]).trim(),
        "DESCENDING"
    );
}

#[test]
fn set_then_get_round_trips() {
    let sb = Sandbox::new();
    sb.sbas_ok(&["config", "init"]);
    sb.sbas_ok(&["config", "set", "sentinel.start_date", "20250115"]);
    let got = sb.sbas_ok(&["config", "get", "sentinel.start_date"]);
    assert_eq!(got.trim(), "20250115");
    // Date-like values stay quoted strings on disk.
    assert!(sb.read("config.toml").contains("start_date = \"20250115\""));
}

#[test]
fn set_changes_only_the_target_line() {
    let sb = Sandbox::new();
    sb.sbas_ok(&["config", "init"]);
    let before = sb.read("config.toml");
    sb.sbas_ok(&["config", "set", "stack.reference_date", "20250201"]);
    let after = sb.read("config.toml");

    let differing: Vec<_> = before
        .lines()
        .zip(after.lines())
        .filter(|(a, b)| a != b)
        .collect();
    assert_eq!(before.lines().count(), after.lines().count());
    assert_eq!(differing.len(), 1, "differing lines: {differing:?}");
    assert!(differing[0].1.contains("20250201"));
}

#[test]
fn malformed_value_is_rejected_and_file_untouched() {
    let sb = Sandbox::new();
    sb.sbas_ok(&["config", "init"]);
    let before = sb.read("config.toml");

    let out = sb.sbas(&["config", "set", "stack.bbox", "34.56,oops,23.0,26.68"]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("stack.bbox"), "stderr: {stderr}");

    assert_eq!(sb.read("config.toml"), before);
}

#[test]
fn step_flags_only_accept_booleans() {
    let sb = Sandbox::new();
    sb.sbas_ok(&["config", "init"]);
    let out = sb.sbas(&["config", "set", "steps.step1_download_sentinel", "yes"]);
    assert!(!out.status.success());
    sb.sbas_ok(&["config", "set", "steps.step1_download_sentinel", "false"]);
    assert_eq!(
        sb.sbas_ok(&["config", "get", "steps.step1_download_sentinel"])
            .trim(),
        "false"
    );
}

#[test]
fn get_unknown_key_fails() {
    let sb = Sandbox::new();
    sb.sbas_ok(&["config", "init"]);
    let out = sb.sbas(&["config", "get", "sentinel.no_such_key"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("sentinel.no_such_key"));
}

#[test]
fn list_prints_the_document_verbatim() {
    let sb = Sandbox::new();
    sb.sbas_ok(&["config", "init"]);
    let listed = sb.sbas_ok(&["config", "list"]);
    assert_eq!(listed, sb.read("config.toml"));
}

#[test]
fn save_leaves_a_timestamped_backup() {
    let sb = Sandbox::new();
    sb.sbas_ok(&["config", "init"]);
    sb.sbas_ok(&["config", "set", "sentinel.orbit", "ASCENDING"]);
    let backups = std::fs::read_dir(sb.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("config.toml.bak.")
        })
        .count();
    assert!(backups >= 1);
}
