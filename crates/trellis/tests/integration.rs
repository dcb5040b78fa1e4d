//! End-to-end CLI integration tests for the `trellis` binary.
//!
//! Each test writes its fixture files into a temporary directory and
//! exercises the `trellis` binary as a subprocess via `assert_cmd`.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A small survey: a greeting calculation, a gated note, a counted repeat
/// with a required + constrained field, and no option lists.
const SURVEY: &str = r#"{
    "title": "Household survey",
    "instance": {"name": "data", "children": [
        {"name": "name"},
        {"name": "greeting"},
        {"name": "has_children", "value": "no"},
        {"name": "children_note"},
        {"name": "how_many"},
        {"name": "child", "children": [{"name": "age"}]}
    ]},
    "bindings": [
        {"nodeset": "/data/greeting", "calculate": "concat('Hello ', ../name)"},
        {"nodeset": "/data/children_note", "relevant": "../has_children = 'yes'"},
        {"nodeset": "/data/child/age", "required": "true()", "constraint": ". >= 0"}
    ],
    "repeats": [{"nodeset": "/data/child", "count": "../how_many"}]
}"#;

/// Build a `Command` targeting the cargo-built `trellis` binary.
fn trellis() -> Command {
    Command::cargo_bin("trellis").unwrap()
}

/// Write a fixture file into the temp directory and return its path.
fn write_file(tmp: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = tmp.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

/// Run the binary, assert success, and parse stdout as JSON.
fn stdout_json(mut cmd: Command) -> serde_json::Value {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

/// Value of the named direct child in a serialized document node.
fn child_value(doc: &serde_json::Value, name: &str) -> String {
    doc["children"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == name)
        .and_then(|c| c["value"].as_str())
        .unwrap_or_default()
        .to_string()
}

/// How many direct children of the document node carry the given name.
fn children_named(doc: &serde_json::Value, name: &str) -> usize {
    doc["children"]
        .as_array()
        .map(|cs| cs.iter().filter(|c| c["name"] == name).count())
        .unwrap_or(0)
}

/// The `ordinal`-th (1-based) direct child with the given name.
fn nth_child<'a>(doc: &'a serde_json::Value, name: &str, ordinal: usize) -> &'a serde_json::Value {
    doc["children"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|c| c["name"] == name)
        .nth(ordinal - 1)
        .unwrap()
}

// --- Flow 1: version and completion ---

#[test]
fn version_prints_human_line() {
    trellis()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("trellis version"));
}

#[test]
fn version_json_has_fields() {
    let mut cmd = trellis();
    cmd.args(["version", "--json"]);
    let info = stdout_json(cmd);
    assert!(info["version"].is_string());
    assert!(info["build"].is_string());
}

#[test]
fn completion_generates_a_script() {
    trellis()
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("trellis"));
}

// --- Flow 2: inspect ---

#[test]
fn inspect_summarizes_the_definition() {
    let tmp = TempDir::new().unwrap();
    let form = write_file(&tmp, "survey.json", SURVEY);

    trellis()
        .arg("inspect")
        .arg(&form)
        .assert()
        .success()
        .stdout(predicate::str::contains("Household survey"))
        .stdout(predicate::str::contains("BINDINGS"))
        .stdout(predicate::str::contains("/data/child"))
        .stdout(predicate::str::contains("no diagnostics"));
}

#[test]
fn inspect_json_counts_nodes() {
    let tmp = TempDir::new().unwrap();
    let form = write_file(&tmp, "survey.json", SURVEY);

    let mut cmd = trellis();
    cmd.arg("inspect").arg(&form).arg("--json");
    let report = stdout_json(cmd);

    assert_eq!(report["title"], "Household survey");
    assert_eq!(report["root"], "data");
    assert_eq!(report["nodes"], 8);
    assert_eq!(report["bindings"].as_array().unwrap().len(), 3);
    assert_eq!(report["repeats"][0]["count"], "../how_many");
    assert_eq!(report["diagnostics"].as_array().unwrap().len(), 0);
}

#[test]
fn inspect_reports_cycles_without_failing() {
    let tmp = TempDir::new().unwrap();
    let form = write_file(
        &tmp,
        "cyclic.json",
        r#"{
            "instance": {"name": "d", "children": [{"name": "a"}, {"name": "b"}]},
            "bindings": [
                {"nodeset": "/d/a", "calculate": "../b"},
                {"nodeset": "/d/b", "calculate": "../a"}
            ]
        }"#,
    );

    trellis()
        .arg("inspect")
        .arg(&form)
        .assert()
        .success()
        .stdout(predicate::str::contains("DIAGNOSTICS"));
}

// --- Flow 3: run ---

#[test]
fn run_replays_a_script() {
    let tmp = TempDir::new().unwrap();
    let form = write_file(&tmp, "survey.json", SURVEY);
    let script = write_file(
        &tmp,
        "edits.json",
        r#"[
            {"op": "set", "ref": "/data/name", "value": "Ada"},
            {"op": "set", "ref": "/data/how_many", "value": "2"},
            {"op": "set", "ref": "/data/child[1]/age", "value": "4"}
        ]"#,
    );

    let mut cmd = trellis();
    cmd.arg("run").arg(&form).arg("--script").arg(&script).arg("--json");
    let report = stdout_json(cmd);

    assert_eq!(report["edited"], true);
    let doc = &report["document"];
    assert_eq!(child_value(doc, "name"), "Ada");
    assert_eq!(child_value(doc, "greeting"), "Hello Ada");
    assert_eq!(children_named(doc, "child"), 2);
    assert_eq!(child_value(nth_child(doc, "child", 1), "age"), "4");
    assert_eq!(child_value(nth_child(doc, "child", 2), "age"), "");
}

#[test]
fn run_without_script_is_not_an_edit() {
    let tmp = TempDir::new().unwrap();
    let form = write_file(&tmp, "survey.json", SURVEY);

    let mut cmd = trellis();
    cmd.arg("run").arg(&form).arg("--json");
    let report = stdout_json(cmd);

    assert_eq!(report["edited"], false);
    // The greeting calculation still ran at init.
    assert_eq!(child_value(&report["document"], "greeting"), "Hello ");
}

#[test]
fn run_omits_irrelevant_nodes_on_request() {
    let tmp = TempDir::new().unwrap();
    let form = write_file(&tmp, "survey.json", SURVEY);

    // has_children stays "no", so children_note is irrelevant.
    let mut cmd = trellis();
    cmd.arg("run").arg(&form).arg("--omit-irrelevant").arg("--json");
    let report = stdout_json(cmd);
    assert_eq!(children_named(&report["document"], "children_note"), 0);

    let mut cmd = trellis();
    cmd.arg("run").arg(&form).arg("--json");
    let report = stdout_json(cmd);
    assert_eq!(children_named(&report["document"], "children_note"), 1);
}

#[test]
fn run_loads_a_saved_record() {
    let tmp = TempDir::new().unwrap();
    let form = write_file(&tmp, "survey.json", SURVEY);
    let record = write_file(
        &tmp,
        "record.json",
        r#"{"name": "data", "children": [
            {"name": "name", "value": "Grace"},
            {"name": "greeting"},
            {"name": "has_children", "value": "yes"},
            {"name": "children_note", "value": "two kids"},
            {"name": "how_many", "value": "2"},
            {"name": "child", "children": [{"name": "age", "value": "9"}]},
            {"name": "child", "children": [{"name": "age", "value": "6"}]}
        ]}"#,
    );

    let mut cmd = trellis();
    cmd.arg("run").arg(&form).arg("--record").arg(&record).arg("--json");
    let report = stdout_json(cmd);

    let doc = &report["document"];
    assert_eq!(children_named(doc, "child"), 2);
    assert_eq!(child_value(nth_child(doc, "child", 2), "age"), "6");
    assert_eq!(child_value(doc, "children_note"), "two kids");
    // Calculations re-run on load.
    assert_eq!(child_value(doc, "greeting"), "Hello Grace");
}

#[test]
fn sweep_step_clears_under_deferred_config() {
    let tmp = TempDir::new().unwrap();
    let form = write_file(&tmp, "survey.json", SURVEY);
    let edits = write_file(
        &tmp,
        "edits.json",
        r#"[{"op": "set", "ref": "/data/children_note", "value": "secret"}]"#,
    );
    let edits_then_sweep = write_file(
        &tmp,
        "edits_sweep.json",
        r#"[
            {"op": "set", "ref": "/data/children_note", "value": "secret"},
            {"op": "sweep"}
        ]"#,
    );

    // Deferred clearing keeps the value on the irrelevant node...
    let mut cmd = trellis();
    cmd.env("TRELLIS_CLEAR_IRRELEVANT_IMMEDIATELY", "false");
    cmd.arg("run").arg(&form).arg("--script").arg(&edits).arg("--json");
    let report = stdout_json(cmd);
    assert_eq!(child_value(&report["document"], "children_note"), "secret");

    // ...until an explicit sweep step drops it.
    let mut cmd = trellis();
    cmd.env("TRELLIS_CLEAR_IRRELEVANT_IMMEDIATELY", "false");
    cmd.arg("run")
        .arg(&form)
        .arg("--script")
        .arg(&edits_then_sweep)
        .arg("--json");
    let report = stdout_json(cmd);
    assert_eq!(child_value(&report["document"], "children_note"), "");
}

// --- Flow 4: validate ---

#[test]
fn validate_reports_failures_and_exits_nonzero() {
    let tmp = TempDir::new().unwrap();
    let form = write_file(&tmp, "survey.json", SURVEY);
    let script = write_file(
        &tmp,
        "edits.json",
        r#"[{"op": "set", "ref": "/data/how_many", "value": "2"}]"#,
    );

    let output = trellis()
        .arg("validate")
        .arg(&form)
        .arg("--script")
        .arg(&script)
        .arg("--json")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["valid"], false);
    let failures = report["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0]["node"], "/data/child/age");
    assert_eq!(failures[0]["outcome"], "invalid_required");
    assert_eq!(failures[1]["node"], "/data/child[2]/age");
}

#[test]
fn validate_distinguishes_constraint_failures() {
    let tmp = TempDir::new().unwrap();
    let form = write_file(&tmp, "survey.json", SURVEY);
    let script = write_file(
        &tmp,
        "edits.json",
        r#"[
            {"op": "set", "ref": "/data/how_many", "value": "1"},
            {"op": "set", "ref": "/data/child[1]/age", "value": "-3"}
        ]"#,
    );

    let output = trellis()
        .arg("validate")
        .arg(&form)
        .arg("--script")
        .arg(&script)
        .arg("--json")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["failures"][0]["outcome"], "invalid_constraint");
}

#[test]
fn validate_passes_a_completed_form() {
    let tmp = TempDir::new().unwrap();
    let form = write_file(&tmp, "survey.json", SURVEY);
    let script = write_file(
        &tmp,
        "edits.json",
        r#"[
            {"op": "set", "ref": "/data/how_many", "value": "2"},
            {"op": "set", "ref": "/data/child[1]/age", "value": "4"},
            {"op": "set", "ref": "/data/child[2]/age", "value": "7"}
        ]"#,
    );

    trellis()
        .arg("validate")
        .arg(&form)
        .arg("--script")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("document is valid"));
}

// --- Flow 5: errors ---

#[test]
fn missing_form_file_fails() {
    trellis()
        .args(["run", "/nonexistent/survey.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"))
        .stderr(predicate::str::contains("failed to read form"));
}

#[test]
fn json_mode_reports_errors_as_json() {
    trellis()
        .args(["run", "/nonexistent/survey.json", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"error\""));
}

#[test]
fn malformed_script_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let form = write_file(&tmp, "survey.json", SURVEY);
    let script = write_file(&tmp, "edits.json", r#"[{"op": "frobnicate"}]"#);

    trellis()
        .arg("run")
        .arg(&form)
        .arg("--script")
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid script"));
}

#[test]
fn failing_step_names_its_position() {
    let tmp = TempDir::new().unwrap();
    let form = write_file(&tmp, "survey.json", SURVEY);
    let script = write_file(
        &tmp,
        "edits.json",
        r#"[
            {"op": "set", "ref": "/data/name", "value": "Ada"},
            {"op": "set", "ref": "/data/no_such_node", "value": "x"}
        ]"#,
    );

    trellis()
        .arg("run")
        .arg(&form)
        .arg("--script")
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("script step 2 failed"));
}

#[test]
fn readonly_nodes_refuse_scripted_writes() {
    let tmp = TempDir::new().unwrap();
    let form = write_file(
        &tmp,
        "mirror.json",
        r#"{
            "instance": {"name": "d", "children": [{"name": "src"}, {"name": "mirror"}]},
            "bindings": [{"nodeset": "/d/mirror", "calculate": "../src", "readonly": true}]
        }"#,
    );
    let script = write_file(
        &tmp,
        "edits.json",
        r#"[{"op": "set", "ref": "/d/mirror", "value": "9"}]"#,
    );

    trellis()
        .arg("run")
        .arg(&form)
        .arg("--script")
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("readonly"));
}

#[test]
fn invalid_config_file_fails_early() {
    let tmp = TempDir::new().unwrap();
    let form = write_file(&tmp, "survey.json", SURVEY);
    let config = write_file(&tmp, "trellis.toml", "max_propagation_passes = 0\n");

    trellis()
        .arg("run")
        .arg(&form)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid engine configuration"));
}
