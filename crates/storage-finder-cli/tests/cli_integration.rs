use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use jsonschema::JSONSchema;
use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|err| panic!("failed to canonicalize repo root: {err}"))
}

fn catalog_dir() -> PathBuf {
    repo_root().join("data/storage-finder")
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn run_sf<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_sf"))
        .arg("--catalog-dir")
        .arg(catalog_dir())
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute sf binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_sf(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "sf command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn read_json_file(path: &Path) -> Value {
    let body = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read JSON file {}: {err}", path.display()));
    serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse JSON file {}: {err}", path.display()))
}

fn validate_schema(schema_file: &str, instance: &Value) {
    let schema_path = repo_root().join("contracts/v1/schemas").join(schema_file);
    let schema_json = read_json_file(&schema_path);
    let compiled = JSONSchema::compile(&schema_json)
        .unwrap_or_else(|err| panic!("failed to compile schema {}: {err}", schema_path.display()));

    let errors = compiled
        .validate(instance)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>());
    if let Some(errors) = errors {
        panic!("schema validation failed for {}:\n{}", schema_file, errors.join("\n"));
    }
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing array field `{key}` in payload: {value}"))
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .unwrap_or_else(|| panic!("non-string entry in `{key}`: {item}"))
        })
        .collect()
}

fn ids_of(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing array field `{key}` in payload: {value}"))
        .iter()
        .map(|item| {
            item.get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| panic!("entry without id in `{key}`: {item}"))
        })
        .collect()
}

fn tile<'a>(view: &'a Value, service_id: &str) -> &'a Value {
    view.get("services")
        .and_then(Value::as_array)
        .and_then(|tiles| {
            tiles.iter().find(|tile| tile.get("id").and_then(Value::as_str) == Some(service_id))
        })
        .unwrap_or_else(|| panic!("no tile for {service_id} in view: {view}"))
}

#[test]
fn catalog_attributes_follow_first_defining_weight() {
    let payload = run_json(["catalog", "attributes"]);
    validate_schema("attributes.schema.json", &payload);

    let keys = payload
        .get("attributes")
        .and_then(Value::as_array)
        .map(|attributes| {
            attributes
                .iter()
                .filter_map(|attribute| attribute.get("key").and_then(Value::as_str))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    assert_eq!(
        keys,
        vec![
            "field_eligibility",
            "field_use_case",
            "field_storable_files",
            "field_permission_settings",
            "field_synchronous_access",
            "field_alumni_access",
            "field_backup",
            "field_limitations",
            "field_links",
        ]
    );

    let summary = run_json(["catalog", "summary"]);
    assert_eq!(summary.get("total_services").and_then(Value::as_u64), Some(5));
    assert_eq!(summary.get("total_facets").and_then(Value::as_u64), Some(3));
    assert_eq!(summary.get("total_attributes").and_then(Value::as_u64), Some(9));
}

#[test]
fn filter_combines_answers_across_and_within_facets() {
    let high = run_json(["filter", "--answer", "q_data_class=c_high"]);
    validate_schema("filter.schema.json", &high);
    assert_eq!(
        ids_of(&high, "services"),
        vec!["research_project_space", "secure_research_data_environment"]
    );

    let high_external =
        run_json(["filter", "--answer", "q_data_class=c_high", "--answer", "q_collab=c_external"]);
    assert_eq!(ids_of(&high_external, "services"), vec!["research_project_space"]);
    assert_eq!(high_external.get("available_services").and_then(Value::as_u64), Some(1));

    let external_or_alumni =
        run_json(["filter", "--answer", "q_collab=c_external", "--answer", "q_collab=c_alumni"]);
    assert_eq!(
        ids_of(&external_or_alumni, "services"),
        vec!["google_drive", "research_project_space", "dropbox"]
    );

    let single_select =
        run_json(["filter", "--answer", "q_size=c_small", "--answer", "q_size=c_large"]);
    assert_eq!(
        single_select.pointer("/answers/q_size"),
        Some(&serde_json::json!(["c_large"]))
    );
    assert_eq!(
        ids_of(&single_select, "services"),
        vec!["hpc_scratch", "research_project_space", "secure_research_data_environment"]
    );

    let everything = run_json(["filter"]);
    assert_eq!(ids_of(&everything, "services").len(), 5);
    assert_eq!(everything.get("answers"), Some(&serde_json::json!({})));
}

#[test]
fn view_builds_comparison_in_selection_order() {
    let view = run_json(["view", "--select", "hpc_scratch", "--select", "google_drive"]);
    validate_schema("view.schema.json", &view);

    assert_eq!(string_list(&view, "selected_service_ids"), vec!["hpc_scratch", "google_drive"]);
    assert_eq!(view.get("selection_label").and_then(Value::as_str), Some("2 Selected"));
    assert_eq!(view.get("select_all_label").and_then(Value::as_str), Some("Select All"));
    assert_eq!(view.get("available_services"), Some(&Value::Null));
    assert_eq!(
        view.pointer("/comparison/heading").and_then(Value::as_str),
        Some("Service Details and Comparison")
    );
    assert_eq!(
        view.pointer("/comparison/columns/1/title").and_then(Value::as_str),
        Some("Google Drive")
    );

    assert_eq!(
        view.pointer("/comparison/rows/0/cells/0/markup").and_then(Value::as_str),
        Some("<p>Users with an HPC account</p>")
    );
    assert_eq!(
        view.pointer("/comparison/rows/2/key").and_then(Value::as_str),
        Some("field_storable_files")
    );
    for column in 0..2 {
        assert_eq!(
            view.pointer(&format!("/comparison/rows/2/cells/{column}/kind"))
                .and_then(Value::as_str),
            Some("not_available")
        );
    }
}

#[test]
fn view_policy_controls_selectability_of_non_matching_services() {
    let disabled = run_json(["view", "--answer", "q_data_class=c_high", "--select", "dropbox"]);
    validate_schema("view.schema.json", &disabled);
    assert!(string_list(&disabled, "selected_service_ids").is_empty());
    assert_eq!(
        tile(&disabled, "dropbox").get("presentation").and_then(Value::as_str),
        Some("disabled")
    );
    assert_eq!(disabled.get("comparison"), Some(&Value::Null));
    assert_eq!(disabled.get("available_services").and_then(Value::as_u64), Some(2));

    let enabled = run_json([
        "view",
        "--policy",
        "show-enabled",
        "--answer",
        "q_data_class=c_high",
        "--select",
        "dropbox",
    ]);
    validate_schema("view.schema.json", &enabled);
    assert_eq!(string_list(&enabled, "selected_service_ids"), vec!["dropbox"]);
    assert_eq!(
        tile(&enabled, "dropbox").get("presentation").and_then(Value::as_str),
        Some("highlighted")
    );
    assert_eq!(
        enabled.pointer("/comparison/heading").and_then(Value::as_str),
        Some("Service Details")
    );

    let hidden = run_json(["view", "--policy", "hide", "--answer", "q_data_class=c_high"]);
    assert_eq!(
        ids_of(&hidden, "services"),
        vec!["research_project_space", "secure_research_data_environment"]
    );
}

#[test]
fn view_select_all_uses_filtered_services() {
    let view = run_json(["view", "--answer", "q_collab=c_alumni", "--select-all"]);
    validate_schema("view.schema.json", &view);

    assert_eq!(string_list(&view, "selected_service_ids"), vec!["dropbox"]);
    assert_eq!(view.get("select_all_label").and_then(Value::as_str), Some("Select All Available"));
    assert_eq!(
        view.pointer("/affordances/select_all_blocked_by").and_then(Value::as_str),
        Some("all-already-selected")
    );
    assert_eq!(view.pointer("/affordances/clear_answers_disabled"), Some(&Value::Bool(false)));
    assert_eq!(view.pointer("/facets/1/choices/2/checked"), Some(&Value::Bool(true)));
}

#[test]
fn replay_purges_non_matching_selections_when_leaving_show_enabled() {
    let events = repo_root().join("contracts/v1/fixtures/events-show-enabled-then-hide.json");

    let payload = run_json(["replay", "--events", path_str(&events)]);
    assert_eq!(payload.get("events_applied").and_then(Value::as_u64), Some(6));
    assert!(payload.get("steps").is_none());
    let view = payload.get("view").cloned().unwrap_or(Value::Null);
    let mut versioned = view.clone();
    if let Value::Object(object) = &mut versioned {
        object.insert("contract_version".to_string(), Value::String("sf.v1".to_string()));
    }
    validate_schema("view.schema.json", &versioned);
    assert!(string_list(&view, "selected_service_ids").is_empty());
    assert_eq!(ids_of(&view, "services"), vec!["research_project_space"]);
    assert_eq!(view.get("policy").and_then(Value::as_str), Some("hide"));

    let traced = run_json(["replay", "--events", path_str(&events), "--trace"]);
    let steps = traced
        .get("steps")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("trace output should contain steps: {traced}"));
    assert_eq!(steps.len(), 6);
    assert_eq!(
        steps[4].get("view").map(|view| string_list(view, "selected_service_ids")),
        Some(vec!["dropbox".to_string(), "secure_research_data_environment".to_string()])
    );
    assert_eq!(
        steps[4].pointer("/event/type").and_then(Value::as_str),
        Some("toggle_facet_choice")
    );
}

#[test]
fn missing_catalog_and_bad_arguments_fail_cleanly() {
    let sandbox = unique_temp_dir("storage-finder-missing-catalog");
    let output = Command::new(env!("CARGO_BIN_EXE_sf"))
        .args(["--catalog-dir", path_str(&sandbox), "catalog", "summary"])
        .output()
        .unwrap_or_else(|err| panic!("failed to execute sf binary: {err}"));
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read"), "unexpected stderr: {stderr}");

    let bad_answer = run_sf(["filter", "--answer", "q_collab"]);
    assert!(!bad_answer.status.success());

    let bad_events = sandbox.join("events.json");
    fs::write(&bad_events, r#"[{"type": "launch_rocket"}]"#)
        .unwrap_or_else(|err| panic!("failed to write events fixture: {err}"));
    let output = run_sf(["replay", "--events", path_str(&bad_events)]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid event list"), "unexpected stderr: {stderr}");
}
