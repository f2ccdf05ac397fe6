//! Help output and end-to-end runs of the bizflow binary against a temporary store


use cli_tests::{get_help_text, get_version_text, run_bizflow};
use std::path::{Path, PathBuf};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Write a config pointing at a store inside `dir`
fn init_config(dir: &Path) -> PathBuf {
    let config = dir.join("config.toml");
    let store = dir.join("store.json");
    run_bizflow(
        Some(&config),
        &["config", "init", "--store", store.to_str().unwrap()],
    )
    .expect("config init failed");
    config
}

fn json(output: &str) -> serde_json::Value {
    serde_json::from_str(output).unwrap_or_else(|e| panic!("not JSON ({}): {}", e, output))
}

/// The help header carries the binary name and version
#[test]
fn test_help_includes_version() {
    let help_text = get_help_text().expect("Failed to get help text");
    assert!(
        help_text.contains(&format!("bizflow - {}", VERSION)),
        "Help text should include 'bizflow - {}'\nActual: {}",
        VERSION,
        help_text
    );
}

#[test]
fn test_version_output() {
    let version_text = get_version_text().expect("Failed to get version text");
    assert!(version_text.contains(VERSION));
}

/// Every top-level command is listed
#[test]
fn test_help_shows_commands() {
    let help_text = get_help_text().expect("Failed to get help text");

    let expected_commands = vec![
        "template",
        "workflow",
        "task",
        "approval",
        "automation",
        "stats",
        "scheduler",
        "config",
        "help",
    ];
    for command in expected_commands {
        assert!(
            help_text.contains(command),
            "Help text should list '{}'\nActual: {}",
            command,
            help_text
        );
    }
}

/// Config init writes a file that config show reads back
#[test]
fn test_config_init_and_show() {
    let dir = tempfile::tempdir().unwrap();
    let config = init_config(dir.path());
    assert!(config.exists());

    let shown = json(&run_bizflow(Some(&config), &["config", "show", "--json"]).unwrap());
    assert_eq!(
        shown["store_path"].as_str().unwrap(),
        dir.path().join("store.json").to_str().unwrap()
    );
    assert_eq!(shown["worker_pool_size"], 4);
}

/// Template to completed workflow through the command line
#[test]
fn test_template_workflow_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let config = init_config(dir.path());

    let template_file = dir.path().join("onboarding.yaml");
    std::fs::write(
        &template_file,
        r#"company_id: 1
name: Onboarding
category: HR
created_by: 100
template_config:
  tasks:
    - key: laptop
      name: Order laptop
      step: 1
      type: review
    - key: badge
      name: Print badge
      step: 2
      depends_on: [laptop]
      type: review
"#,
    )
    .unwrap();

    let template = json(
        &run_bizflow(
            Some(&config),
            &["template", "create", template_file.to_str().unwrap(), "--json"],
        )
        .unwrap(),
    );
    assert_eq!(template["version"], 1);
    let template_id = template["id"].as_str().unwrap().to_string();

    let created = json(
        &run_bizflow(
            Some(&config),
            &[
                "workflow", "create", "New hire", "--template", &template_id, "--initiator",
                "100", "--json",
            ],
        )
        .unwrap(),
    );
    assert_eq!(created["workflow"]["status"], "draft");
    let workflow_id = created["workflow"]["id"].as_str().unwrap().to_string();

    let started = json(
        &run_bizflow(
            Some(&config),
            &["workflow", "start", &workflow_id, "--user", "100", "--json"],
        )
        .unwrap(),
    );
    assert_eq!(started["status"], "active");

    for key in ["laptop", "badge"] {
        let details = json(
            &run_bizflow(Some(&config), &["workflow", "get", &workflow_id, "--json"]).unwrap(),
        );
        let task_id = details["tasks"]
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["key"] == key)
            .and_then(|t| t["id"].as_str())
            .unwrap()
            .to_string();
        let task = json(
            &run_bizflow(
                Some(&config),
                &["task", "complete", &task_id, "--user", "100", "--json"],
            )
            .unwrap(),
        );
        assert_eq!(task["status"], "completed");
    }

    let details =
        json(&run_bizflow(Some(&config), &["workflow", "get", &workflow_id, "--json"]).unwrap());
    assert_eq!(details["workflow"]["status"], "completed");
    assert_eq!(details["workflow"]["progress_percentage"], 100.0);

    let stats = json(&run_bizflow(Some(&config), &["stats", "--json"]).unwrap());
    assert_eq!(stats["workflows_by_status"]["completed"], 1);
}

/// Engine errors exit non-zero with their kind
#[test]
fn test_unknown_workflow_reports_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let config = init_config(dir.path());

    let err = run_bizflow(
        Some(&config),
        &["workflow", "get", "7f1c4c9e-3d7b-4f5e-9a53-0f3c2b1d9e11"],
    )
    .unwrap_err();
    assert!(err.contains("not_found"), "unexpected error: {}", err);
}
