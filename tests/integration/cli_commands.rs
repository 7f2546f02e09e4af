//! Integration tests for CLI exit statuses

use assert_cmd::Command;
use tempfile::TempDir;

const CREDENTIAL_VARS: [&str; 5] = [
    "HSV_USERNAME",
    "HSV_PASSWORD",
    "ECOBEE_USERNAME",
    "ECOBEE_PASSWORD",
    "ECOBEE_TOTP_SECRET",
];

fn utility_sync(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("utility-sync").unwrap();
    cmd.current_dir(dir.path())
        .env("DATA_DIR", dir.path().join("data"))
        .env("TOKEN_DIR", dir.path().join("tokens"))
        .env_remove("RUST_LOG");
    for var in CREDENTIAL_VARS {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn validate_without_datasets_succeeds() {
    let dir = TempDir::new().unwrap();
    utility_sync(&dir).arg("validate").assert().success();
}

#[test]
fn validate_truncated_dataset_exits_with_corruption_status() {
    let dir = TempDir::new().unwrap();
    let utilities = dir.path().join("data").join("utilities");
    std::fs::create_dir_all(&utilities).unwrap();
    let current = utilities.join("hsv_current.json");
    std::fs::write(&current, "{\"ELECTRIC\": [{\"source_id\": \"E-1\"").unwrap();

    utility_sync(&dir)
        .args(["validate", "--provider", "hsv"])
        .assert()
        .code(3);

    // Never rewritten
    assert_eq!(
        std::fs::read_to_string(&current).unwrap(),
        "{\"ELECTRIC\": [{\"source_id\": \"E-1\""
    );
}

#[test]
fn validate_reports_json() {
    let dir = TempDir::new().unwrap();
    let output = utility_sync(&dir)
        .args(["--output-format", "json", "validate", "--provider", "ecobee"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let checks: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(checks[0]["provider"], "ecobee");
    assert_eq!(checks[0]["present"], false);
}

#[test]
fn sync_without_credentials_exits_with_auth_status() {
    let dir = TempDir::new().unwrap();
    let output = utility_sync(&dir)
        .args(["--output-format", "json", "sync", "--provider", "hsv"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["providers"][0]["provider"], "hsv");
    assert_eq!(report["providers"][0]["error_kind"], "auth");
    assert!(report["providers"][0]["error"]
        .as_str()
        .unwrap()
        .contains("HSV_USERNAME"));
    assert!(!dir.path().join("data").exists());
}

#[test]
fn sync_rejects_bad_store_interval() {
    let dir = TempDir::new().unwrap();
    utility_sync(&dir)
        .args(["sync", "--store-interval-minutes", "7"])
        .assert()
        .failure();
}

#[test]
fn token_show_and_clear_without_cache() {
    let dir = TempDir::new().unwrap();
    utility_sync(&dir).args(["token", "show"]).assert().success();
    utility_sync(&dir)
        .args(["token", "clear", "--provider", "ecobee"])
        .assert()
        .success();
}
