use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

const VALID_CONFIG: &str = r#"
default_site = "team"

[sites.team]
host = "contoso.sharepoint.com"
site_path = "/sites/MyTeamSite"
tenant_id = "0b5f1d2e-8c3a-4d6f-9e21-7a4b3c2d1e0f"
client_id = "7f3e2d1c-0b9a-4c8d-8e7f-6a5b4c3d2e1f"
client_secret = "a-very-long-client-secret"
"#;

fn sppilot(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("sppilot").unwrap();
    cmd.env("SPPILOT_CONFIG", config)
        .env_remove("SPPILOT_SITE")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn help_lists_commands() {
    Command::cargo_bin("sppilot")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("files"))
        .stdout(predicate::str::contains("folders"))
        .stdout(predicate::str::contains("doctor"));
}

#[test]
fn config_path_honours_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");

    Command::cargo_bin("sppilot")
        .unwrap()
        .args(["config", "path", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn doctor_check_validates_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), VALID_CONFIG);

    sppilot(&path)
        .args(["doctor", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration valid (1 site(s))"));
}

#[test]
fn doctor_check_rejects_bad_tenant() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        &VALID_CONFIG.replace("0b5f1d2e-8c3a-4d6f-9e21-7a4b3c2d1e0f", "contoso"),
    );

    sppilot(&path)
        .args(["doctor", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("tenant_id must be a GUID"));
}

#[test]
fn doctor_check_without_config() {
    let dir = tempfile::tempdir().unwrap();

    sppilot(&dir.path().join("absent.toml"))
        .args(["doctor", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration not found"));
}

#[test]
fn sites_list_shows_profiles() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), VALID_CONFIG);

    sppilot(&path)
        .args(["sites", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("https://contoso.sharepoint.com/sites/MyTeamSite"));
}

#[test]
fn config_show_masks_secret() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), VALID_CONFIG);

    sppilot(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("a-ve…cret"))
        .stdout(predicate::str::contains("a-very-long-client-secret").not());
}

#[test]
fn unknown_site_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), VALID_CONFIG);

    sppilot(&path)
        .args(["--site", "nope", "folders", "exists", "/Shared Documents"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown site 'nope'"));
}

#[test]
fn completion_generates_script() {
    Command::cargo_bin("sppilot")
        .unwrap()
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sppilot"));
}
