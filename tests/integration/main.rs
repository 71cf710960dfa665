//! Integration tests for multipush

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// Binary with CI reference variables scrubbed
    fn multipush() -> Command {
        let mut cmd = cargo_bin_cmd!("multipush");
        for var in [
            "GITHUB_REF_NAME",
            "GITHUB_REF",
            "GITHUB_EVENT_NAME",
            "MULTIPUSH_CONFIG",
            "RUST_LOG",
        ] {
            cmd.env_remove(var);
        }
        cmd
    }

    /// Config file whose cache lives inside `dir`
    fn write_config(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("multipush.toml");
        let cache = dir.join("cache");
        std::fs::write(
            &path,
            format!(
                "[build]\nimage = \"ghcr.io/acme/app\"\n\n[cache]\ndir = \"{}\"\n",
                cache.display()
            ),
        )
        .unwrap();
        path
    }

    #[test]
    fn help_displays() {
        multipush()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Multi-architecture"));
    }

    #[test]
    fn version_displays() {
        multipush()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("multipush"));
    }

    #[test]
    fn config_path_honours_flag() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        multipush()
            .args(["config", "path", "-c"])
            .arg(&config)
            .assert()
            .success()
            .stdout(predicate::str::contains("multipush.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        multipush()
            .arg("-c")
            .arg(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[registry]"))
            .stdout(predicate::str::contains("ghcr.io/acme/app"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.toml");
        std::fs::write(&path, "[build]\nplatforms = []\n").unwrap();

        multipush()
            .arg("-c")
            .arg(&path)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn plan_lists_every_platform() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        multipush()
            .arg("-c")
            .arg(&config)
            .args(["plan", "--ref", "v2.3.0", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "linux/arm/v7 ghcr.io/acme/app:v2.3.0",
            ))
            .stdout(predicate::str::contains("linux/arm64 ghcr.io/acme/app:latest"))
            .stdout(predicate::str::contains("linux/amd64 ghcr.io/acme/app:v2.3.0"));
    }

    #[test]
    fn plan_reads_ci_reference() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        multipush()
            .arg("-c")
            .arg(&config)
            .args(["plan", "--format", "json"])
            .env("GITHUB_REF", "refs/tags/v1.4.0")
            .assert()
            .success()
            .stdout(predicate::str::contains("\"immutable\": \"v1.4.0\""));
    }

    #[test]
    fn plan_rejects_non_release_reference() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        multipush()
            .arg("-c")
            .arg(&config)
            .args(["plan", "--ref", "main"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("does not match tag pattern"));
    }

    #[test]
    fn publish_without_reference_fails_early() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        multipush()
            .arg("-c")
            .arg(&config)
            .arg("publish")
            .assert()
            .failure()
            .stderr(predicate::str::contains("No trigger reference"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn publish_without_credentials_fails_before_building() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        multipush()
            .arg("-c")
            .arg(&config)
            .args(["publish", "--ref", "v2.3.0"])
            .env_remove("DOCKERHUB_USERNAME")
            .env_remove("DOCKERHUB_TOKEN")
            .assert()
            .failure()
            .stderr(predicate::str::contains("DOCKERHUB_USERNAME is not set"));
    }

    #[test]
    fn cache_list_empty() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        multipush()
            .arg("-c")
            .arg(&config)
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries"));
    }

    #[test]
    fn cache_clear_with_yes() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        multipush()
            .arg("-c")
            .arg(&config)
            .args(["cache", "clear", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Cache cleared"));
    }
}
