//! Docker + buildx build engine
//!
//! Implements the BuildEngine trait on top of the docker CLI. Every command
//! runs with a run-scoped `DOCKER_CONFIG` directory, so the builder record
//! and the registry login only live as long as the engine value. The
//! directory is created on a memory-backed filesystem when the host has one,
//! so the login token written by `docker login` never reaches a disk.

use crate::config::DriverKind;
use crate::credentials::Credential;
use crate::engine::runtime::{BuildEngine, BuildInvocation, BuilderInfo, BuiltImage};
use crate::engine::{build_error_output, stream_child_output};
use crate::error::{
    AuthError, AuthFailure, BuildError, BuilderError, EmulationError, Outcome, PublishError,
    PushError,
};
use crate::platform::Platform;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Memory-backed fallback when there is no per-user runtime directory
const SHM_DIR: &str = "/dev/shm";

/// Partial implementation of the JSON written by `--metadata-file`.
/// See https://docs.docker.com/reference/cli/docker/buildx/build/#metadata-file.
#[derive(Deserialize)]
struct MetadataFile {
    #[serde(rename = "containerimage.config.digest")]
    config_digest: Option<String>,
    #[serde(rename = "containerimage.digest")]
    image_digest: Option<String>,
}

/// Status printed by the binfmt installer image when run without arguments
#[derive(Deserialize)]
struct BinfmtStatus {
    #[serde(default)]
    supported: Vec<String>,
}

/// Build engine backed by the docker CLI and its buildx plugin
pub struct DockerEngine {
    config_dir: TempDir,
}

impl DockerEngine {
    /// Create an engine with a fresh, run-scoped docker config directory.
    ///
    /// User-level CLI plugins are linked in so buildx stays discoverable.
    pub fn new() -> Outcome<Self> {
        let candidates: Vec<PathBuf> = dirs::runtime_dir()
            .into_iter()
            .chain(std::iter::once(PathBuf::from(SHM_DIR)))
            .collect();

        let mut builder = tempfile::Builder::new();
        builder.prefix("multipush-docker-");
        let config_dir = match memory_backed_parent(&candidates) {
            Some(parent) => builder.tempdir_in(parent),
            None => {
                warn!(
                    "No memory-backed directory found, registry login will be written to {}",
                    std::env::temp_dir().display()
                );
                builder.tempdir()
            }
        }
        .map_err(|e| PublishError::io("creating run-scoped docker config", e))?;

        #[cfg(unix)]
        {
            let plugins = dirs::home_dir().map(|h| h.join(".docker").join("cli-plugins"));
            if let Some(plugins) = plugins.filter(|p| p.is_dir()) {
                std::os::unix::fs::symlink(&plugins, config_dir.path().join("cli-plugins"))
                    .map_err(|e| PublishError::io("linking docker cli plugins", e))?;
            }
        }

        debug!("Using docker config dir {}", config_dir.path().display());
        Ok(Self { config_dir })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.env("DOCKER_CONFIG", self.config_dir.path());
        cmd
    }

    /// Execute a docker command and return the output
    async fn exec(&self, args: &[&str]) -> std::io::Result<std::process::Output> {
        debug!("Executing: docker {:?}", args);

        self.command()
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
    }
}

#[async_trait]
impl BuildEngine for DockerEngine {
    async fn ensure_available(&self) -> Outcome<()> {
        let output = match self.exec(&["buildx", "version"]).await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PublishError::CliNotFound {
                    name: "docker".to_string(),
                    hint: "Install Docker Engine".to_string(),
                })
            }
            Err(e) => return Err(PublishError::command_failed("docker buildx version", e)),
        };

        if !output.status.success() {
            return Err(PublishError::CliNotFound {
                name: "docker buildx".to_string(),
                hint: "Install the buildx CLI plugin".to_string(),
            });
        }

        debug!(
            "buildx: {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    async fn supported_platforms(
        &self,
        installer_image: &str,
    ) -> Result<Vec<Platform>, EmulationError> {
        let output = self
            .exec(&["run", "--rm", "--privileged", installer_image])
            .await
            .map_err(|e| EmulationError::Installer(e.to_string()))?;

        if !output.status.success() {
            return Err(EmulationError::Installer(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        parse_binfmt_status(&String::from_utf8_lossy(&output.stdout))
            .map_err(EmulationError::Installer)
    }

    async fn install_emulators(
        &self,
        installer_image: &str,
        platforms: &[Platform],
    ) -> Result<(), EmulationError> {
        let emulators = platforms
            .iter()
            .map(|p| p.emulator())
            .collect::<Vec<_>>()
            .join(",");
        info!("Installing emulators: {}", emulators);

        let output = self
            .exec(&[
                "run",
                "--rm",
                "--privileged",
                installer_image,
                "--install",
                &emulators,
            ])
            .await
            .map_err(|e| EmulationError::Installer(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(EmulationError::Installer(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn inspect_builder(&self, name: &str) -> Result<Option<BuilderInfo>, BuilderError> {
        let output = self
            .exec(&["buildx", "inspect", name, "--bootstrap"])
            .await
            .map_err(|e| BuilderError::Inspect {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no builder") || stderr.contains("not found") {
                return Ok(None);
            }
            return Err(BuilderError::Inspect {
                name: name.to_string(),
                reason: stderr.trim().to_string(),
            });
        }

        Ok(Some(parse_builder_inspect(&String::from_utf8_lossy(
            &output.stdout,
        ))))
    }

    async fn create_builder(&self, name: &str, driver: DriverKind) -> Result<(), BuilderError> {
        info!("Creating builder {} ({})", name, driver);

        let output = self
            .exec(&["buildx", "create", "--name", name, "--driver", driver.as_str()])
            .await
            .map_err(|e| BuilderError::Create {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(BuilderError::Create {
                name: name.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn login(&self, registry: &str, credential: &Credential) -> Result<(), AuthError> {
        debug!("Logging in to {} as {}", registry, credential.username);

        let auth_error = |reason, detail: String| AuthError {
            registry: registry.to_string(),
            reason,
            detail,
        };

        let mut child = self
            .command()
            .args([
                "login",
                registry,
                "--username",
                credential.username.as_str(),
                "--password-stdin",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| auth_error(AuthFailure::Network, e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(credential.token.expose().as_bytes())
                .await
                .map_err(|e| auth_error(AuthFailure::Network, e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| auth_error(AuthFailure::Network, e.to_string()))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(auth_error(classify_login_failure(&stderr), stderr))
    }

    async fn build(
        &self,
        invocation: &BuildInvocation,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> Result<BuiltImage, BuildError> {
        let platform = invocation.platform;
        let metadata = tempfile::Builder::new()
            .prefix("metadata-")
            .suffix(".json")
            .tempfile_in(self.config_dir.path())
            .map_err(|source| BuildError::Spawn { platform, source })?;

        let args = build_args(invocation, metadata.path());
        debug!("Running build: docker {:?}", args);

        let mut child = self
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BuildError::Spawn { platform, source })?;

        let lines = stream_child_output(&mut child, on_output).await;
        let status = child
            .wait()
            .await
            .map_err(|source| BuildError::Spawn { platform, source })?;

        if !status.success() {
            return Err(BuildError::Failed {
                platform,
                code: status.code().unwrap_or(-1),
                output: build_error_output(&lines),
            });
        }

        let content = tokio::fs::read_to_string(metadata.path())
            .await
            .map_err(|e| BuildError::MissingDigest {
                platform,
                reason: e.to_string(),
            })?;
        let image_id = parse_metadata_digest(&content).map_err(|reason| {
            BuildError::MissingDigest { platform, reason }
        })?;

        debug!("image_id: {:?}", image_id);
        Ok(BuiltImage {
            local_ref: invocation.local_ref.clone(),
            image_id,
        })
    }

    async fn push(&self, local_ref: &str, target: &str) -> Result<String, PushError> {
        let output = self
            .exec(&["tag", local_ref, target])
            .await
            .map_err(|e| PushError::Tag {
                source_ref: local_ref.to_string(),
                target: target.to_string(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(PushError::Tag {
                source_ref: local_ref.to_string(),
                target: target.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!("Pushing {}", target);
        let output = self
            .exec(&["push", target])
            .await
            .map_err(|e| PushError::Rejected {
                target: target.to_string(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(PushError::Rejected {
                target: target.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_push_digest(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            PushError::MissingDigest {
                target: target.to_string(),
            }
        })
    }

    fn engine_name(&self) -> &'static str {
        "Docker Buildx"
    }
}

/// Arguments for one single-platform `buildx build`
fn build_args(invocation: &BuildInvocation, metadata_file: &Path) -> Vec<String> {
    let mut args = vec![
        "buildx".to_string(),
        "build".to_string(),
        "--builder".to_string(),
        invocation.builder.clone(),
        "--platform".to_string(),
        invocation.platform.docker_platform().to_string(),
        "--file".to_string(),
        invocation.dockerfile.display().to_string(),
        "--tag".to_string(),
        invocation.local_ref.clone(),
        "--load".to_string(),
        "--progress".to_string(),
        "plain".to_string(),
        "--metadata-file".to_string(),
        metadata_file.display().to_string(),
    ];

    for from in &invocation.cache_from {
        args.push("--cache-from".to_string());
        args.push(format!("type=local,src={}", from.display()));
    }

    if let Some(ref to) = invocation.cache_to {
        args.push("--cache-to".to_string());
        args.push(format!("type=local,dest={},mode=max", to.display()));
    }

    args.push(invocation.context.display().to_string());
    args
}

/// First candidate that exists as a directory
fn memory_backed_parent(candidates: &[PathBuf]) -> Option<&Path> {
    candidates
        .iter()
        .map(PathBuf::as_path)
        .find(|dir| dir.is_dir())
}

/// Platforms listed by the binfmt installer's status JSON
fn parse_binfmt_status(stdout: &str) -> Result<Vec<Platform>, String> {
    // The image may print log lines before the JSON document
    let start = stdout
        .find('{')
        .ok_or_else(|| "emulation status output contained no JSON".to_string())?;
    let status: BinfmtStatus =
        serde_json::from_str(&stdout[start..]).map_err(|e| e.to_string())?;

    let mut platforms: Vec<Platform> = status
        .supported
        .iter()
        .filter_map(|s| Platform::from_docker_platform(s))
        .collect();
    platforms.sort();
    platforms.dedup();
    Ok(platforms)
}

/// Pull name, driver, platforms and buildkit version out of `buildx inspect`
fn parse_builder_inspect(stdout: &str) -> BuilderInfo {
    let mut info = BuilderInfo {
        name: String::new(),
        driver: None,
        platforms: Vec::new(),
        buildkit_version: None,
    };

    for line in stdout.lines() {
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match field.trim() {
            // First Name: is the builder, later ones are nodes
            "Name" if info.name.is_empty() => info.name = value.to_string(),
            "Driver" => info.driver = DriverKind::parse(value),
            "Buildkit" | "BuildKit version" if info.buildkit_version.is_none() => {
                info.buildkit_version = Some(value.to_string())
            }
            "Platforms" => {
                for platform in value
                    .split(',')
                    .filter_map(|p| Platform::from_docker_platform(p.trim().trim_end_matches('*')))
                {
                    if !info.platforms.contains(&platform) {
                        info.platforms.push(platform);
                    }
                }
            }
            _ => {}
        }
    }

    info
}

/// Image id from the build metadata file
fn parse_metadata_digest(content: &str) -> Result<String, String> {
    let metadata: MetadataFile = serde_json::from_str(content).map_err(|e| e.to_string())?;
    metadata
        .config_digest
        .or(metadata.image_digest)
        .ok_or_else(|| "metadata file has no image digest".to_string())
}

/// Registry digest from `docker push` output (`<tag>: digest: sha256:... size: N`)
fn parse_push_digest(stdout: &str) -> Option<String> {
    stdout.lines().rev().find_map(|line| {
        let rest = &line[line.find("digest: ")? + "digest: ".len()..];
        let digest = rest.split_whitespace().next()?;
        digest.starts_with("sha256:").then(|| digest.to_string())
    })
}

/// Map `docker login` stderr to a failure reason
fn classify_login_failure(stderr: &str) -> AuthFailure {
    let lower = stderr.to_lowercase();

    if ["toomanyrequests", "too many requests", "429", "rate limit"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        AuthFailure::RateLimited
    } else if [
        "unauthorized",
        "incorrect username or password",
        "authentication required",
        "denied",
        "401",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
    {
        AuthFailure::InvalidCredentials
    } else {
        AuthFailure::Network
    }
}
