//! Scripted in-memory engine and host for tests

use super::host::HostSystem;
use super::runtime::{BuildEngine, BuildInvocation, BuilderInfo, BuiltImage};
use crate::config::DriverKind;
use crate::credentials::Credential;
use crate::error::{
    AuthError, AuthFailure, BuildError, BuilderError, EmulationError, Outcome, PushError,
    ProvisionError,
};
use crate::platform::Platform;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

/// Build engine that records every call and answers from a script
#[derive(Default)]
pub struct FakeEngine {
    pub calls: Mutex<Vec<String>>,
    /// Platforms the host can run; `None` means all of them
    pub supported: Mutex<Option<Vec<Platform>>>,
    /// Platforms the installer silently fails to register
    pub unemulatable: HashSet<Platform>,
    pub builder: Mutex<Option<BuilderInfo>>,
    /// Login outcomes consumed in order; empty means success
    pub login_script: Mutex<VecDeque<AuthFailure>>,
    pub failing_builds: HashSet<Platform>,
    /// Push targets that are rejected
    pub failing_pushes: HashSet<String>,
    /// Registry state: pushed reference to digest
    pub registry: Mutex<HashMap<String, String>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_build(mut self, platform: Platform) -> Self {
        self.failing_builds.insert(platform);
        self
    }

    pub fn fail_push(mut self, target: impl Into<String>) -> Self {
        self.failing_pushes.insert(target.into());
        self
    }

    pub fn with_logins(self, outcomes: impl IntoIterator<Item = AuthFailure>) -> Self {
        *self.login_script.lock().unwrap() = outcomes.into_iter().collect();
        self
    }

    pub fn with_builder(self, info: BuilderInfo) -> Self {
        *self.builder.lock().unwrap() = Some(info);
        self
    }

    pub fn with_supported(self, platforms: &[Platform]) -> Self {
        *self.supported.lock().unwrap() = Some(platforms.to_vec());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn digest_at(&self, reference: &str) -> Option<String> {
        self.registry.lock().unwrap().get(reference).cloned()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    /// Digest a built image for `platform` reports
    pub fn digest_for(platform: Platform) -> String {
        format!("sha256:{}-digest", platform.slug())
    }
}

/// Write one blob plus an index naming it, the way a buildx export would
fn export_cache(dir: &Path, platform: Platform, complete: bool) {
    let blobs = dir.join("blobs").join("sha256");
    std::fs::create_dir_all(&blobs).unwrap();

    let content = format!("layer for {}", platform.slug());
    let digest = hex::encode(Sha256::digest(content.as_bytes()));
    std::fs::write(blobs.join(&digest), content).unwrap();

    if complete {
        let manifest = format!(r#"{{"layers":[{{"digest":"sha256:{}"}}]}}"#, digest);
        let manifest_digest = hex::encode(Sha256::digest(manifest.as_bytes()));
        std::fs::write(blobs.join(&manifest_digest), manifest).unwrap();
        std::fs::write(
            dir.join("index.json"),
            format!(
                r#"{{"schemaVersion":2,"manifests":[{{"digest":"sha256:{}"}}]}}"#,
                manifest_digest
            ),
        )
        .unwrap();
    }
}

#[async_trait]
impl BuildEngine for FakeEngine {
    async fn ensure_available(&self) -> Outcome<()> {
        self.record("ensure_available".to_string());
        Ok(())
    }

    async fn supported_platforms(
        &self,
        _installer_image: &str,
    ) -> Result<Vec<Platform>, EmulationError> {
        self.record("supported_platforms".to_string());
        Ok(self
            .supported
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Platform::all().to_vec()))
    }

    async fn install_emulators(
        &self,
        _installer_image: &str,
        platforms: &[Platform],
    ) -> Result<(), EmulationError> {
        let names: Vec<&str> = platforms.iter().map(|p| p.emulator()).collect();
        self.record(format!("install_emulators {}", names.join(",")));

        let mut supported = self.supported.lock().unwrap();
        let list = supported.get_or_insert_with(Vec::new);
        for platform in platforms {
            if !self.unemulatable.contains(platform) && !list.contains(platform) {
                list.push(*platform);
            }
        }
        Ok(())
    }

    async fn inspect_builder(&self, name: &str) -> Result<Option<BuilderInfo>, BuilderError> {
        self.record(format!("inspect_builder {}", name));
        Ok(self.builder.lock().unwrap().clone())
    }

    async fn create_builder(&self, name: &str, driver: DriverKind) -> Result<(), BuilderError> {
        self.record(format!("create_builder {} {}", name, driver));
        *self.builder.lock().unwrap() = Some(BuilderInfo {
            name: name.to_string(),
            driver: Some(driver),
            platforms: Platform::all().to_vec(),
            buildkit_version: Some("v0.12.5".to_string()),
        });
        Ok(())
    }

    async fn login(&self, registry: &str, credential: &Credential) -> Result<(), AuthError> {
        self.record(format!("login {} {}", registry, credential.username));
        match self.login_script.lock().unwrap().pop_front() {
            None => Ok(()),
            Some(reason) => Err(AuthError {
                registry: registry.to_string(),
                reason,
                detail: "scripted failure".to_string(),
            }),
        }
    }

    async fn build(
        &self,
        invocation: &BuildInvocation,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> Result<BuiltImage, BuildError> {
        let platform = invocation.platform;
        let sources: Vec<&str> = invocation
            .cache_from
            .iter()
            .filter_map(|p| p.file_name()?.to_str()?.rsplit('.').next())
            .collect();
        self.record(format!(
            "build {} cache_from={}",
            platform.slug(),
            if sources.is_empty() {
                "-".to_string()
            } else {
                sources.join(",")
            }
        ));
        on_output("#1 [1/2] FROM base".to_string());

        let failing = self.failing_builds.contains(&platform);
        if let Some(dest) = &invocation.cache_to {
            // A failed build still exported the layers it finished
            export_cache(dest, platform, !failing);
        }

        if failing {
            return Err(BuildError::Failed {
                platform,
                code: 1,
                output: "error: scripted build failure".to_string(),
            });
        }

        on_output("#2 [2/2] RUN make".to_string());
        Ok(BuiltImage {
            local_ref: invocation.local_ref.clone(),
            image_id: Self::digest_for(platform),
        })
    }

    async fn push(&self, local_ref: &str, target: &str) -> Result<String, PushError> {
        self.record(format!("push {} {}", local_ref, target));
        if self.failing_pushes.contains(target) {
            return Err(PushError::Rejected {
                target: target.to_string(),
                reason: "scripted rejection".to_string(),
            });
        }

        let slug = local_ref.rsplit('-').next().unwrap_or(local_ref);
        let digest = format!("sha256:{}-digest", slug);
        self.registry
            .lock()
            .unwrap()
            .insert(target.to_string(), digest.clone());
        Ok(digest)
    }

    fn engine_name(&self) -> &'static str {
        "fake"
    }
}

/// Host with in-memory swap and mount state
#[derive(Default)]
pub struct FakeHost {
    pub calls: Mutex<Vec<String>>,
    pub swap_bytes: Mutex<u64>,
    /// Part of `swap_bytes` provided by the configured swap file
    pub swap_file_bytes: Mutex<u64>,
    pub tmpfs_bytes: Mutex<Option<u64>>,
    /// `create_swap` succeeds without enabling anything
    pub swapon_ignored: bool,
    pub fail_swap: bool,
    pub fail_mount: bool,
}

impl FakeHost {
    pub fn new(swap_bytes: u64, tmpfs_bytes: Option<u64>) -> Self {
        Self {
            swap_bytes: Mutex::new(swap_bytes),
            tmpfs_bytes: Mutex::new(tmpfs_bytes),
            ..Self::default()
        }
    }

    /// Count `bytes` of the existing swap as the configured swap file
    pub fn with_swap_file(self, bytes: u64) -> Self {
        *self.swap_file_bytes.lock().unwrap() = bytes;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl HostSystem for FakeHost {
    async fn swap_total_bytes(&self) -> Result<u64, ProvisionError> {
        Ok(*self.swap_bytes.lock().unwrap())
    }

    async fn swap_file_bytes(&self, _path: &Path) -> Result<u64, ProvisionError> {
        Ok(*self.swap_file_bytes.lock().unwrap())
    }

    async fn create_swap(&self, path: &Path, size_gb: u32) -> Result<(), ProvisionError> {
        self.record(format!("create_swap {} {}", path.display(), size_gb));
        if self.fail_swap {
            return Err(ProvisionError::Swap {
                path: path.to_path_buf(),
                size_gb,
                reason: "fallocate: No space left on device".to_string(),
            });
        }
        if self.swapon_ignored {
            return Ok(());
        }
        // The old file is switched off and replaced
        let new = super::host::gb_to_bytes(size_gb);
        let mut file = self.swap_file_bytes.lock().unwrap();
        let mut total = self.swap_bytes.lock().unwrap();
        *total = *total - *file + new;
        *file = new;
        Ok(())
    }

    async fn tmpfs_size_bytes(&self, _path: &Path) -> Result<Option<u64>, ProvisionError> {
        Ok(*self.tmpfs_bytes.lock().unwrap())
    }

    async fn mount_tmpfs(
        &self,
        path: &Path,
        size_gb: u32,
        remount: bool,
    ) -> Result<(), ProvisionError> {
        let verb = if remount { "remount" } else { "mount" };
        self.record(format!("{} {} {}", verb, path.display(), size_gb));
        if self.fail_mount {
            return Err(ProvisionError::Mount {
                path: path.to_path_buf(),
                size_gb,
                reason: "mount: permission denied".to_string(),
            });
        }
        *self.tmpfs_bytes.lock().unwrap() = Some(super::host::gb_to_bytes(size_gb));
        Ok(())
    }

    async fn stop_daemon(&self, service: &str) -> Result<(), ProvisionError> {
        self.record(format!("stop {}", service));
        Ok(())
    }

    async fn start_daemon(&self, service: &str) -> Result<(), ProvisionError> {
        self.record(format!("start {}", service));
        Ok(())
    }
}
