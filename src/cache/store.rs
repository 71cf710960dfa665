//! Content-addressed build cache store
//!
//! Layout under the store root:
//!
//! ```text
//! blobs/sha256/<hex>      shared blobs, write-once, named by digest
//! index/<key>/index.json  per-key buildx index (plus oci-layout etc.)
//! index/<key>/blobs  ->   ../../blobs, so the key dir is a buildx cache source
//! staging/<key>-<uuid>/   in-flight cache exports
//! ```
//!
//! Commits never truncate anything in place. Blobs are verified and renamed
//! into the shared directory first, then index files are renamed over the
//! old ones. A process killed mid-commit leaves either the old or the new
//! index, and every blob either index names is present.

use super::key::CacheKey;
use crate::error::CacheError;
use crate::platform::Platform;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

const BLOBS_DIR: &str = "blobs";
const INDEX_DIR: &str = "index";
const STAGING_DIR: &str = "staging";
const INDEX_FILE: &str = "index.json";
const HASH_CHUNK: usize = 64 * 1024;

/// A committed cache index, readable by buildx as `type=local,src=<path>`
#[derive(Debug, Clone)]
pub struct CacheSource {
    pub key: CacheKey,
    pub path: PathBuf,
}

/// A fresh directory for buildx to export into (`type=local,dest=<path>`)
#[derive(Debug)]
pub struct CacheStaging {
    pub key: CacheKey,
    pub path: PathBuf,
}

/// What a commit did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Blobs moved into the shared store
    pub added: usize,
    /// Blobs that were already present
    pub reused: usize,
    /// Blobs discarded because their content did not match their name
    pub corrupt: usize,
    /// Whether the key's index was replaced
    pub index_updated: bool,
}

/// One key's committed index, as listed by [`CacheStore::entries`]
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub updated_at: DateTime<Utc>,
    /// Blobs referenced by the index
    pub blobs: usize,
    /// Referenced blobs missing from the store
    pub missing: usize,
    /// Total size of the referenced blobs that are present
    pub size_bytes: u64,
}

/// Partial OCI index / manifest, enough to follow blob references
#[derive(Deserialize)]
struct Descriptor {
    digest: String,
}

#[derive(Deserialize)]
struct IndexDoc {
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

#[derive(Deserialize)]
struct ManifestDoc {
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

/// The build cache shared by every platform of every run
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Staging directories left behind by a killed run are salvaged: their
    /// verified blobs are kept, their indexes are dropped.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let store = Self { root: root.into() };

        for dir in [store.blobs_dir(), store.index_root(), store.staging_root()] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| CacheError::io(format!("creating {}", dir.display()), e))?;
        }

        store.recover_staging().await?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blobs_dir(&self) -> PathBuf {
        self.root.join(BLOBS_DIR).join("sha256")
    }

    fn index_root(&self) -> PathBuf {
        self.root.join(INDEX_DIR)
    }

    fn index_dir(&self, key: &CacheKey) -> PathBuf {
        self.index_root().join(key.to_string())
    }

    fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Look up the committed cache for `key`; `None` on a miss
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheSource>, CacheError> {
        let dir = self.index_dir(key);
        if !fs::try_exists(dir.join(INDEX_FILE)).await.unwrap_or(false) {
            debug!("Cache miss for {}", key);
            return Ok(None);
        }

        ensure_blobs_link(&dir).await?;
        debug!("Cache hit for {}", key);
        Ok(Some(CacheSource {
            key: key.clone(),
            path: dir,
        }))
    }

    /// Every committed index of `key`'s image scope, `key` itself first and
    /// the other platforms after it in canonical order. Layers that do not
    /// depend on the architecture resolve through any of them.
    pub async fn sources(&self, key: &CacheKey) -> Result<Vec<CacheSource>, CacheError> {
        let mut sources = Vec::new();
        if let Some(own) = self.get(key).await? {
            sources.push(own);
        }
        for &platform in Platform::all() {
            if platform == key.platform() {
                continue;
            }
            if let Some(sibling) = self.get(&key.for_platform(platform)).await? {
                sources.push(sibling);
            }
        }
        Ok(sources)
    }

    /// Allocate an empty staging directory for `key`
    pub async fn stage(&self, key: &CacheKey) -> Result<CacheStaging, CacheError> {
        let path = self
            .staging_root()
            .join(format!("{}-{}", key, Uuid::new_v4().simple()));
        fs::create_dir_all(&path)
            .await
            .map_err(|e| CacheError::io(format!("creating {}", path.display()), e))?;

        Ok(CacheStaging {
            key: key.clone(),
            path,
        })
    }

    /// Commit a staging directory. Works for failed builds too: whatever
    /// blobs were exported are kept, and the index is only replaced when the
    /// export wrote one.
    pub async fn put(&self, staging: CacheStaging) -> Result<CommitStats, CacheError> {
        let mut stats = self.absorb_blobs(&staging.path).await?;

        let index_dir = self.index_dir(&staging.key);
        if fs::try_exists(staging.path.join(INDEX_FILE))
            .await
            .unwrap_or(false)
        {
            fs::create_dir_all(&index_dir)
                .await
                .map_err(|e| CacheError::io(format!("creating {}", index_dir.display()), e))?;
            ensure_blobs_link(&index_dir).await?;
            replace_index_files(&staging.path, &index_dir).await?;
            stats.index_updated = true;
        }

        remove_dir_quietly(&staging.path).await;

        info!(
            "Committed cache {}: {} new, {} reused, {} corrupt, index {}",
            staging.key,
            stats.added,
            stats.reused,
            stats.corrupt,
            if stats.index_updated { "updated" } else { "kept" }
        );
        Ok(stats)
    }

    /// List committed indexes with their referenced sizes
    pub async fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries = Vec::new();
        let mut dir = match fs::read_dir(self.index_root()).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(CacheError::io("reading cache index directory", e)),
        };

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io("reading cache index directory", e))?
        {
            let name = item.file_name().to_string_lossy().to_string();
            let key = match CacheKey::parse(&name) {
                Ok(key) => key,
                Err(_) => {
                    warn!("Ignoring unexpected cache index entry: {}", name);
                    continue;
                }
            };

            let index_path = item.path().join(INDEX_FILE);
            let meta = match fs::metadata(&index_path).await {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            let updated_at = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            let digests = self.referenced_digests(&index_path).await?;
            let mut size_bytes = 0;
            let mut missing = 0;
            for digest in &digests {
                match fs::metadata(self.blobs_dir().join(digest)).await {
                    Ok(m) => size_bytes += m.len(),
                    Err(_) => missing += 1,
                }
            }

            entries.push(CacheEntry {
                key,
                updated_at,
                blobs: digests.len(),
                missing,
                size_bytes,
            });
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Total bytes held in the shared blob directory
    pub async fn total_size(&self) -> Result<u64, CacheError> {
        let mut total = 0;
        let mut dir = match fs::read_dir(self.blobs_dir()).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::io("reading blob directory", e)),
        };
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io("reading blob directory", e))?
        {
            if let Ok(meta) = item.metadata().await {
                total += meta.len();
            }
        }
        Ok(total)
    }

    /// Remove every index and blob. Only ever called on explicit request.
    pub async fn clear(&self) -> Result<(), CacheError> {
        for dir in [self.root.join(BLOBS_DIR), self.index_root(), self.staging_root()] {
            match fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(CacheError::io(format!("removing {}", dir.display()), e))
                }
            }
        }

        for dir in [self.blobs_dir(), self.index_root(), self.staging_root()] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| CacheError::io(format!("creating {}", dir.display()), e))?;
        }

        info!("Cleared cache store at {}", self.root.display());
        Ok(())
    }

    /// Verify and move every staged blob into the shared directory
    async fn absorb_blobs(&self, staging: &Path) -> Result<CommitStats, CacheError> {
        let mut stats = CommitStats::default();
        let staged_blobs = staging.join(BLOBS_DIR).join("sha256");

        let mut dir = match fs::read_dir(&staged_blobs).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => {
                return Err(CacheError::io(
                    format!("reading {}", staged_blobs.display()),
                    e,
                ))
            }
        };

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(format!("reading {}", staged_blobs.display()), e))?
        {
            let name = item.file_name().to_string_lossy().to_string();
            let source = item.path();

            if !is_sha256_hex(&name) || sha256_file(&source).await? != name {
                debug!("Discarding corrupt staged blob {}", name);
                stats.corrupt += 1;
                continue;
            }

            let target = self.blobs_dir().join(&name);
            if fs::try_exists(&target).await.unwrap_or(false) {
                stats.reused += 1;
                continue;
            }

            fs::rename(&source, &target)
                .await
                .map_err(|e| CacheError::io(format!("storing blob {}", name), e))?;
            stats.added += 1;
        }

        Ok(stats)
    }

    /// Salvage blobs from staging directories a previous run never committed
    async fn recover_staging(&self) -> Result<(), CacheError> {
        let mut dir = fs::read_dir(self.staging_root())
            .await
            .map_err(|e| CacheError::io("reading staging directory", e))?;

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io("reading staging directory", e))?
        {
            let path = item.path();
            let stats = self.absorb_blobs(&path).await?;
            warn!(
                "Recovered abandoned cache staging {} ({} blobs salvaged)",
                path.display(),
                stats.added
            );
            remove_dir_quietly(&path).await;
        }

        Ok(())
    }

    /// Digests referenced by an index: its manifests plus their config and
    /// layers
    async fn referenced_digests(&self, index_path: &Path) -> Result<Vec<String>, CacheError> {
        let content = fs::read(index_path)
            .await
            .map_err(|e| CacheError::io(format!("reading {}", index_path.display()), e))?;

        let index: IndexDoc = match serde_json::from_slice(&content) {
            Ok(index) => index,
            Err(e) => {
                warn!("Unreadable cache index {}: {}", index_path.display(), e);
                return Ok(Vec::new());
            }
        };

        let mut seen = HashSet::new();
        let mut digests = Vec::new();
        let mut push = |digest: &str| {
            if let Some(hex) = digest.strip_prefix("sha256:") {
                if seen.insert(hex.to_string()) {
                    digests.push(hex.to_string());
                }
            }
        };

        for manifest in &index.manifests {
            push(&manifest.digest);

            let Some(hex) = manifest.digest.strip_prefix("sha256:") else {
                continue;
            };
            let Ok(bytes) = fs::read(self.blobs_dir().join(hex)).await else {
                continue;
            };
            if let Ok(doc) = serde_json::from_slice::<ManifestDoc>(&bytes) {
                if let Some(config) = &doc.config {
                    push(&config.digest);
                }
                for layer in &doc.layers {
                    push(&layer.digest);
                }
            }
        }

        Ok(digests)
    }
}

fn is_sha256_hex(name: &str) -> bool {
    name.len() == 64 && name.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

/// Hash a file in chunks; blobs can be large layers
async fn sha256_file(path: &Path) -> Result<String, CacheError> {
    let mut file = fs::File::open(path)
        .await
        .map_err(|e| CacheError::io(format!("opening {}", path.display()), e))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| CacheError::io(format!("reading {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Rename every top-level file of the staging dir over the index dir
async fn replace_index_files(staging: &Path, index_dir: &Path) -> Result<(), CacheError> {
    let mut dir = fs::read_dir(staging)
        .await
        .map_err(|e| CacheError::io(format!("reading {}", staging.display()), e))?;

    // index.json goes last so the other metadata is in place when it flips
    let mut deferred = None;
    while let Some(item) = dir
        .next_entry()
        .await
        .map_err(|e| CacheError::io(format!("reading {}", staging.display()), e))?
    {
        let is_file = item.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        if item.file_name() == INDEX_FILE {
            deferred = Some(item.path());
            continue;
        }
        let target = index_dir.join(item.file_name());
        fs::rename(item.path(), &target)
            .await
            .map_err(|e| CacheError::io(format!("replacing {}", target.display()), e))?;
    }

    if let Some(index) = deferred {
        let target = index_dir.join(INDEX_FILE);
        fs::rename(&index, &target)
            .await
            .map_err(|e| CacheError::io(format!("replacing {}", target.display()), e))?;
    }

    Ok(())
}

/// Point `<index_dir>/blobs` at the shared blob directory
async fn ensure_blobs_link(index_dir: &Path) -> Result<(), CacheError> {
    let link = index_dir.join(BLOBS_DIR);
    if fs::symlink_metadata(&link).await.is_ok() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        let target = Path::new("..").join("..").join(BLOBS_DIR);
        fs::symlink(&target, &link)
            .await
            .map_err(|e| CacheError::io(format!("linking {}", link.display()), e))
    }

    #[cfg(not(unix))]
    {
        Err(CacheError::io(
            format!("linking {}", link.display()),
            std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "cache store requires symlink support",
            ),
        ))
    }
}

async fn remove_dir_quietly(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path).await {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}
