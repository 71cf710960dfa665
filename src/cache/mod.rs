//! Persistent build cache
//!
//! Content-addressed store shared by every platform build. Blobs are keyed
//! by their SHA-256 and shared across platforms; each platform owns its own
//! index under a platform-qualified [`CacheKey`], so one architecture's
//! export never replaces another's.
//!
//! # Lifecycle
//!
//! | Step | Call | buildx flag |
//! |------|------|-------------|
//! | Read | [`CacheStore::get`] | `--cache-from type=local,src=<path>` |
//! | Export | [`CacheStore::stage`] | `--cache-to type=local,dest=<path>` |
//! | Commit | [`CacheStore::put`] | after the build, success or not |
//!
//! The store accumulates across runs. It is only reset by `multipush cache
//! clear`.

pub mod key;
pub mod store;

pub use key::CacheKey;
pub use store::{CacheEntry, CacheSource, CacheStaging, CacheStore, CommitStats};

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
