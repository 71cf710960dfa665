//! Environment provisioning: swap and the image-store mount
//!
//! Runs before anything touches the image store. Nothing here is retried;
//! a half-provisioned host is reported as-is and the run stops.

use crate::config::schema::HostConfig;
use crate::engine::host::{bytes_to_gb_ceil, gb_to_bytes};
use crate::engine::HostSystem;
use crate::error::ProvisionError;
use serde::Serialize;
use tracing::{debug, info};

/// What happened to the image-store mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountAction {
    /// No tmpfs was there; a fresh one was mounted
    Mounted,
    /// A tmpfs of the wrong size was resized
    Remounted,
    /// The right tmpfs was already in place
    Unchanged,
}

/// Result of a successful provisioning pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionSummary {
    /// Swap added this run, in GB
    pub swap_added_gb: Option<u32>,
    pub mount: MountAction,
    /// Whether the daemon was restarted to pick up the mount
    pub daemon_restarted: bool,
}

/// Make sure the host has `min_swap_gb` of swap and a tmpfs image store of
/// exactly `image_store_size_gb`, restarting the daemon around mount changes.
pub async fn provision(
    host: &dyn HostSystem,
    config: &HostConfig,
) -> Result<ProvisionSummary, ProvisionError> {
    let swap_added_gb = ensure_swap(host, config).await?;

    let wanted = gb_to_bytes(config.image_store_size_gb);
    let current = host.tmpfs_size_bytes(&config.image_store_path).await?;
    let mount = match current {
        Some(size) if size == wanted => MountAction::Unchanged,
        Some(_) => MountAction::Remounted,
        None => MountAction::Mounted,
    };

    if mount == MountAction::Unchanged {
        debug!(
            "Image store at {} already a {} GB tmpfs",
            config.image_store_path.display(),
            config.image_store_size_gb
        );
        return Ok(ProvisionSummary {
            swap_added_gb,
            mount,
            daemon_restarted: false,
        });
    }

    // The daemon holds the image store open; it must be down while it moves
    host.stop_daemon(&config.daemon_service).await?;
    host.mount_tmpfs(
        &config.image_store_path,
        config.image_store_size_gb,
        mount == MountAction::Remounted,
    )
    .await?;
    host.start_daemon(&config.daemon_service).await?;

    info!(
        "Image store {} as {} GB tmpfs at {}",
        if mount == MountAction::Mounted { "mounted" } else { "resized" },
        config.image_store_size_gb,
        config.image_store_path.display()
    );

    Ok(ProvisionSummary {
        swap_added_gb,
        mount,
        daemon_restarted: true,
    })
}

/// Top up swap to the configured minimum; returns the GB added, if any.
///
/// The swap file is replaced rather than extended, so its current size
/// does not count toward the minimum when sizing the new one.
async fn ensure_swap(
    host: &dyn HostSystem,
    config: &HostConfig,
) -> Result<Option<u32>, ProvisionError> {
    let current = host.swap_total_bytes().await?;
    let wanted = gb_to_bytes(config.min_swap_gb);

    if current >= wanted {
        debug!("Swap already at {} bytes, nothing to add", current);
        return Ok(None);
    }

    let own = host.swap_file_bytes(&config.swap_file).await?;
    let elsewhere = current.saturating_sub(own);
    let file_gb = bytes_to_gb_ceil(wanted - elsewhere);
    host.create_swap(&config.swap_file, file_gb).await?;

    let after = host.swap_total_bytes().await?;
    if after < wanted {
        return Err(ProvisionError::Swap {
            path: config.swap_file.clone(),
            size_gb: file_gb,
            reason: format!(
                "swap is {} bytes after swapon, below the {} GB minimum",
                after, config.min_swap_gb
            ),
        });
    }

    let added = bytes_to_gb_ceil(after - current);
    info!(
        "Swap file {} is now {} GB ({} GB added)",
        config.swap_file.display(),
        file_gb,
        added
    );
    Ok(Some(added))
}
