//! Host storage operations
//!
//! Swap and image-store mounts are host-level state. The provisioner only
//! talks to them through [`HostSystem`]; [`LinuxHost`] is the real thing.

use crate::error::ProvisionError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

const GIB: u64 = 1024 * 1024 * 1024;

/// Host storage interface used by the provisioner
#[async_trait]
pub trait HostSystem: Send + Sync {
    /// Total active swap in bytes
    async fn swap_total_bytes(&self) -> Result<u64, ProvisionError>;

    /// Active swap provided by the file at `path`; 0 when it is not in use
    async fn swap_file_bytes(&self, path: &Path) -> Result<u64, ProvisionError>;

    /// Create and enable a swap file of `size_gb`, replacing any file
    /// already at `path`
    async fn create_swap(&self, path: &Path, size_gb: u32) -> Result<(), ProvisionError>;

    /// Size of the tmpfs mounted at `path`, or `None` if it is not a tmpfs
    async fn tmpfs_size_bytes(&self, path: &Path) -> Result<Option<u64>, ProvisionError>;

    /// Mount (or resize with `remount`) a tmpfs of `size_gb` at `path`
    async fn mount_tmpfs(&self, path: &Path, size_gb: u32, remount: bool)
        -> Result<(), ProvisionError>;

    /// Stop the build engine daemon
    async fn stop_daemon(&self, service: &str) -> Result<(), ProvisionError>;

    /// Start the build engine daemon
    async fn start_daemon(&self, service: &str) -> Result<(), ProvisionError>;
}

/// Linux host driven through standard system utilities
pub struct LinuxHost {
    sudo: bool,
}

impl LinuxHost {
    /// Create a host binding; `use_sudo` only applies when not already root
    pub async fn detect(use_sudo: bool) -> Self {
        let sudo = use_sudo && !running_as_root().await;
        debug!("Host commands run {}", if sudo { "through sudo" } else { "directly" });
        Self { sudo }
    }

    /// Run a privileged command, returning stderr on failure
    async fn run(&self, program: &str, args: &[&str]) -> Result<(), String> {
        let mut cmd = if self.sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("-n").arg(program);
            cmd
        } else {
            Command::new(program)
        };
        cmd.args(args);

        debug!("Executing: {} {:?} (sudo: {})", program, args, self.sudo);

        let output = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| format!("{}: {}", program, e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "{} exited with {}: {}",
                program,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

#[async_trait]
impl HostSystem for LinuxHost {
    async fn swap_total_bytes(&self) -> Result<u64, ProvisionError> {
        let content = tokio::fs::read_to_string("/proc/swaps")
            .await
            .map_err(|e| ProvisionError::Inspect(format!("/proc/swaps: {}", e)))?;
        Ok(parse_proc_swaps(&content))
    }

    async fn swap_file_bytes(&self, path: &Path) -> Result<u64, ProvisionError> {
        let content = tokio::fs::read_to_string("/proc/swaps")
            .await
            .map_err(|e| ProvisionError::Inspect(format!("/proc/swaps: {}", e)))?;
        Ok(parse_swap_file_bytes(&content, path))
    }

    async fn create_swap(&self, path: &Path, size_gb: u32) -> Result<(), ProvisionError> {
        let file = path.display().to_string();
        let swap_error = |reason: String| ProvisionError::Swap {
            path: path.to_path_buf(),
            size_gb,
            reason,
        };

        if self.swap_file_bytes(path).await? > 0 {
            self.run("swapoff", &[&file]).await.map_err(swap_error)?;
        }
        if path.exists() {
            self.run("rm", &["-f", &file]).await.map_err(swap_error)?;
        }

        let size = format!("{}G", size_gb);
        self.run("fallocate", &["-l", &size, &file])
            .await
            .map_err(swap_error)?;
        self.run("chmod", &["600", &file]).await.map_err(swap_error)?;
        self.run("mkswap", &[&file]).await.map_err(swap_error)?;
        self.run("swapon", &[&file]).await.map_err(swap_error)
    }

    async fn tmpfs_size_bytes(&self, path: &Path) -> Result<Option<u64>, ProvisionError> {
        let content = tokio::fs::read_to_string("/proc/mounts")
            .await
            .map_err(|e| ProvisionError::Inspect(format!("/proc/mounts: {}", e)))?;
        Ok(parse_tmpfs_size(&content, path))
    }

    async fn mount_tmpfs(
        &self,
        path: &Path,
        size_gb: u32,
        remount: bool,
    ) -> Result<(), ProvisionError> {
        let target = path.display().to_string();
        let mount_error = |reason: String| ProvisionError::Mount {
            path: path.to_path_buf(),
            size_gb,
            reason,
        };

        if remount {
            let options = format!("remount,size={}G", size_gb);
            return self
                .run("mount", &["-o", &options, &target])
                .await
                .map_err(mount_error);
        }

        self.run("mkdir", &["-p", &target])
            .await
            .map_err(mount_error)?;
        let options = format!("size={}G", size_gb);
        self.run("mount", &["-t", "tmpfs", "-o", &options, "tmpfs", &target])
            .await
            .map_err(mount_error)
    }

    async fn stop_daemon(&self, service: &str) -> Result<(), ProvisionError> {
        self.run("systemctl", &["stop", service])
            .await
            .map_err(|reason| ProvisionError::DaemonRestart {
                service: service.to_string(),
                reason,
            })
    }

    async fn start_daemon(&self, service: &str) -> Result<(), ProvisionError> {
        self.run("systemctl", &["start", service])
            .await
            .map_err(|reason| ProvisionError::DaemonRestart {
                service: service.to_string(),
                reason,
            })
    }
}

/// Whether the effective uid is 0, per `id -u`
async fn running_as_root() -> bool {
    match Command::new("id").arg("-u").output().await {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim() == "0"
        }
        _ => false,
    }
}

/// Size of the `/proc/swaps` entry for `path`, in bytes
fn parse_swap_file_bytes(content: &str, path: &Path) -> u64 {
    let wanted = path.to_string_lossy();
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let size = fields.nth(1)?.parse::<u64>().ok()?;
            (name == wanted).then_some(size * 1024)
        })
        .sum()
}

/// Sum the sizes (KiB) in `/proc/swaps`, returning bytes
fn parse_proc_swaps(content: &str) -> u64 {
    content
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(2)?.parse::<u64>().ok())
        .sum::<u64>()
        * 1024
}

/// Find a tmpfs mounted exactly at `path` in `/proc/mounts` and read its size
fn parse_tmpfs_size(content: &str, path: &Path) -> Option<u64> {
    let wanted = path.to_string_lossy();
    let wanted = wanted.trim_end_matches('/');

    // Later lines shadow earlier mounts at the same point
    content.lines().rev().find_map(|line| {
        let mut fields = line.split_whitespace();
        let _device = fields.next()?;
        let mount_point = fields.next()?;
        let fs_type = fields.next()?;
        let options = fields.next()?;

        if mount_point.trim_end_matches('/') != wanted {
            return None;
        }
        if fs_type != "tmpfs" {
            // Mounted, but not a tmpfs: stop looking further up
            return Some(None);
        }

        let size = options
            .split(',')
            .find_map(|opt| opt.strip_prefix("size="))
            .and_then(parse_size)
            .unwrap_or(0);
        Some(Some(size))
    })?
}

/// Parse mount sizes like `10485760k`, `10g`, `512m` or plain bytes
fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, multiplier) = match s.chars().last()? {
        'k' | 'K' => (&s[..s.len() - 1], 1024),
        'm' | 'M' => (&s[..s.len() - 1], 1024 * 1024),
        'g' | 'G' => (&s[..s.len() - 1], GIB),
        _ => (s, 1),
    };
    digits.parse::<u64>().ok().map(|n| n * multiplier)
}

/// Whole GiB, rounding up
pub(crate) fn bytes_to_gb_ceil(bytes: u64) -> u32 {
    bytes.div_ceil(GIB) as u32
}

/// GiB to bytes
pub(crate) fn gb_to_bytes(gb: u32) -> u64 {
    u64::from(gb) * GIB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proc_swaps_sums_entries() {
        let content = "\
Filename                                Type            Size            Used            Priority
/swapfile                               file            4194300         0               -2
/dev/sdb2                               partition       1048572         0               -3
";
        assert_eq!(parse_proc_swaps(content), (4194300 + 1048572) * 1024);
    }

    #[test]
    fn swap_file_entry_is_found_by_path() {
        let content = "\
Filename                                Type            Size            Used            Priority
/swapfile                               file            4194304         0               -2
/dev/sdb2                               partition       1048572         0               -3
";
        assert_eq!(
            parse_swap_file_bytes(content, Path::new("/swapfile")),
            4 * GIB
        );
        assert_eq!(parse_swap_file_bytes(content, Path::new("/mnt/swap")), 0);
    }

    #[test]
    fn proc_swaps_empty() {
        let content = "Filename\tType\tSize\tUsed\tPriority\n";
        assert_eq!(parse_proc_swaps(content), 0);
    }

    #[test]
    fn tmpfs_size_found() {
        let content = "\
/dev/root / ext4 rw,relatime 0 0
tmpfs /var/lib/docker tmpfs rw,relatime,size=10485760k 0 0
";
        assert_eq!(
            parse_tmpfs_size(content, Path::new("/var/lib/docker/")),
            Some(10 * GIB)
        );
    }

    #[test]
    fn tmpfs_size_absent_or_other_fs() {
        let content = "\
/dev/root / ext4 rw,relatime 0 0
/dev/sdb1 /var/lib/docker ext4 rw,relatime 0 0
";
        assert_eq!(parse_tmpfs_size(content, Path::new("/var/lib/docker")), None);
        assert_eq!(parse_tmpfs_size(content, Path::new("/mnt")), None);
    }

    #[test]
    fn tmpfs_later_mount_shadows_earlier() {
        let content = "\
/dev/sdb1 /var/lib/docker ext4 rw 0 0
tmpfs /var/lib/docker tmpfs rw,size=2g 0 0
";
        assert_eq!(
            parse_tmpfs_size(content, Path::new("/var/lib/docker")),
            Some(2 * GIB)
        );
    }

    #[test]
    fn size_suffixes() {
        assert_eq!(parse_size("1024"), Some(1024));
        assert_eq!(parse_size("4k"), Some(4096));
        assert_eq!(parse_size("3M"), Some(3 * 1024 * 1024));
        assert_eq!(parse_size("10g"), Some(10 * GIB));
        assert_eq!(parse_size("g"), None);
    }

    #[test]
    fn gb_conversions() {
        assert_eq!(bytes_to_gb_ceil(0), 0);
        assert_eq!(bytes_to_gb_ceil(1), 1);
        assert_eq!(bytes_to_gb_ceil(GIB), 1);
        assert_eq!(bytes_to_gb_ceil(GIB + 1), 2);
        assert_eq!(gb_to_bytes(10), 10 * GIB);
    }
}
