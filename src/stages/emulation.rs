//! Emulation registration for foreign platforms

use crate::engine::BuildEngine;
use crate::error::EmulationError;
use crate::platform::Platform;
use tracing::{debug, info};

/// Install emulation handlers for every requested platform the host cannot
/// already run. Platforms that are already registered, and the native one,
/// are left alone. Returns the platforms that were newly installed.
pub async fn register_emulation(
    engine: &dyn BuildEngine,
    installer_image: &str,
    platforms: &[Platform],
    native: Option<Platform>,
) -> Result<Vec<Platform>, EmulationError> {
    let foreign: Vec<Platform> = platforms
        .iter()
        .copied()
        .filter(|p| Some(*p) != native)
        .collect();

    if foreign.is_empty() {
        debug!("All requested platforms are native, no emulation needed");
        return Ok(Vec::new());
    }

    let supported = engine.supported_platforms(installer_image).await?;
    let missing: Vec<Platform> = foreign
        .iter()
        .copied()
        .filter(|p| !supported.contains(p))
        .collect();

    if missing.is_empty() {
        debug!("Emulation already registered for {:?}", foreign);
        return Ok(Vec::new());
    }

    info!("Installing emulation for {:?}", missing);
    engine.install_emulators(installer_image, &missing).await?;

    // Trust the kernel, not the installer's exit code
    let supported = engine.supported_platforms(installer_image).await?;
    let unsupported: Vec<Platform> = missing
        .iter()
        .copied()
        .filter(|p| !supported.contains(p))
        .collect();

    if !unsupported.is_empty() {
        return Err(EmulationError::Unsupported(unsupported));
    }

    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use std::collections::HashSet;

    const INSTALLER: &str = "tonistiigi/binfmt:latest";

    #[tokio::test]
    async fn installs_only_missing_foreign_platforms() {
        let engine = FakeEngine::new().with_supported(&[Platform::Amd64]);
        let installed = register_emulation(
            &engine,
            INSTALLER,
            Platform::all(),
            Some(Platform::Amd64),
        )
        .await
        .unwrap();

        assert_eq!(installed, vec![Platform::Armv7, Platform::Aarch64]);
        assert_eq!(
            engine.calls_starting_with("install_emulators"),
            vec!["install_emulators arm,arm64"]
        );
    }

    #[tokio::test]
    async fn already_registered_is_a_no_op() {
        let engine = FakeEngine::new();
        let installed =
            register_emulation(&engine, INSTALLER, Platform::all(), Some(Platform::Amd64))
                .await
                .unwrap();

        assert!(installed.is_empty());
        assert!(engine.calls_starting_with("install_emulators").is_empty());
    }

    #[tokio::test]
    async fn native_only_skips_the_installer() {
        let engine = FakeEngine::new();
        register_emulation(&engine, INSTALLER, &[Platform::Amd64], Some(Platform::Amd64))
            .await
            .unwrap();
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn names_every_platform_that_cannot_be_emulated() {
        let engine = FakeEngine {
            unemulatable: HashSet::from([Platform::Armv7, Platform::Aarch64]),
            ..FakeEngine::new()
        }
        .with_supported(&[Platform::Amd64]);

        let err = register_emulation(&engine, INSTALLER, Platform::all(), Some(Platform::Amd64))
            .await
            .unwrap_err();

        match err {
            EmulationError::Unsupported(platforms) => {
                assert_eq!(platforms, vec![Platform::Armv7, Platform::Aarch64])
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
