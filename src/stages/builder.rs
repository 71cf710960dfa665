//! Builder acquisition

use crate::config::schema::BuilderConfig;
use crate::config::DriverKind;
use crate::engine::BuildEngine;
use crate::error::BuilderError;
use crate::platform::Platform;
use serde::Serialize;
use tracing::{debug, info};

/// The build engine instance every platform of a run builds on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuilderHandle {
    pub name: String,
    pub driver: DriverKind,
    pub buildkit_version: Option<String>,
    pub platforms: Vec<Platform>,
}

/// Attach to the configured builder, creating it when it does not exist,
/// and check it can build every requested platform.
pub async fn acquire_builder(
    engine: &dyn BuildEngine,
    config: &BuilderConfig,
    platforms: &[Platform],
) -> Result<BuilderHandle, BuilderError> {
    let info = match engine.inspect_builder(&config.name).await? {
        Some(info) => {
            debug!("Reusing builder {}", config.name);
            info
        }
        None => {
            info!("Creating builder {} ({})", config.name, config.driver);
            engine.create_builder(&config.name, config.driver).await?;
            engine
                .inspect_builder(&config.name)
                .await?
                .ok_or_else(|| BuilderError::Create {
                    name: config.name.clone(),
                    reason: "builder missing after creation".to_string(),
                })?
        }
    };

    if let Some(actual) = info.driver {
        if actual != config.driver {
            return Err(BuilderError::DriverMismatch {
                name: config.name.clone(),
                expected: config.driver.to_string(),
                actual: actual.to_string(),
            });
        }
    }

    let missing: Vec<Platform> = platforms
        .iter()
        .copied()
        .filter(|p| !info.platforms.contains(p))
        .collect();
    if !missing.is_empty() {
        return Err(BuilderError::MissingPlatforms {
            name: config.name.clone(),
            missing,
        });
    }

    Ok(BuilderHandle {
        name: info.name,
        driver: config.driver,
        buildkit_version: info.buildkit_version,
        platforms: info.platforms,
    })
}
