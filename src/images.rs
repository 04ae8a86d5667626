//! Running a test body across the configured image matrix.

use std::fmt::Display;
use std::future::Future;

use opsprobe_core::HarnessConfig;
use opsprobe_core::ImageSpec;
use tracing::error;
use tracing::info;

use crate::error::HarnessError;
use crate::error::Result;

/// The configured image specs, parsed. An empty matrix is an error: a test
/// that runs against no images proves nothing.
pub fn image_specs(config: &HarnessConfig) -> Result<Vec<ImageSpec>> {
    let mut specs = Vec::with_capacity(config.image_specs.len());
    for raw in &config.image_specs {
        let spec = raw.parse().map_err(|source| HarnessError::Options {
            source: opsprobe_core::vm::VmOptionsError::BadImageSpec { source },
        })?;
        specs.push(spec);
    }
    if specs.is_empty() {
        return Err(HarnessError::NoImageSpecs);
    }
    Ok(specs)
}

/// The first configured image, for tests that only need one.
pub fn first_image_spec(config: &HarnessConfig) -> Result<ImageSpec> {
    image_specs(config)?.into_iter().next().ok_or(HarnessError::NoImageSpecs)
}

/// Run `body` once per configured image, in order.
///
/// Every image runs even after a failure; the failures are reported
/// together.
pub async fn for_each_image<F, Fut, E>(config: &HarnessConfig, mut body: F) -> Result<()>
where
    F: FnMut(ImageSpec) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: Display,
{
    let mut failures = Vec::new();
    for spec in image_specs(config)? {
        info!(image = %spec, "running test body");
        if let Err(e) = body(spec.clone()).await {
            error!(image = %spec, error = %e, "test body failed");
            failures.push((spec.to_string(), e.to_string()));
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(HarnessError::ImageFailures { failures })
    }
}
