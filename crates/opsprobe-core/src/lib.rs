//! Shared building blocks for the opsprobe integration-test harness.
//!
//! This crate holds everything that does not talk to the outside world:
//!
//! - [`vm`]: VM records, managed instance groups and creation options
//! - [`image`]: image specs and the guest [`Platform`] they imply
//! - [`config`]: environment-driven [`HarnessConfig`]
//! - [`zones`]: weighted zone rotation
//! - [`context`]: cancellation and deadlines for cloud-facing calls
//! - [`retry`]: the classified retry loop used by every retried operation
//! - [`verified`]: pure parsing and classification functions
//! - [`constants`]: timeouts and attempt budgets

pub mod config;
pub mod constants;
pub mod context;
pub mod image;
pub mod retry;
pub mod verified;
pub mod vm;
pub mod zones;

pub use config::ConfigError;
pub use config::HarnessConfig;
pub use context::CallContext;
pub use context::DoneReason;
pub use image::ImageSpec;
pub use image::LinuxFamily;
pub use image::Platform;
pub use retry::RetryError;
pub use retry::RetryPolicy;
pub use retry::retry;
pub use verified::ErrorClass;
pub use verified::RpcCode;
pub use vm::ManagedInstanceGroupVm;
pub use vm::Os;
pub use vm::Vm;
pub use vm::VmOptions;
pub use zones::ZonePicker;
