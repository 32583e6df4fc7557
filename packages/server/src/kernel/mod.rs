//! Orchestration engine and its seams.

pub mod engine;
#[allow(clippy::module_inception)]
pub mod kernel;
pub mod platform;
pub mod stream_hub;

pub use kernel::Kernel;
pub use platform::{ActionReceipt, PlatformClient, PlatformError};
pub use stream_hub::StreamHub;
