pub mod common;
pub mod config;
pub mod coordinator;
#[cfg(any(test, feature = "test-support"))]
pub mod doubles;
pub mod error;
pub mod intake;
pub mod pipeline;

pub use config::{ConfigProvider, Settings, SharedConfig};
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use error::AppError;
