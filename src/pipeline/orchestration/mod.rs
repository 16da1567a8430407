pub mod instrument;
pub mod orchestrator;
pub mod registry;
pub mod service;
pub mod stages;

pub use orchestrator::{Dispatch, Orchestrator};
pub use registry::TaskRegistry;
pub use stages::{Collaborators, StageServices};
