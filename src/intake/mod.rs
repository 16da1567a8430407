pub mod mqtt;
pub mod queue;
pub mod source;

pub use mqtt::MqttEventSource;
pub use queue::{OverflowPolicy, Pushed, WorkQueue};
pub use source::EventSource;
