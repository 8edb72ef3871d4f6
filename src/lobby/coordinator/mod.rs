mod driver;
mod service;
mod state;
mod transition;

pub use driver::CoordinatorDriver;
pub use service::Coordinator;
pub use state::{Phase, Stage};
pub use transition::{Decision, StartAction, decide};
