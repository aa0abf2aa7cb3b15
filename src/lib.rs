pub mod analysis;
pub mod camera;
pub mod config;
pub mod error;
pub mod logging;
pub mod pose;
pub mod protocol;
pub mod render;
pub mod scheduler;
pub mod session;

pub use error::{PipelineError, Stage};
