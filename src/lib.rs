pub mod types;
pub mod error;
pub mod time;
pub mod data;
pub mod pipeline;
pub mod collaborators;
pub mod config;

pub use types::*;
pub use error::{PipelineError, Result};
