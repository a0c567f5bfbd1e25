pub mod civil;
pub mod config;
pub mod error;
pub mod types;

pub use civil::*;
pub use config::Config;
pub use error::{ChatterlogError, Result};
pub use types::*;
