#![doc = "Common types shared across the powermeter workspace."]

pub mod config;
pub mod error;
pub mod metrics;
pub mod record;
pub mod state;
pub mod time;

pub use config::*;
pub use error::*;
pub use metrics::*;
pub use record::*;
pub use state::*;
pub use time::*;
