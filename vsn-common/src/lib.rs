//! # VSN Common Library
//!
//! Shared code for the voice sending node crates:
//! - Error type shared by configuration and helpers
//! - Outbound message types sent to the controller
//! - Node configuration loading
//! - Time utilities

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use events::{OutboundMessage, PlayerState};
