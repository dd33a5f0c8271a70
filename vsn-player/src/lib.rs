//! # Voice Sending Node Player Library (vsn-player)
//!
//! Per-guild playback core of the voice sending node.
//!
//! **Purpose:** Own one guild's playback state, deliver 20 ms frames to a
//! real-time transport, track delivery loss, apply audio filters and export
//! tracks as opaque handles.
//!
//! **Architecture:** [`player::Player`] drives an [`engine::AudioEngine`];
//! the reference [`engine::local::LocalEngine`] decodes with symphonia,
//! resamples with rubato and buffers through a ringbuf decode worker.

pub mod codec;
pub mod engine;
pub mod error;
pub mod filters;
pub mod player;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
pub use filters::FilterChain;
pub use player::Player;
pub use session::{SessionContext, SessionHandle};
