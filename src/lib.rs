//! Real-time full-duplex voice sessions.
//!
//! Microphone audio is framed, encoded as PCM16 and streamed to a remote
//! conversational endpoint; the audio coming back is scheduled for gapless
//! playback and can be cut off at any moment by a barge-in.

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod net_link;
pub mod protocol;
pub mod status;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use controller::{SessionController, SessionHandle};
pub use error::{SessionError, SessionResult};
pub use net_link::WsTransport;
pub use status::{SessionState, SessionStatus};
pub use transport::{Transport, TransportEvent, TransportLink};
