//! Error types for playback setup
//!
//! Only subsystem-initialization failures surface as errors; per-message
//! and per-document problems are recovered locally and counted in the
//! playback report instead.

use thiserror::Error;

/// Fatal playback errors.
#[derive(Error, Debug)]
pub enum PlayerError {
    /// MIDI subsystem could not be initialized at all.
    #[error("MIDI initialization failed: {0}")]
    MidiInit(String),

    /// No MIDI output ports exist on this machine.
    #[error("no MIDI output ports available")]
    NoMidiPorts,

    /// The shared talkie UDP socket could not be bound.
    #[error("talkie socket bind failed: {0}")]
    SocketBind(#[from] std::io::Error),

    /// A sink send failed mid-playback; playback aborts rather than
    /// continuing against a dead output driver.
    #[error("send to {sink} failed: {reason}")]
    SendFailed { sink: String, reason: String },

    /// None of the supplied documents produced playable content.
    #[error("no playable content")]
    NothingToPlay,
}
