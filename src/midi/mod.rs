//! MIDI output: message decoding, port sinks, and redundancy elimination

pub mod device;
pub mod message;
pub mod normalize;

pub use device::{MidiRegistry, MidirBackend, PortBackend, PortConnection};
pub use message::{decode_midi_message, InvalidMessage};
pub use normalize::normalize;
