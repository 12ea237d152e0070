//! Timeline playback engine for "Json Midi Player" files
//!
//! Ingests JSON timeline documents and plays them back in real time:
//! - Raw MIDI byte streams to local output ports (via midir)
//! - JSON "talkie" control datagrams to networked devices over UDP
//!
//! The pipeline is: build pins from JSON → sort by (time, priority) →
//! redundancy elimination → high-resolution scheduling, with opportunistic
//! address discovery interleaved into scheduler idle time.

pub mod clock;
pub mod error;
pub mod midi;
pub mod pin;
pub mod player;
pub mod report;
pub mod rt;
pub mod talkie;
pub mod timeline;

pub use error::PlayerError;
pub use pin::{Payload, Pin, PinId, SinkId, Worklist};
pub use player::{play_documents, PlayOptions};
pub use report::PlayReporting;

/// Document type accepted in the input envelope.
pub const FILE_TYPE: &str = "Json Midi Player";

/// Envelope URL marking a MIDI timeline document.
pub const MIDI_FILE_URL: &str = "https://github.com/ruiseixasm/JsonMidiPlayer";

/// Envelope URL marking a talkie timeline document.
pub const TALKIE_FILE_URL: &str = "https://github.com/ruiseixasm/JsonTalkiePlayer";

/// Duration of a single MIDI clock pulse at 120 BPM, 24 PPQN, in ms.
///
/// A dispatch that overshoots its deadline by more than one pulse is
/// treated as the system falling behind: the excess becomes drag and
/// shifts every later deadline.
pub const DRAG_DURATION_MS: f64 = 1000.0 / ((120.0 / 60.0) * 24.0);

/// UDP port talkie devices reply on.
pub const TALKIE_REPLY_PORT: u16 = 5005;
