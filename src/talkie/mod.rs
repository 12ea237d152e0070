//! Talkie: JSON control messages over UDP
//!
//! Talkie devices are addressed by symbolic name. Until a device's IP is
//! discovered from its reply traffic, messages to it go out as
//! broadcasts on the device's port.

pub mod checksum;
pub mod discovery;
pub mod socket;

pub use checksum::talkie_checksum;
pub use discovery::poll_discovery;
pub use socket::{TalkieRegistry, TalkieSink, TalkieSocket};

/// Message codes carried in a talkie message's `m` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageCode {
    Talk = 0,
    List = 1,
    Run = 2,
    Set = 3,
    Get = 4,
    Sys = 5,
    Echo = 6,
    Error = 7,
    Channel = 8,
}

impl MessageCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}
