//! MIDI output devices
//!
//! Enumerates the machine's MIDI output ports and connects to them on
//! demand. Ports are resolved by fuzzy name match: a timeline names a
//! device by any substring of its port name. Opening is idempotent and a
//! port that fails to open once is latched unavailable and never
//! retried.
//!
//! The registry talks to ports through the `PortBackend` seam so tests
//! can run against a recording backend instead of real hardware.

use std::collections::{HashMap, HashSet};

use midir::MidiOutput;

use crate::error::PlayerError;

/// An open connection that accepts one complete MIDI message per send.
pub trait PortConnection {
    fn send(&mut self, message: &[u8]) -> Result<(), String>;
}

/// Enumerates output ports and opens connections to them.
pub trait PortBackend {
    /// Names of the available output ports, in port order.
    fn port_names(&self) -> Result<Vec<String>, String>;
    /// Open a connection to the port at `index`.
    fn open(&self, index: usize) -> Result<Box<dyn PortConnection>, String>;
}

/// The midir-based backend used outside of tests.
pub struct MidirBackend;

impl PortBackend for MidirBackend {
    fn port_names(&self) -> Result<Vec<String>, String> {
        let midi_out = MidiOutput::new("json-midi-player-enumerate")
            .map_err(|e| format!("Failed to create MIDI output: {}", e))?;

        let ports = midi_out.ports();
        let mut names = Vec::with_capacity(ports.len());
        for (index, port) in ports.iter().enumerate() {
            let name = midi_out
                .port_name(port)
                .unwrap_or_else(|_| format!("Unknown Device {}", index));
            names.push(name);
        }
        Ok(names)
    }

    fn open(&self, index: usize) -> Result<Box<dyn PortConnection>, String> {
        let midi_out = MidiOutput::new("json-midi-player-output")
            .map_err(|e| format!("Failed to create MIDI output: {}", e))?;

        let ports = midi_out.ports();
        let port = ports
            .get(index)
            .ok_or_else(|| format!("Port index {} not found", index))?;

        let connection = midi_out
            .connect(port, "json-midi-player-out")
            .map_err(|e| format!("Failed to connect to MIDI port: {}", e))?;

        Ok(Box::new(MidirConnection { connection }))
    }
}

struct MidirConnection {
    connection: midir::MidiOutputConnection,
}

impl PortConnection for MidirConnection {
    fn send(&mut self, message: &[u8]) -> Result<(), String> {
        self.connection
            .send(message)
            .map_err(|e| format!("MIDI send failed: {}", e))
    }
}

/// One enumerated output port and its connection state.
struct MidiSink {
    name: String,
    index: usize,
    connection: Option<Box<dyn PortConnection>>,
    unavailable: bool,
}

/// All of the machine's MIDI output ports, resolved and opened lazily.
pub struct MidiRegistry {
    backend: Box<dyn PortBackend>,
    sinks: Vec<MidiSink>,
    /// Requested-name → sink index cache; `None` records an open failure.
    resolved: HashMap<String, Option<usize>>,
    /// Requested names known to match no port at all.
    unmatched: HashSet<String>,
}

impl MidiRegistry {
    /// Enumerate output ports through `backend`.
    pub fn new(backend: Box<dyn PortBackend>) -> Result<Self, PlayerError> {
        let names = backend.port_names().map_err(PlayerError::MidiInit)?;
        if names.is_empty() {
            return Err(PlayerError::NoMidiPorts);
        }

        log::info!("Available MIDI output ports:");
        let sinks = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| {
                log::info!("    port #{}: {}", index, name);
                MidiSink {
                    name,
                    index,
                    connection: None,
                    unavailable: false,
                }
            })
            .collect();

        Ok(Self {
            backend,
            sinks,
            resolved: HashMap::new(),
            unmatched: HashSet::new(),
        })
    }

    /// Name of the port behind sink `index`.
    pub fn sink_name(&self, index: usize) -> &str {
        &self.sinks[index].name
    }

    /// Resolve a requested device name to one open sink.
    ///
    /// Fuzzy match: the requested name may be any substring of the port
    /// name. The first port that matches and opens wins. Results (and
    /// failures) are cached per requested name.
    pub fn resolve(&mut self, requested: &str) -> Option<usize> {
        if let Some(&cached) = self.resolved.get(requested) {
            return cached;
        }
        if self.unmatched.contains(requested) {
            return None;
        }

        let mut matched_any = false;
        for index in 0..self.sinks.len() {
            if !self.sinks[index].name.contains(requested) {
                continue;
            }
            matched_any = true;
            if self.open(index) {
                self.resolved.insert(requested.to_string(), Some(index));
                return Some(index);
            }
        }

        if matched_any {
            self.resolved.insert(requested.to_string(), None);
        } else {
            log::warn!("no MIDI port matches '{}'", requested);
            self.unmatched.insert(requested.to_string());
        }
        None
    }

    /// Resolve a requested name to every matching port that opens.
    ///
    /// Clock and transport fan out to all matching devices, not just
    /// the first.
    pub fn resolve_all(&mut self, requested: &str) -> Vec<usize> {
        if self.unmatched.contains(requested) {
            return Vec::new();
        }

        let mut opened = Vec::new();
        for index in 0..self.sinks.len() {
            if self.sinks[index].name.contains(requested) && self.open(index) {
                opened.push(index);
            }
        }
        if opened.is_empty() && !self.resolved.contains_key(requested) {
            log::warn!("no MIDI port matches '{}'", requested);
            self.unmatched.insert(requested.to_string());
        } else if let Some(&first) = opened.first() {
            self.resolved.entry(requested.to_string()).or_insert(Some(first));
        }
        opened
    }

    /// Open the port behind sink `index`. Idempotent; a failed open
    /// latches the sink unavailable.
    fn open(&mut self, index: usize) -> bool {
        let sink = &mut self.sinks[index];
        if sink.connection.is_some() {
            return true;
        }
        if sink.unavailable {
            return false;
        }
        match self.backend.open(sink.index) {
            Ok(connection) => {
                log::info!("Connected to MIDI device: {}", sink.name);
                sink.connection = Some(connection);
                true
            }
            Err(reason) => {
                log::warn!("MIDI device '{}' unavailable: {}", sink.name, reason);
                sink.unavailable = true;
                false
            }
        }
    }

    /// Send one complete MIDI message to sink `index`.
    pub fn send(&mut self, index: usize, message: &[u8]) -> Result<(), PlayerError> {
        let sink = &mut self.sinks[index];
        let connection = sink
            .connection
            .as_mut()
            .ok_or_else(|| PlayerError::SendFailed {
                sink: sink.name.clone(),
                reason: "port not open".into(),
            })?;
        connection
            .send(message)
            .map_err(|reason| PlayerError::SendFailed {
                sink: sink.name.clone(),
                reason,
            })
    }

    /// Close every open connection. Called at the end of playback.
    pub fn close_all(&mut self) {
        for sink in &mut self.sinks {
            if sink.connection.take().is_some() {
                log::info!("Disconnected MIDI device: {}", sink.name);
            }
        }
    }
}

impl Drop for MidiRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}
