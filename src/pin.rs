//! Pins and the playback worklist
//!
//! A pin is a single timestamped event scheduled for emission. Pins live
//! in an append-only arena; the play order is a separate list of arena
//! indices. Dropping a pin removes it from the order but never from the
//! arena, so `PinId` handles held by the normalizer stay valid across
//! insertions and drops.

/// Lowest priority; used when a message class has no explicit ranking.
pub const PRIORITY_DEFAULT: u8 = 0xFF;

/// Destination of a pin inside the player's sink registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SinkId {
    /// Index into the MIDI sink registry.
    Midi(usize),
    /// Index into the talkie sink registry.
    Talkie(usize),
}

/// Stable handle to a pin in the worklist arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PinId(pub(crate) usize);

/// What a pin carries to its sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// One complete raw MIDI message.
    Midi(Vec<u8>),
    /// One serialized talkie JSON datagram.
    Talkie(String),
}

/// A timestamped event awaiting emission.
#[derive(Debug, Clone)]
pub struct Pin {
    /// Scheduled offset from playback start, in milliseconds.
    pub time_ms: f64,
    /// Tie-break key at equal times; 0 is highest, 0xFF lowest.
    pub priority: u8,
    /// Destination sink.
    pub sink: SinkId,
    /// Message content; mutable during normalization.
    pub payload: Payload,
    /// Measured dispatch lateness in ms; -1 until the pin is plucked.
    pub delay_ms: f64,
    /// Reference count for stacked identical note-ons.
    pub level: usize,
    /// True for pins the player injected itself (clock pulses, MMC,
    /// inserted note-offs) rather than decoded from a timeline message.
    pub synthetic: bool,
}

impl Pin {
    /// A pin carrying a raw MIDI message.
    pub fn midi(time_ms: f64, sink: SinkId, message: Vec<u8>, priority: u8) -> Self {
        Self {
            time_ms,
            priority,
            sink,
            payload: Payload::Midi(message),
            delay_ms: -1.0,
            level: 1,
            synthetic: false,
        }
    }

    /// A pin carrying a talkie datagram. Talkie pins have no per-class
    /// ranking; they sort purely by time.
    pub fn talkie(time_ms: f64, sink: SinkId, text: String) -> Self {
        Self {
            time_ms,
            priority: PRIORITY_DEFAULT,
            sink,
            payload: Payload::Talkie(text),
            delay_ms: -1.0,
            level: 1,
            synthetic: false,
        }
    }

    /// Same pin, flagged as injected by the player.
    pub fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    /// MIDI message bytes, if this is a MIDI pin.
    pub fn midi_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Midi(bytes) => Some(bytes),
            Payload::Talkie(_) => None,
        }
    }

    /// Status byte of a MIDI pin. Panics on talkie pins; the normalizer
    /// only routes MIDI pins here.
    pub fn status(&self) -> u8 {
        self.midi_bytes().expect("MIDI pin")[0]
    }

    /// High nibble of the status byte (the action class).
    pub fn action(&self) -> u8 {
        self.status() & 0xF0
    }

    /// Low nibble of the status byte (the channel).
    pub fn channel(&self) -> u8 {
        self.status() & 0x0F
    }

    /// Nth data byte (1-based, as in the MIDI byte layout).
    pub fn data(&self, nth: usize) -> u8 {
        self.midi_bytes().expect("MIDI pin")[nth]
    }
}

/// Arena of pins plus their play order.
#[derive(Debug, Default)]
pub struct Worklist {
    pins: Vec<Pin>,
    order: Vec<PinId>,
}

impl Worklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pin to the arena and to the end of the play order.
    pub fn push(&mut self, pin: Pin) -> PinId {
        let id = self.alloc(pin);
        self.order.push(id);
        id
    }

    /// Append a pin to the arena only. The caller decides where (or
    /// whether) it enters the play order.
    pub fn alloc(&mut self, pin: Pin) -> PinId {
        let id = PinId(self.pins.len());
        self.pins.push(pin);
        id
    }

    pub fn pin(&self, id: PinId) -> &Pin {
        &self.pins[id.0]
    }

    pub fn pin_mut(&mut self, id: PinId) -> &mut Pin {
        &mut self.pins[id.0]
    }

    /// Current play order.
    pub fn order(&self) -> &[PinId] {
        &self.order
    }

    /// Replace the play order (the normalizer emits a rewritten one).
    pub fn set_order(&mut self, order: Vec<PinId>) {
        self.order = order;
    }

    /// Number of pins in the play order.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Pins in play order.
    pub fn iter(&self) -> impl Iterator<Item = &Pin> {
        self.order.iter().map(|id| &self.pins[id.0])
    }

    /// Timestamp of the last pin in play order.
    pub fn last_time_ms(&self) -> Option<f64> {
        self.order.last().map(|id| self.pins[id.0].time_ms)
    }

    /// Sort the play order by (time ascending, priority ascending).
    ///
    /// Both keys compare with strict less-than; `total_cmp` keeps the
    /// comparator a strict weak ordering even though times are floats.
    pub fn sort(&mut self) {
        let pins = &self.pins;
        self.order.sort_by(|a, b| {
            let (a, b) = (&pins[a.0], &pins[b.0]);
            a.time_ms
                .total_cmp(&b.time_ms)
                .then(a.priority.cmp(&b.priority))
        });
    }
}
