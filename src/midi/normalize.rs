//! Redundancy elimination over the sorted worklist
//!
//! One forward pass that rewrites clock state transitions into a legal
//! start/tick/stop sequence, pairs note-ons with note-offs through a
//! reference-counted stack, and drops controller/pitch/pressure updates
//! that would not change receiver state. Runs after the two-key sort and
//! depends on that order.
//!
//! Tracking state is keyed per sink and holds `PinId` handles into the
//! worklist arena, which stay valid while the pass inserts pins and
//! rewrites the play order.

use std::collections::HashMap;

use crate::midi::message::{
    ACTION_CHANNEL_PRESSURE, ACTION_CONTROL_CHANGE, ACTION_KEY_PRESSURE, ACTION_NOTE_OFF,
    ACTION_NOTE_ON, ACTION_PITCH_BEND, ACTION_SYSTEM, SYSTEM_CLOCK_CONTINUE, SYSTEM_CLOCK_START,
    SYSTEM_CLOCK_STOP, SYSTEM_SONG_POINTER, SYSTEM_TIMING_CLOCK,
};
use crate::pin::{Payload, Pin, PinId, SinkId, Worklist, PRIORITY_DEFAULT};
use crate::report::PlayReporting;

/// Per-sink tracking state for the pass.
#[derive(Debug, Default)]
struct SinkState {
    /// Most recent clock-family pin kept on this sink.
    last_clock: Option<PinId>,
    /// Most recent song position pointer kept on this sink.
    last_song_pointer: Option<PinId>,
    /// channel → stack of live note-on pins, each carrying a level.
    note_on: HashMap<u8, Vec<PinId>>,
    /// (status << 8 | controller/key) → last message bytes seen.
    last_byte_16: HashMap<u16, [u8; 3]>,
    /// status → last message bytes seen (pitch bend, channel pressure).
    last_byte_8: HashMap<u8, [u8; 3]>,
}

/// Run the redundancy pass in place, rewriting the play order.
pub fn normalize(list: &mut Worklist, report: &mut PlayReporting) {
    let mut sinks: HashMap<SinkId, SinkState> = HashMap::new();
    let input = list.order().to_vec();
    // The stream is sorted, so the final timestamp is the last entry's,
    // even if that pin ends up dropped.
    let final_time_ms = input
        .last()
        .map(|&id| list.pin(id).time_ms)
        .unwrap_or(0.0);
    let mut output: Vec<PinId> = Vec::with_capacity(input.len());

    for id in input {
        let pin = list.pin(id);
        if !matches!(pin.payload, Payload::Midi(_)) {
            output.push(id);
            continue;
        }
        let sink = pin.sink;
        let state = sinks.entry(sink).or_default();

        match pin.action() {
            ACTION_SYSTEM => match pin.status() {
                SYSTEM_TIMING_CLOCK | SYSTEM_CLOCK_START => {
                    let incoming_time = pin.time_ms;
                    let starts = pin.status() == SYSTEM_CLOCK_START;
                    if let Some(last) = state.last_clock {
                        if list.pin(last).time_ms == incoming_time {
                            // A tick landing on a stop at the same time
                            // means the clock never actually stopped.
                            if list.pin(last).status() == SYSTEM_CLOCK_STOP {
                                set_status(list, last, SYSTEM_TIMING_CLOCK);
                            }
                            drop_pin(list, id, report);
                            continue;
                        } else if list.pin(last).status() == SYSTEM_CLOCK_STOP {
                            set_status(list, id, SYSTEM_CLOCK_CONTINUE);
                        } else if starts {
                            // Clock already running; a second start is
                            // just another tick.
                            set_status(list, id, SYSTEM_TIMING_CLOCK);
                        }
                    } else if !starts {
                        // First clock event on this sink opens the run.
                        set_status(list, id, SYSTEM_CLOCK_START);
                    }
                    state.last_clock = Some(id);
                    output.push(id);
                }
                SYSTEM_CLOCK_STOP => {
                    if let Some(last) = state.last_clock {
                        if list.pin(last).time_ms == pin.time_ms {
                            set_status(list, last, SYSTEM_CLOCK_STOP);
                            drop_pin(list, id, report);
                            continue;
                        } else if list.pin(last).status() == SYSTEM_CLOCK_STOP {
                            drop_pin(list, id, report);
                            continue;
                        }
                    }
                    state.last_clock = Some(id);
                    output.push(id);
                }
                SYSTEM_CLOCK_CONTINUE => {
                    if let Some(last) = state.last_clock {
                        if list.pin(last).time_ms == pin.time_ms {
                            set_status(list, last, SYSTEM_TIMING_CLOCK);
                            drop_pin(list, id, report);
                            continue;
                        }
                        match list.pin(last).status() {
                            SYSTEM_CLOCK_START | SYSTEM_CLOCK_CONTINUE => {
                                set_status(list, id, SYSTEM_TIMING_CLOCK);
                            }
                            // Continuing a clock that never stopped:
                            // retroactively stop it first.
                            _ => set_status(list, last, SYSTEM_CLOCK_STOP),
                        }
                    } else {
                        set_status(list, id, SYSTEM_CLOCK_START);
                    }
                    state.last_clock = Some(id);
                    output.push(id);
                }
                SYSTEM_SONG_POINTER => {
                    if let Some(last) = state.last_song_pointer {
                        let last_pin = list.pin(last);
                        if last_pin.time_ms == pin.time_ms
                            && last_pin.status() == SYSTEM_SONG_POINTER
                            && last_pin.data(1) == pin.data(1)
                            && last_pin.data(2) == pin.data(2)
                        {
                            drop_pin(list, id, report);
                            continue;
                        }
                    }
                    state.last_song_pointer = Some(id);
                    output.push(id);
                }
                _ => output.push(id),
            },
            ACTION_NOTE_OFF => {
                let channel = pin.channel();
                let key = pin.data(1);
                let mut matched = false;
                if let Some(stack) = state.note_on.get_mut(&channel) {
                    if let Some(pos) =
                        stack.iter().position(|&on| list.pin(on).data(1) == key)
                    {
                        matched = true;
                        let on = stack[pos];
                        if list.pin(on).level == 1 {
                            stack.remove(pos);
                            output.push(id);
                        } else {
                            // A stacked copy is still sounding; this
                            // off only releases one reference.
                            list.pin_mut(on).level -= 1;
                            drop_pin(list, id, report);
                        }
                    }
                }
                if !matched {
                    // Orphan note-off; nothing to release.
                    drop_pin(list, id, report);
                }
            }
            ACTION_NOTE_ON => {
                let channel = pin.channel();
                let key = pin.data(1);
                let time_ms = pin.time_ms;
                let stack = state.note_on.entry(channel).or_default();
                if let Some(&on) = stack.iter().find(|&&on| list.pin(on).data(1) == key) {
                    // Same key already sounding: release it for an
                    // instant so the retrigger is audible, and remember
                    // the extra press on the original pin.
                    list.pin_mut(on).level += 1;
                    let off = Pin::midi(
                        time_ms,
                        sink,
                        vec![ACTION_NOTE_OFF | channel, key, 0],
                        PRIORITY_DEFAULT,
                    )
                    .synthetic();
                    let off_id = list.alloc(off);
                    report.pin_injected();
                    output.push(off_id);
                    output.push(id);
                } else {
                    stack.push(id);
                    output.push(id);
                }
            }
            ACTION_CONTROL_CHANGE | ACTION_KEY_PRESSURE => {
                let dict_key = (pin.status() as u16) << 8 | pin.data(1) as u16;
                let bytes = [pin.status(), pin.data(1), pin.data(2)];
                match state.last_byte_16.get_mut(&dict_key) {
                    Some(stored) => {
                        if stored[2] != bytes[2] {
                            stored[2] = bytes[2];
                            output.push(id);
                        } else {
                            drop_pin(list, id, report);
                        }
                    }
                    None => {
                        state.last_byte_16.insert(dict_key, bytes);
                        output.push(id);
                    }
                }
            }
            ACTION_PITCH_BEND => {
                let dict_key = pin.status();
                let bytes = [pin.status(), pin.data(1), pin.data(2)];
                match state.last_byte_8.get_mut(&dict_key) {
                    Some(stored) => {
                        if stored[1] != bytes[1] || stored[2] != bytes[2] {
                            stored[1] = bytes[1];
                            stored[2] = bytes[2];
                            output.push(id);
                        } else {
                            drop_pin(list, id, report);
                        }
                    }
                    None => {
                        state.last_byte_8.insert(dict_key, bytes);
                        output.push(id);
                    }
                }
            }
            ACTION_CHANNEL_PRESSURE => {
                let dict_key = pin.status();
                let bytes = [pin.status(), pin.data(1), 0];
                match state.last_byte_8.get_mut(&dict_key) {
                    Some(stored) => {
                        if stored[1] != bytes[1] {
                            stored[1] = bytes[1];
                            output.push(id);
                        } else {
                            drop_pin(list, id, report);
                        }
                    }
                    None => {
                        state.last_byte_8.insert(dict_key, bytes);
                        output.push(id);
                    }
                }
            }
            // Program change is never redundant.
            _ => output.push(id),
        }
    }

    finish_pass(list, sinks, &mut output, final_time_ms, report);
    list.set_order(output);
}

/// Close out every sink: release notes still sounding and make sure a
/// ticking clock ends with a stop. Terminal note-offs land on the final
/// timestamp of the sorted stream, whether or not the pin carrying it
/// survived the pass.
fn finish_pass(
    list: &mut Worklist,
    sinks: HashMap<SinkId, SinkState>,
    output: &mut Vec<PinId>,
    last_time_ms: f64,
    report: &mut PlayReporting,
) {
    let mut entries: Vec<(SinkId, SinkState)> = sinks.into_iter().collect();
    entries.sort_by_key(|(sink, _)| *sink);

    for (sink, state) in entries {
        let mut channels: Vec<(u8, Vec<PinId>)> = state.note_on.into_iter().collect();
        channels.sort_by_key(|(channel, _)| *channel);
        for (channel, stack) in channels {
            for on in stack {
                let key = list.pin(on).data(1);
                let off = Pin::midi(
                    last_time_ms,
                    sink,
                    vec![ACTION_NOTE_OFF | channel, key, 0],
                    PRIORITY_DEFAULT,
                )
                .synthetic();
                let off_id = list.alloc(off);
                report.pin_injected();
                output.push(off_id);
            }
        }

        if let Some(last) = state.last_clock {
            if list.pin(last).status() == SYSTEM_TIMING_CLOCK {
                set_status(list, last, SYSTEM_CLOCK_STOP);
            }
        }
    }
}

fn set_status(list: &mut Worklist, id: PinId, status: u8) {
    if let Payload::Midi(bytes) = &mut list.pin_mut(id).payload {
        bytes[0] = status;
    }
}

fn drop_pin(list: &Worklist, id: PinId, report: &mut PlayReporting) {
    report.pin_dropped(list.pin(id).synthetic);
}
