//! MIDI timeline builder
//!
//! A MIDI document's content array starts (optionally) with a clock
//! block that fans synthetic clock pulses and MMC transport sysex out to
//! the devices it names. The remaining elements either rebind the
//! current device or decode into message pins against it.

use std::collections::HashSet;

use serde_json::Value;

use crate::midi::device::MidiRegistry;
use crate::midi::message::{
    decode_midi_message, MMC_PLAY, MMC_REWIND, MMC_STOP, PRIORITY_CLOCK_PULSE,
    PRIORITY_CLOCK_TAIL, PRIORITY_MMC_START, PRIORITY_MMC_TAIL, SYSTEM_CLOCK_START,
    SYSTEM_CLOCK_STOP, SYSTEM_SONG_POINTER, SYSTEM_TIMING_CLOCK,
};
use crate::pin::{Pin, SinkId, Worklist};
use crate::report::PlayReporting;

/// Minutes expressed as a fraction, converted to milliseconds rounded
/// to 3 decimal places.
fn fraction_min_to_ms(numerator: u64, denominator: u64) -> f64 {
    let milliseconds = numerator as f64 * 60_000.0 / denominator as f64;
    (milliseconds * 1000.0).round() / 1000.0
}

/// Build pins for one MIDI document.
pub fn build_document(
    content: &[Value],
    registry: &mut MidiRegistry,
    list: &mut Worklist,
    report: &mut PlayReporting,
) {
    if let Some(clock) = content.first().and_then(|first| first.get("clock")) {
        build_clock_block(clock, registry, list, report);
    } else {
        log::debug!("document has no clock block");
    }

    let mut current: Option<usize> = None;
    for element in content {
        if let Some(message) = element.get("midi_message") {
            let Some(sink) = current else {
                // No device bound yet; the element has nowhere to go.
                continue;
            };
            report.message_seen();

            let Some(time_ms) = element.get("time_ms").and_then(Value::as_f64) else {
                log::debug!("message without a usable time_ms");
                report.message_rejected();
                continue;
            };
            if time_ms < 0.0 {
                report.message_rejected();
                continue;
            }

            match decode_midi_message(message) {
                Ok((bytes, priority)) => {
                    list.push(Pin::midi(time_ms, SinkId::Midi(sink), bytes, priority));
                    report.message_accepted();
                }
                Err(reason) => {
                    log::debug!("rejected message at {}ms: {}", time_ms, reason);
                    report.message_rejected();
                }
            }
        } else if let Some(devices) = element.get("devices").and_then(Value::as_array) {
            current = devices
                .iter()
                .filter_map(Value::as_str)
                .find_map(|name| registry.resolve(name));
            if current.is_none() {
                log::warn!("devices element resolved to no open port");
            }
        }
    }
}

/// Emit the synthetic clock run and MMC transport for a clock block.
fn build_clock_block(
    clock: &Value,
    registry: &mut MidiRegistry,
    list: &mut Worklist,
    report: &mut PlayReporting,
) {
    let total_pulses = clock
        .get("total_clock_pulses")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let numerator = clock
        .get("pulse_duration_min_numerator")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let denominator = clock
        .get("pulse_duration_min_denominator")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    if total_pulses == 0 || numerator == 0 || denominator == 0 {
        log::warn!("clock block with non-positive parameters; skipping");
        return;
    }
    let last_position_ms = fraction_min_to_ms(total_pulses * numerator, denominator);

    let mut clocked: HashSet<usize> = HashSet::new();
    for name in device_names(clock.get("clocked_devices")) {
        for index in registry.resolve_all(&name) {
            if !clocked.insert(index) {
                continue;
            }
            let sink = SinkId::Midi(index);
            inject(list, report, Pin::midi(0.0, sink, vec![SYSTEM_CLOCK_START], PRIORITY_CLOCK_PULSE));
            for pulse in 1..total_pulses {
                let pulse_time_ms = fraction_min_to_ms(pulse * numerator, denominator);
                inject(
                    list,
                    report,
                    Pin::midi(pulse_time_ms, sink, vec![SYSTEM_TIMING_CLOCK], PRIORITY_CLOCK_PULSE),
                );
            }
            inject(
                list,
                report,
                Pin::midi(last_position_ms, sink, vec![SYSTEM_CLOCK_STOP], PRIORITY_CLOCK_TAIL),
            );
            inject(
                list,
                report,
                Pin::midi(
                    last_position_ms,
                    sink,
                    vec![SYSTEM_SONG_POINTER, 0, 0],
                    PRIORITY_CLOCK_TAIL,
                ),
            );
        }
    }

    let mut controlled: HashSet<usize> = HashSet::new();
    for name in device_names(clock.get("controlled_devices")) {
        for index in registry.resolve_all(&name) {
            if !controlled.insert(index) {
                continue;
            }
            let sink = SinkId::Midi(index);
            inject(
                list,
                report,
                Pin::midi(0.0, sink, MMC_PLAY.to_vec(), PRIORITY_MMC_START),
            );
            inject(
                list,
                report,
                Pin::midi(last_position_ms, sink, MMC_STOP.to_vec(), PRIORITY_MMC_TAIL),
            );
            inject(
                list,
                report,
                Pin::midi(last_position_ms, sink, MMC_REWIND.to_vec(), PRIORITY_MMC_TAIL),
            );
        }
    }
}

fn inject(list: &mut Worklist, report: &mut PlayReporting, pin: Pin) {
    list.push(pin.synthetic());
    report.pin_injected();
}

fn device_names(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::device::{PortBackend, PortConnection};
    use serde_json::json;

    struct StubBackend {
        names: Vec<String>,
    }

    struct NullConnection;

    impl PortConnection for NullConnection {
        fn send(&mut self, _: &[u8]) -> Result<(), String> {
            Ok(())
        }
    }

    impl PortBackend for StubBackend {
        fn port_names(&self) -> Result<Vec<String>, String> {
            Ok(self.names.clone())
        }
        fn open(&self, _: usize) -> Result<Box<dyn PortConnection>, String> {
            Ok(Box::new(NullConnection))
        }
    }

    fn registry(names: &[&str]) -> MidiRegistry {
        MidiRegistry::new(Box::new(StubBackend {
            names: names.iter().map(|s| s.to_string()).collect(),
        }))
        .unwrap()
    }

    fn build(content: Value) -> (Worklist, PlayReporting) {
        let mut reg = registry(&["Synth A", "Synth B"]);
        let mut list = Worklist::new();
        let mut report = PlayReporting::new();
        build_document(content.as_array().unwrap(), &mut reg, &mut list, &mut report);
        (list, report)
    }

    #[test]
    fn fraction_rounds_to_three_decimals() {
        // 1/24 min = 2500 ms exactly; 1/7 min repeats and must round.
        assert_eq!(fraction_min_to_ms(1, 24), 2500.0);
        assert_eq!(fraction_min_to_ms(1, 7), 8571.429);
    }

    #[test]
    fn clock_block_emits_run_and_tail() {
        let (list, report) = build(json!([
            {"clock": {
                "total_clock_pulses": 4,
                "pulse_duration_min_numerator": 1,
                "pulse_duration_min_denominator": 24,
                "clocked_devices": ["Synth A"],
                "controlled_devices": []
            }}
        ]));

        let events: Vec<(f64, u8)> = list.iter().map(|p| (p.time_ms, p.status())).collect();
        assert_eq!(
            events,
            vec![
                (0.0, SYSTEM_CLOCK_START),
                (2500.0, SYSTEM_TIMING_CLOCK),
                (5000.0, SYSTEM_TIMING_CLOCK),
                (7500.0, SYSTEM_TIMING_CLOCK),
                (10000.0, SYSTEM_CLOCK_STOP),
                (10000.0, SYSTEM_SONG_POINTER),
            ]
        );
        assert_eq!(report.total_synthetic, 6);
        assert_eq!(report.total_generated, 0);
    }

    #[test]
    fn controlled_devices_get_transport_sysex() {
        let (list, _) = build(json!([
            {"clock": {
                "total_clock_pulses": 1,
                "pulse_duration_min_numerator": 1,
                "pulse_duration_min_denominator": 24,
                "clocked_devices": [],
                "controlled_devices": ["Synth B"]
            }}
        ]));

        let messages: Vec<(f64, Vec<u8>)> = list
            .iter()
            .map(|p| (p.time_ms, p.midi_bytes().unwrap().to_vec()))
            .collect();
        assert_eq!(
            messages,
            vec![
                (0.0, MMC_PLAY.to_vec()),
                (2500.0, MMC_STOP.to_vec()),
                (2500.0, MMC_REWIND.to_vec()),
            ]
        );
    }

    #[test]
    fn clock_with_zero_pulses_is_ignored() {
        let (list, _) = build(json!([
            {"clock": {
                "total_clock_pulses": 0,
                "pulse_duration_min_numerator": 1,
                "pulse_duration_min_denominator": 24,
                "clocked_devices": ["Synth A"],
                "controlled_devices": []
            }}
        ]));
        assert!(list.is_empty());
    }

    #[test]
    fn messages_require_a_bound_device() {
        let (list, report) = build(json!([
            {"time_ms": 0.0, "midi_message": {"status_byte": 0x90, "data_byte_1": 60, "data_byte_2": 100}}
        ]));
        // Silently ignored: not even counted as seen.
        assert!(list.is_empty());
        assert_eq!(report.total_generated, 0);
    }

    #[test]
    fn devices_element_binds_then_messages_flow() {
        let (list, report) = build(json!([
            {"devices": ["Synth B"]},
            {"time_ms": 10.0, "midi_message": {"status_byte": 0x90, "data_byte_1": 60, "data_byte_2": 100}},
            {"time_ms": 20.0, "midi_message": {"status_byte": 0x80, "data_byte_1": 60, "data_byte_2": 0}}
        ]));
        assert_eq!(list.len(), 2);
        assert_eq!(report.total_generated, 2);
        assert_eq!(report.total_validated, 2);
        assert!(list.iter().all(|p| p.sink == SinkId::Midi(1)));
    }

    #[test]
    fn first_resolvable_device_name_wins() {
        let (list, _) = build(json!([
            {"devices": ["No Such Port", "Synth A", "Synth B"]},
            {"time_ms": 0.0, "midi_message": {"status_byte": 0xC0, "data_byte": 1}}
        ]));
        assert_eq!(list.iter().next().unwrap().sink, SinkId::Midi(0));
    }

    #[test]
    fn negative_time_rejects_the_message() {
        let (list, report) = build(json!([
            {"devices": ["Synth A"]},
            {"time_ms": -1.0, "midi_message": {"status_byte": 0x90, "data_byte_1": 60, "data_byte_2": 100}}
        ]));
        assert!(list.is_empty());
        assert_eq!(report.total_incorrect, 1);
        assert_eq!(report.total_generated, 1);
    }

    #[test]
    fn bad_data_byte_rejects_the_message() {
        let (_, report) = build(json!([
            {"devices": ["Synth A"]},
            {"time_ms": 5.0, "midi_message": {"status_byte": 0x90, "data_byte_1": 128, "data_byte_2": 0}}
        ]));
        assert_eq!(report.total_incorrect, 1);
        assert_eq!(report.total_validated, 0);
    }
}
