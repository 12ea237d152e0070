//! Playback orchestration
//!
//! Runs the whole pipeline for a set of timeline documents: promote the
//! thread, build pins, sort, eliminate redundancy, then drain the
//! worklist against the wall clock. Address discovery for talkie sinks
//! rides inside the scheduler's sleeps; it never gets its own thread, so
//! the timing analysis stays single-threaded.

use std::time::Instant;

use serde_json::Value;

use crate::clock::Clock;
use crate::error::PlayerError;
use crate::midi::device::{MidiRegistry, MidirBackend, PortBackend};
use crate::midi::normalize::normalize;
use crate::pin::{Payload, SinkId, Worklist};
use crate::report::PlayReporting;
use crate::rt;
use crate::talkie::discovery::poll_discovery;
use crate::talkie::socket::TalkieRegistry;
use crate::timeline::TimelineBuilder;
use crate::{DRAG_DURATION_MS, TALKIE_REPLY_PORT};

/// Knobs the CLI exposes.
#[derive(Debug, Clone)]
pub struct PlayOptions {
    /// Shift the whole playback this many milliseconds into the future.
    pub delay_ms: f64,
    /// Local UDP port for talkie traffic and replies.
    pub talkie_port: u16,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            delay_ms: 0.0,
            talkie_port: TALKIE_REPLY_PORT,
        }
    }
}

/// Play an array of timeline documents against the machine's MIDI ports.
pub fn play_documents(
    documents: &[Value],
    options: &PlayOptions,
) -> Result<PlayReporting, PlayerError> {
    play_with_backend(documents, Box::new(MidirBackend), options)
}

/// Same pipeline over an explicit port backend (tests pass a recorder).
pub fn play_with_backend(
    documents: &[Value],
    midi_backend: Box<dyn PortBackend>,
    options: &PlayOptions,
) -> Result<PlayReporting, PlayerError> {
    rt::promote_playback_thread();

    let processing_start = Instant::now();
    let mut builder = TimelineBuilder::new(midi_backend, options.delay_ms, options.talkie_port);
    builder.ingest_documents(documents)?;

    let mut worklist = builder.worklist;
    let mut midi = builder.midi;
    let mut talkie = builder.talkie;
    let mut report = builder.report;

    if builder.documents_accepted == 0 {
        return Err(PlayerError::NothingToPlay);
    }

    worklist.sort();
    normalize(&mut worklist, &mut report);
    report.processing_ms = processing_start.elapsed().as_millis();
    report.log_data_summary(worklist.len());

    if !worklist.is_empty() {
        if let Some(last_time_ms) = worklist.last_time_ms() {
            let seconds = (last_time_ms / 1000.0).round() as u64;
            log::info!(
                "Playing for {} minutes and {} seconds...",
                seconds / 60,
                seconds % 60
            );
        }
        run_schedule(&mut worklist, &mut midi, &mut talkie, &mut report, options)?;
    }

    if let Some(registry) = midi.as_mut() {
        registry.close_all();
    }
    report.log_delay_summary();
    Ok(report)
}

/// Drain the worklist in order, sleeping to each pin's deadline.
fn run_schedule(
    worklist: &mut Worklist,
    midi: &mut Option<MidiRegistry>,
    talkie: &mut TalkieRegistry,
    report: &mut PlayReporting,
    options: &PlayOptions,
) -> Result<(), PlayerError> {
    let clock = Clock::start();
    let offset_us = (options.delay_ms * 1000.0).round() as u64;
    let discover = !talkie.is_empty();
    let order = worklist.order().to_vec();
    let mut delays = Vec::with_capacity(order.len());

    for id in order {
        // Drag shifts every remaining deadline; it never shrinks.
        let deadline_us =
            ((worklist.pin(id).time_ms + report.total_drag) * 1000.0).round() as u64 + offset_us;

        if discover {
            let mut poll = || poll_discovery(&mut *talkie);
            clock.sleep_until_us(deadline_us, Some(&mut poll));
        } else {
            clock.sleep_until_us(deadline_us, None);
        }

        // Measured immediately before the send so the recorded delay is
        // the sink's view of our lateness.
        let pluck_us = clock.now_us();
        {
            let pin = worklist.pin(id);
            match (&pin.payload, pin.sink) {
                (Payload::Midi(bytes), SinkId::Midi(index)) => match midi.as_mut() {
                    Some(registry) => registry.send(index, bytes)?,
                    None => {
                        return Err(PlayerError::SendFailed {
                            sink: format!("midi sink {}", index),
                            reason: "MIDI registry missing".into(),
                        })
                    }
                },
                (Payload::Talkie(text), SinkId::Talkie(index)) => {
                    talkie
                        .send(index, text)
                        .map_err(|e| PlayerError::SendFailed {
                            sink: talkie.sink(index).name.clone(),
                            reason: e.to_string(),
                        })?;
                }
                (payload, sink) => {
                    log::warn!("pin payload {:?} does not match sink {:?}", payload, sink);
                }
            }
        }

        let delay_ms = (pluck_us as i64 - deadline_us as i64) as f64 / 1000.0;
        worklist.pin_mut(id).delay_ms = delay_ms;
        delays.push(delay_ms);
        if delay_ms > DRAG_DURATION_MS {
            report.total_drag += delay_ms - DRAG_DURATION_MS;
        }
    }

    report.compute_delay_stats(&delays);
    Ok(())
}
