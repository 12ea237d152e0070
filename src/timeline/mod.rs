//! Timeline ingestion: JSON documents → pins
//!
//! The input is an array of document envelopes. Each envelope is
//! validated by `filetype` and `url`; the url selects the variant (MIDI
//! port playback or talkie UDP playback) and the document's `content`
//! array is handed to the matching builder. Mismatched envelopes are
//! skipped with a warning and playback continues with the rest.

pub mod midi;
pub mod talkie;

use serde_json::Value;

use crate::error::PlayerError;
use crate::midi::device::{MidiRegistry, PortBackend};
use crate::pin::Worklist;
use crate::report::PlayReporting;
use crate::talkie::socket::TalkieRegistry;
use crate::{FILE_TYPE, MIDI_FILE_URL, TALKIE_FILE_URL};

/// Accumulates pins and sink registries across all input documents.
pub struct TimelineBuilder {
    pub worklist: Worklist,
    pub midi: Option<MidiRegistry>,
    pub talkie: TalkieRegistry,
    pub report: PlayReporting,
    /// Documents that passed envelope validation.
    pub documents_accepted: usize,
    midi_backend: Option<Box<dyn PortBackend>>,
    midi_failed: bool,
    delay_ms: f64,
    talkie_port: u16,
}

impl TimelineBuilder {
    pub fn new(midi_backend: Box<dyn PortBackend>, delay_ms: f64, talkie_port: u16) -> Self {
        Self {
            worklist: Worklist::new(),
            midi: None,
            talkie: TalkieRegistry::new(),
            report: PlayReporting::new(),
            documents_accepted: 0,
            midi_backend: Some(midi_backend),
            midi_failed: false,
            delay_ms,
            talkie_port,
        }
    }

    /// Ingest every document in the input array.
    ///
    /// Only a refused talkie socket bind is fatal; everything else is
    /// recovered per document or per message.
    pub fn ingest_documents(&mut self, documents: &[Value]) -> Result<(), PlayerError> {
        for document in documents {
            self.ingest_document(document)?;
        }
        Ok(())
    }

    fn ingest_document(&mut self, document: &Value) -> Result<(), PlayerError> {
        let filetype = document.get("filetype").and_then(Value::as_str);
        if filetype != Some(FILE_TYPE) {
            log::warn!("skipping document: wrong or missing filetype");
            return Ok(());
        }
        let url = document.get("url").and_then(Value::as_str).unwrap_or("");
        let Some(content) = document.get("content").and_then(Value::as_array) else {
            log::warn!("skipping document: no content array");
            return Ok(());
        };

        match url {
            MIDI_FILE_URL => {
                self.ensure_midi_registry();
                let Some(registry) = self.midi.as_mut() else {
                    log::warn!("skipping MIDI document: no output ports");
                    return Ok(());
                };
                midi::build_document(content, registry, &mut self.worklist, &mut self.report);
                self.documents_accepted += 1;
            }
            TALKIE_FILE_URL => {
                self.talkie.ensure_socket(self.talkie_port)?;
                talkie::build_document(
                    content,
                    &mut self.talkie,
                    &mut self.worklist,
                    &mut self.report,
                    self.delay_ms,
                );
                self.documents_accepted += 1;
            }
            other => {
                log::warn!("skipping document: unrecognized url '{}'", other);
            }
        }
        Ok(())
    }

    /// Enumerate MIDI ports on first use. A machine with no output
    /// ports fails once and stays failed.
    fn ensure_midi_registry(&mut self) {
        if self.midi.is_none() && !self.midi_failed {
            match self.midi_backend.take() {
                Some(backend) => match MidiRegistry::new(backend) {
                    Ok(registry) => self.midi = Some(registry),
                    Err(e) => {
                        log::warn!("MIDI unavailable: {}", e);
                        self.midi_failed = true;
                    }
                },
                None => self.midi_failed = true,
            }
        }
    }
}
