//! Talkie timeline builder
//!
//! Talkie content interleaves an optional tempo element with message
//! elements. Each message is canonicalized before it becomes a pin: the
//! dispatch identifier `i` is stamped from the scheduled time, and the
//! checksum `c` is computed over the zero-checksum serialization and
//! embedded. A device referenced for the first time is greeted with two
//! tempo-set messages when the document supplied a tempo.

use serde_json::{json, Map, Value};

use crate::pin::{Pin, SinkId, Worklist};
use crate::report::PlayReporting;
use crate::talkie::checksum::talkie_checksum;
use crate::talkie::socket::TalkieRegistry;
use crate::talkie::MessageCode;

/// Build pins for one talkie document.
pub fn build_document(
    content: &[Value],
    registry: &mut TalkieRegistry,
    list: &mut Worklist,
    report: &mut PlayReporting,
    delay_ms: f64,
) {
    let mut tempo: Option<(i64, i64)> = None;

    for element in content {
        if let Some(tempo_value) = element.get("tempo") {
            // First tempo wins for the whole document.
            if tempo.is_none() {
                let numerator = tempo_value
                    .get("bpm_numerator")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                let denominator = tempo_value
                    .get("bpm_denominator")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                tempo = Some((numerator, denominator));
            }
            continue;
        }

        let Some(message) = element.get("message").and_then(Value::as_object) else {
            continue;
        };
        report.message_seen();

        let Some(port) = element
            .get("port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
        else {
            log::debug!("talkie message without a usable port");
            report.message_rejected();
            continue;
        };
        let Some(time_ms) = element.get("time_ms").and_then(Value::as_f64) else {
            report.message_rejected();
            continue;
        };
        if time_ms < 0.0 {
            report.message_rejected();
            continue;
        }

        // `t` selects the device: a name, or a channel number.
        let (index, created) = match message.get("t") {
            Some(Value::String(name)) => registry.register_named(name, port),
            Some(value) if value.is_u64() => {
                registry.register_channel(value.as_u64().unwrap_or(0), port)
            }
            _ => {
                log::debug!("talkie message with no usable target");
                report.message_rejected();
                continue;
            }
        };

        if created {
            for payload in greeting_payloads(&message["t"], tempo) {
                if let Err(e) = registry.send(index, &payload) {
                    log::warn!("greeting to '{}' failed: {}", registry.sink(index).name, e);
                }
            }
        }

        let payload = seal_message(message.clone(), time_ms, delay_ms);
        list.push(Pin::talkie(time_ms, SinkId::Talkie(index), payload));
        report.message_accepted();
    }
}

/// Stamp `i`, compute `c` over the zeroed serialization, embed it and
/// serialize the final wire form.
fn seal_message(mut message: Map<String, Value>, time_ms: f64, delay_ms: f64) -> String {
    message.insert("i".into(), json!((time_ms + delay_ms).floor() as u64));
    message.insert("c".into(), json!(0));
    let zeroed = Value::Object(message.clone()).to_string();
    message.insert("c".into(), json!(talkie_checksum(&zeroed)));
    Value::Object(message).to_string()
}

/// Tempo-set messages sent to a device the moment it is created.
fn greeting_payloads(target: &Value, tempo: Option<(i64, i64)>) -> Vec<String> {
    let Some((numerator, denominator)) = tempo else {
        return Vec::new();
    };
    if denominator == 0 {
        return Vec::new();
    }

    [("bpm_n", numerator), ("bpm_d", denominator)]
        .into_iter()
        .map(|(name, value)| {
            let mut message = Map::new();
            message.insert("t".into(), target.clone());
            message.insert("m".into(), json!(MessageCode::Set.as_u8()));
            message.insert("n".into(), json!(name));
            message.insert("v".into(), json!(value));
            seal_message(message, 0.0, 0.0)
        })
        .collect()
}
