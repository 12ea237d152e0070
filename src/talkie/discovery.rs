//! Address discovery from reply traffic
//!
//! Runs inside the scheduler's idle callback. Each invocation drains
//! whatever reply datagrams have arrived, verifies their checksums and
//! binds unresolved sinks to the address the reply came from. Once every
//! sink is resolved the poll is a no-op, so a fully discovered playback
//! pays nothing for it.

use serde_json::Value;

use crate::talkie::checksum::talkie_checksum;
use crate::talkie::socket::TalkieRegistry;

/// Drain pending replies and bind any sink they identify.
pub fn poll_discovery(registry: &mut TalkieRegistry) {
    if registry.is_empty() || registry.all_resolved() {
        return;
    }
    let datagrams = match registry.socket() {
        Some(socket) => socket.poll_receive(),
        None => return,
    };

    for (sender_ip, payload) in datagrams {
        let reply: Value = match serde_json::from_str(&payload) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("unparseable reply from {}: {}", sender_ip, e);
                continue;
            }
        };
        let Some(name) = reply.get("f").and_then(Value::as_str) else {
            continue;
        };
        let Some(index) = registry.find_unresolved(name) else {
            continue;
        };
        let Some(embedded) = reply.get("c").and_then(Value::as_u64) else {
            log::debug!("reply from '{}' carries no checksum", name);
            continue;
        };

        let computed = talkie_checksum(&payload);
        if u64::from(computed) == embedded {
            registry.set_target_ip(index, sender_ip);
        } else {
            log::warn!(
                "reply from '{}' failed checksum (got {}, computed {})",
                name,
                embedded,
                computed
            );
        }
    }
}
