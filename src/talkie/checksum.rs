//! Talkie datagram checksum
//!
//! A 16-bit XOR fold over a canonicalized view of the serialized
//! message. The `"c":` field's digits are collapsed to a single `0`
//! before folding, so the checksum of a message is stable whether the
//! field holds zero or the checksum itself. The canonicalization scans
//! for the exact 4-byte window `"c":` — which is reliable because
//! messages are serialized compact, with no whitespace around colons.

/// Checksum of a serialized talkie message.
pub fn talkie_checksum(payload: &str) -> u16 {
    fold(&canonical_bytes(payload.as_bytes()))
}

/// Replace the digit run of the `"c":` field with a single `0`.
fn canonical_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte.is_ascii_digit() && i >= 4 && &bytes[i - 4..i] == b"\"c\":" {
            out.push(b'0');
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            continue;
        }
        out.push(byte);
        i += 1;
    }
    out
}

/// XOR the bytes together as big-endian 16-bit chunks; a missing final
/// low byte reads as zero.
fn fold(data: &[u8]) -> u16 {
    let mut accumulator: u16 = 0;
    let mut i = 0;
    while i < data.len() {
        let hi = data[i] as u16;
        let lo = *data.get(i + 1).unwrap_or(&0) as u16;
        accumulator ^= (hi << 8) | lo;
        i += 2;
    }
    accumulator
}
