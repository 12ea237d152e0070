//! End-to-end playback scenarios over a recording MIDI backend
//!
//! These drive the full pipeline — ingest, sort, normalize, schedule —
//! and assert on the byte streams the sinks actually receive. Times are
//! kept small so the suite runs in well under a second of wall clock.

use std::cell::RefCell;
use std::net::UdpSocket;
use std::rc::Rc;
use std::time::Duration;

use serde_json::{json, Value};

use json_midi_player::midi::device::{PortBackend, PortConnection};
use json_midi_player::player::{play_with_backend, PlayOptions};
use json_midi_player::{FILE_TYPE, MIDI_FILE_URL, TALKIE_FILE_URL};

type SendLog = Rc<RefCell<Vec<(usize, Vec<u8>)>>>;

struct RecordingBackend {
    names: Vec<String>,
    sent: SendLog,
}

struct RecordingConnection {
    index: usize,
    sent: SendLog,
}

impl PortConnection for RecordingConnection {
    fn send(&mut self, message: &[u8]) -> Result<(), String> {
        self.sent.borrow_mut().push((self.index, message.to_vec()));
        Ok(())
    }
}

impl PortBackend for RecordingBackend {
    fn port_names(&self) -> Result<Vec<String>, String> {
        Ok(self.names.clone())
    }
    fn open(&self, index: usize) -> Result<Box<dyn PortConnection>, String> {
        Ok(Box::new(RecordingConnection {
            index,
            sent: self.sent.clone(),
        }))
    }
}

fn backend(names: &[&str]) -> (Box<dyn PortBackend>, SendLog) {
    let sent: SendLog = Rc::new(RefCell::new(Vec::new()));
    let recorder = RecordingBackend {
        names: names.iter().map(|s| s.to_string()).collect(),
        sent: sent.clone(),
    };
    (Box::new(recorder), sent)
}

fn midi_document(content: Value) -> Value {
    json!({"filetype": FILE_TYPE, "url": MIDI_FILE_URL, "content": content})
}

/// Single note against a one-pulse clock. The run opens with the clock
/// start and the note, and closes with the note released, the clock
/// stopped and the song position rewound.
#[test]
fn single_note_with_clock() {
    let (recorder, sent) = backend(&["Mock Synth"]);
    // One pulse of 1/2400 min = 25 ms keeps the test fast.
    let documents = vec![midi_document(json!([
        {"clock": {
            "total_clock_pulses": 1,
            "pulse_duration_min_numerator": 1,
            "pulse_duration_min_denominator": 2400,
            "clocked_devices": ["Mock"],
            "controlled_devices": []
        }},
        {"devices": ["Mock"]},
        {"time_ms": 0.0, "midi_message": {"status_byte": 0x90, "data_byte_1": 60, "data_byte_2": 100}}
    ]))];

    let report = play_with_backend(&documents, recorder, &PlayOptions::default()).unwrap();

    let messages: Vec<Vec<u8>> = sent.borrow().iter().map(|(_, m)| m.clone()).collect();
    assert_eq!(
        messages,
        vec![
            vec![0xFA],        // clock start
            vec![0x90, 60, 100],
            vec![0xFC],        // clock stop at the last position
            vec![0xF2, 0, 0],  // song position pointer home
            vec![0x80, 60, 0], // terminal release
        ]
    );
    assert_eq!(report.total_validated, 1);
    assert_eq!(report.total_redundant, 0);
    assert_eq!(
        report.total_generated,
        report.total_validated + report.total_incorrect + report.total_redundant
    );
}

/// A repeated controller value is dropped as redundant.
#[test]
fn redundant_control_change() {
    let (recorder, sent) = backend(&["Mock Synth"]);
    let documents = vec![midi_document(json!([
        {"devices": ["Mock"]},
        {"time_ms": 10.0, "midi_message": {"status_byte": 0xB0, "data_byte_1": 7, "data_byte_2": 100}},
        {"time_ms": 20.0, "midi_message": {"status_byte": 0xB0, "data_byte_1": 7, "data_byte_2": 100}}
    ]))];

    let report = play_with_backend(&documents, recorder, &PlayOptions::default()).unwrap();

    assert_eq!(sent.borrow().len(), 1);
    assert_eq!(report.total_generated, 2);
    assert_eq!(report.total_validated, 1);
    assert_eq!(report.total_redundant, 1);
}

/// Stacking the same note twice and releasing once: the retrigger is
/// made audible by an inserted release, and the survivor is released at
/// the final timestamp.
#[test]
fn stacked_notes() {
    let (recorder, sent) = backend(&["Mock Synth"]);
    let documents = vec![midi_document(json!([
        {"devices": ["Mock"]},
        {"time_ms": 10.0, "midi_message": {"status_byte": 0x90, "data_byte_1": 60, "data_byte_2": 100}},
        {"time_ms": 20.0, "midi_message": {"status_byte": 0x90, "data_byte_1": 60, "data_byte_2": 100}},
        {"time_ms": 30.0, "midi_message": {"status_byte": 0x80, "data_byte_1": 60, "data_byte_2": 0}}
    ]))];

    let report = play_with_backend(&documents, recorder, &PlayOptions::default()).unwrap();

    let messages: Vec<Vec<u8>> = sent.borrow().iter().map(|(_, m)| m.clone()).collect();
    assert_eq!(
        messages,
        vec![
            vec![0x90, 60, 100],
            vec![0x80, 60, 0], // inserted release before the retrigger
            vec![0x90, 60, 100],
            vec![0x80, 60, 0], // terminal release of the survivor
        ]
    );
    // The user's own off only decremented the stack.
    assert_eq!(report.total_redundant, 1);
}

/// A stop and a tick at the same instant collapse into one pin. With no
/// other clock traffic the collapsed run is closed as a stop.
#[test]
fn clock_collapse_at_equal_time() {
    let (recorder, sent) = backend(&["Mock Synth"]);
    let documents = vec![midi_document(json!([
        {"devices": ["Mock"]},
        {"time_ms": 50.0, "midi_message": {"status_byte": 0xFC}},
        {"time_ms": 50.0, "midi_message": {"status_byte": 0xF8}}
    ]))];

    let report = play_with_backend(&documents, recorder, &PlayOptions::default()).unwrap();

    let messages: Vec<Vec<u8>> = sent.borrow().iter().map(|(_, m)| m.clone()).collect();
    assert_eq!(messages, vec![vec![0xFC]]);
    assert_eq!(report.total_redundant, 1);
    assert_eq!(
        report.total_generated,
        report.total_validated + report.total_incorrect + report.total_redundant
    );
}

/// An orphan release is swallowed, never emitted.
#[test]
fn orphan_note_off_is_not_emitted() {
    let (recorder, sent) = backend(&["Mock Synth"]);
    let documents = vec![midi_document(json!([
        {"devices": ["Mock"]},
        {"time_ms": 10.0, "midi_message": {"status_byte": 0x80, "data_byte_1": 60, "data_byte_2": 0}}
    ]))];

    let report = play_with_backend(&documents, recorder, &PlayOptions::default()).unwrap();
    assert!(sent.borrow().is_empty());
    assert_eq!(report.total_redundant, 1);
}

/// Pins sharing a timestamp go out in ascending priority order: bank
/// select, program change, then the note.
#[test]
fn equal_times_emit_in_priority_order() {
    let (recorder, sent) = backend(&["Mock Synth"]);
    let documents = vec![midi_document(json!([
        {"devices": ["Mock"]},
        {"time_ms": 5.0, "midi_message": {"status_byte": 0x90, "data_byte_1": 60, "data_byte_2": 100}},
        {"time_ms": 5.0, "midi_message": {"status_byte": 0xC0, "data_byte": 9}},
        {"time_ms": 5.0, "midi_message": {"status_byte": 0xB0, "data_byte_1": 0, "data_byte_2": 1}}
    ]))];

    play_with_backend(&documents, recorder, &PlayOptions::default()).unwrap();

    let statuses: Vec<u8> = sent.borrow().iter().map(|(_, m)| m[0]).collect();
    assert_eq!(statuses, vec![0xB0, 0xC0, 0x90, 0x80]);
}

/// Two documents for two ports play into one interleaved schedule, each
/// sink seeing only its own stream.
#[test]
fn documents_route_to_their_own_ports() {
    let (recorder, sent) = backend(&["Port One", "Port Two"]);
    let documents = vec![
        midi_document(json!([
            {"devices": ["One"]},
            {"time_ms": 0.0, "midi_message": {"status_byte": 0xC0, "data_byte": 1}}
        ])),
        midi_document(json!([
            {"devices": ["Two"]},
            {"time_ms": 0.0, "midi_message": {"status_byte": 0xC1, "data_byte": 2}}
        ])),
    ];

    play_with_backend(&documents, recorder, &PlayOptions::default()).unwrap();

    let log = sent.borrow();
    assert_eq!(log.len(), 2);
    assert!(log.contains(&(0, vec![0xC0, 1])));
    assert!(log.contains(&(1, vec![0xC1, 2])));
}

/// Talkie end-to-end: a device replies during the pre-roll sleep, the
/// idle poll verifies its checksum and binds its address, and the
/// scheduled message then arrives as a unicast datagram.
#[test]
fn talkie_discovery_then_unicast_delivery() {
    // The player's reply socket; fixed so the fake device can reach it.
    let player_port = 49221u16;

    let device = UdpSocket::bind("127.0.0.1:0").unwrap();
    device
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let device_port = device.local_addr().unwrap().port();

    let documents = vec![json!({
        "filetype": FILE_TYPE,
        "url": TALKIE_FILE_URL,
        "content": [
            {"port": device_port, "time_ms": 250.0,
             "message": {"t": "dev", "f": "dev", "m": 2, "n": "play", "v": 1}}
        ]
    })];

    // Fake device: announce ourselves to the player's reply port with a
    // valid checksum while the scheduler is still sleeping.
    let announcer = std::thread::spawn(move || {
        use json_midi_player::talkie::talkie_checksum;
        let mut reply = json!({"f": "dev", "m": 6, "c": 0});
        let checksum = talkie_checksum(&reply.to_string());
        reply["c"] = json!(checksum);
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        // A few sends paper over startup ordering.
        for _ in 0..5 {
            let _ = socket.send_to(reply.to_string().as_bytes(), ("127.0.0.1", player_port));
            std::thread::sleep(Duration::from_millis(20));
        }
    });

    let (recorder, _) = backend(&["Unused Port"]);
    let options = PlayOptions {
        delay_ms: 0.0,
        talkie_port: player_port,
    };
    play_with_backend(&documents, recorder, &options).unwrap();
    announcer.join().unwrap();

    let mut buffer = [0u8; 2048];
    let (length, _) = device.recv_from(&mut buffer).unwrap();
    let received: Value = serde_json::from_str(std::str::from_utf8(&buffer[..length]).unwrap())
        .unwrap();
    assert_eq!(received["n"], json!("play"));
    assert_eq!(received["i"], json!(250));

    // The wire checksum verifies on the receiving side too.
    use json_midi_player::talkie::talkie_checksum;
    let wire = std::str::from_utf8(&buffer[..length]).unwrap();
    assert_eq!(
        u64::from(talkie_checksum(wire)),
        received["c"].as_u64().unwrap()
    );
}

/// Wrong-filetype documents are skipped; if nothing survives, playback
/// reports nothing to play.
#[test]
fn mismatched_documents_are_skipped() {
    let (recorder, _) = backend(&["Mock Synth"]);
    let documents = vec![
        json!({"filetype": "Other", "url": MIDI_FILE_URL, "content": []}),
        json!({"filetype": FILE_TYPE, "url": "https://example.com/elsewhere", "content": []}),
    ];
    assert!(play_with_backend(&documents, recorder, &PlayOptions::default()).is_err());
}
