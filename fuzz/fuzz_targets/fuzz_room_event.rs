#![no_main]

use libfuzzer_sys::fuzz_target;
use quiz_room_sync::protocol::{EventKind, RoomEvent};

fuzz_target!(|data: &[u8]| {
    // First byte picks the topic, the rest is the body.
    let Some((&selector, body)) = data.split_first() else {
        return;
    };
    let kind = EventKind::ALL[usize::from(selector) % EventKind::ALL.len()];
    if let Ok(body) = std::str::from_utf8(body) {
        if let Ok(event) = RoomEvent::parse(kind, body) {
            assert_eq!(event.kind(), kind);
        }
    }
});
