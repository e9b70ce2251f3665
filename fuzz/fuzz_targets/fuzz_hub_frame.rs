#![no_main]

use libfuzzer_sys::fuzz_target;
use quiz_room_sync::protocol::{EventKind, RoomEvent, ServerFrame};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // A parsed message frame is handed straight to the event decoder, so
    // follow it through every topic kind.
    if let Ok(ServerFrame::Message { body, .. }) = ServerFrame::parse(text) {
        for kind in EventKind::ALL {
            let _ = RoomEvent::parse(kind, &body);
        }
    }
});
