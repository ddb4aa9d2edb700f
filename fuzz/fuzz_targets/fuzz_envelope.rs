#![no_main]

use chat_relay::core::envelope::{Envelope, Frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };

    // Anything that parses must survive a re-encode
    if let Ok(envelope) = Envelope::decode(line) {
        let reencoded = envelope.encode();
        let _ = Envelope::decode(&reencoded);
        let _ = Frame::try_from(envelope);
    }
});
