#![no_main]

use bytes::BytesMut;
use chat_relay::core::codec::EnvelopeCodec;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut codec = EnvelopeCodec::with_max_length(256);
    let mut buf = BytesMut::from(data);

    // Stop at the first stream error; item errors keep the stream alive
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
    let _ = codec.decode_eof(&mut buf);
});
