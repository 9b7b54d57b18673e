#![no_main]

use libfuzzer_sys::fuzz_target;

use rhizome_core::connpoint;
use rhizome_core::keys::cut_pad_key;
use rhizome_core::zap::ZapRequest;

fuzz_target!(|data: &[u8]| {
    // Split the input into pseudo-frames on 0x00 and feed the ZAP parser:
    // it must never panic, whatever the frame count or credential shape.
    let frames: Vec<Vec<u8>> = data.split(|b| *b == 0).map(<[u8]>::to_vec).collect();
    if let Some(req) = ZapRequest::parse(&frames) {
        let _ = req.accept();
        let _ = req.reject();
    }

    // Endpoint validation and key normalization on arbitrary text.
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = connpoint::validate(text);
        let normalized = cut_pad_key(text);
        assert_eq!(cut_pad_key(&normalized), normalized);
    }
});
