#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Some(parsed) = chatrelay::auto_reply::parse_command(s) {
            assert!(parsed.command.starts_with('/'));
            assert!(!parsed.command.contains('@'));
        }
    }
});
