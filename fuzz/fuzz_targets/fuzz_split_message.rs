#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (u16, &str)| {
    let (limit, text) = input;
    let limit = usize::from(limit % 4096) + 1;
    let chunks = chatrelay::auto_reply::split_message(text, limit);
    assert!(chunks.iter().all(|c| c.chars().count() <= limit));
    assert_eq!(chunks.concat(), text);
});
