use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current unix time in seconds
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

// Strip characters that would end a quoted console argument or start a new command
pub fn sanitize_console_text(text: &str) -> String {
    text.replace(['"', ';'], "")
}

// Parse a non-empty run of ascii digits
pub fn parse_digits(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
