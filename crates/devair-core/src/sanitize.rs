//! Terminal control sequence stripping for streamed build output.

use regex::Regex;
use std::sync::OnceLock;

/// ESC or 8-bit CSI, optional intermediates, optional numeric parameters, one final byte.
const CONTROL_SEQUENCE_PATTERN: &str =
    r"[\x1b\x{9b}][\[()#;?]*(?:[0-9]{1,4}(?:;[0-9]{0,4})*)?[0-9A-ORZcf-nqry=><]";

fn control_sequence_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(CONTROL_SEQUENCE_PATTERN).expect("valid regex"))
}

/// Remove terminal control sequences from a raw log fragment.
///
/// Everything that is not part of a recognised sequence is kept in order,
/// including newlines. A lone or malformed escape is passed through as-is.
/// Stripping repeats until the text is stable, so a sequence spliced together
/// by an earlier removal is removed too and the function is idempotent.
pub fn strip_control_sequences(raw: &str) -> String {
    let pattern = control_sequence_regex();
    let mut current = raw.to_string();
    loop {
        let next = match pattern.replace_all(&current, "") {
            std::borrow::Cow::Borrowed(_) => None,
            std::borrow::Cow::Owned(stripped) => Some(stripped),
        };
        match next {
            Some(stripped) => current = stripped,
            None => return current,
        }
    }
}
