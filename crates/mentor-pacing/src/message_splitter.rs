//! Splits one generated response into platform-sized message parts.
//!
//! The generator marks intended message boundaries with a literal token. Any
//! segment that is still too long is cut at the most natural separator found
//! in its leading window, falling back to a hard cut.

/// Boundary token the response generator places between messages.
pub const DEFAULT_SPLIT_MARKER: &str = "---SPLIT---";
/// Longest part, in characters, handed to the platform.
pub const DEFAULT_MAX_PART_CHARS: usize = 2_000;

const LENGTH_SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];
// A separator earlier than this share of the window would leave a stub part.
const MIN_CUT_RATIO: f64 = 0.3;

/// Splits `text` on `marker`, then length-splits every segment over `max_chars`.
///
/// Returns trimmed, non-empty parts of at most `max_chars` characters each.
/// When the marker split leaves nothing usable the trimmed input is used as a
/// single segment; whitespace-only input yields no parts.
pub fn split_response(text: &str, marker: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let segments: Vec<&str> = if marker.is_empty() {
        vec![text]
    } else {
        text.split(marker).collect()
    };

    let mut parts = Vec::new();
    for segment in segments {
        let cleaned = segment.trim();
        if cleaned.is_empty() {
            continue;
        }
        parts.extend(split_long_message(cleaned, max_chars));
    }

    if parts.is_empty() {
        let whole = text.trim();
        if !whole.is_empty() {
            parts.extend(split_long_message(whole, max_chars));
        }
    }
    parts
}

/// Length-splits `text` at natural break points so each part fits `max_chars`.
pub fn split_long_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut parts = Vec::new();
    let mut remaining = text.trim();

    while remaining.chars().count() > max_chars {
        let window_end = byte_offset_of_char(remaining, max_chars);
        let cut = natural_cut(&remaining[..window_end], max_chars).unwrap_or(window_end);

        let head = remaining[..cut].trim_end();
        if !head.is_empty() {
            parts.push(head.to_string());
        }
        remaining = remaining[cut..].trim_start();
    }

    if !remaining.is_empty() {
        parts.push(remaining.to_string());
    }
    parts
}

/// Byte offset just past the cut chosen inside `window`, if any separator qualifies.
fn natural_cut(window: &str, max_chars: usize) -> Option<usize> {
    let min_chars = max_chars as f64 * MIN_CUT_RATIO;
    LENGTH_SEPARATORS.iter().find_map(|separator| {
        let index = window.rfind(separator)?;
        let chars_before = window[..index].chars().count();
        (chars_before as f64 > min_chars).then_some(index + separator.len())
    })
}

fn byte_offset_of_char(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len())
}
