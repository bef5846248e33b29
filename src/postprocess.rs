//! Reply post-processing.
//!
//! Best-effort cleanup of raw model output before delivery: internal
//! reasoning markup (`<think>…</think>`), fenced code blocks, and
//! brace-delimited spans are stripped. This is a heuristic, not a parser —
//! it can over-strip legitimate braces in prose and under-strip malformed
//! nesting. Also hosts transport-size chunking.

use regex::Regex;

/// Strip reasoning markup, fenced blocks, and brace-delimited spans.
pub fn clean_response(raw: &str) -> String {
    let think = Regex::new(r"(?s)<think>.*?</think>").expect("static pattern");
    let fence = Regex::new(r"(?s)```.*?```").expect("static pattern");
    let braces = Regex::new(r"(?s)\{.*?\}").expect("static pattern");

    let cleaned = think.replace_all(raw, "");
    let cleaned = fence.replace_all(&cleaned, "");
    let cleaned = braces.replace_all(&cleaned, "");
    cleaned.trim().to_string()
}

/// Split text into in-order chunks of at most `max_chars` Unicode scalars.
///
/// Counting characters rather than bytes means a chunk boundary can never
/// land inside a multi-byte sequence. `max_chars` of zero yields the whole
/// text as a single chunk.
pub fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if max_chars == 0 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for ch in text.chars() {
        if count == max_chars {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_think_spans() {
        let raw = "<think>internal chain</think>Hello there";
        assert_eq!(clean_response(raw), "Hello there");
    }

    #[test]
    fn strips_multiline_think_spans() {
        let raw = "<think>line one\nline two</think>\nvisible";
        assert_eq!(clean_response(raw), "visible");
    }

    #[test]
    fn strips_fenced_blocks() {
        let raw = "before ```json\n{\"a\": 1}\n``` after";
        assert_eq!(clean_response(raw), "before  after");
    }

    #[test]
    fn strips_brace_spans() {
        let raw = "hi {\"meta\": true} there";
        assert_eq!(clean_response(raw), "hi  there");
    }

    #[test]
    fn over_strips_legitimate_braces_known_limitation() {
        // Heuristic behavior: prose braces are removed too.
        let raw = "I have {five} apples";
        assert_eq!(clean_response(raw), "I have  apples");
    }

    #[test]
    fn plain_text_untouched_apart_from_trim() {
        assert_eq!(clean_response("  hello  "), "hello");
    }

    #[test]
    fn chunk_sizes_5000_at_2048() {
        let text = "x".repeat(5000);
        let chunks = chunk_message(&text, 2048);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
        assert_eq!(sizes, vec![2048, 2048, 904]);
    }

    #[test]
    fn chunks_preserve_order() {
        let text: String = (0..10).map(|i| char::from(b'a' + i)).collect();
        let chunks = chunk_message(&text, 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn chunking_never_splits_multibyte_chars() {
        let text = "雨".repeat(7); // 3 bytes per char
        let chunks = chunk_message(&text, 3);
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.chars().all(|c| c == '雨'));
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_message("hi", 2048), vec!["hi"]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_message("", 2048).is_empty());
    }
}
