//! Property-based tests for the tail truncator.
//!
//! These verify the truncation bounds hold across all chunkings.

use super::truncate::{TailBuffer, TruncationKind};
use proptest::prelude::*;

fn arb_chunks() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 0..40)
}

fn arb_line_chunks() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{0,30}\n?", 0..60)
}

proptest! {
    /// In-memory window never exceeds `2 × max_bytes`; the view never
    /// exceeds `max_bytes`; totals account for every pushed byte.
    #[test]
    fn truncation_boundedness(chunks in arb_chunks(), max_bytes in 1usize..256) {
        let mut buf = TailBuffer::new(max_bytes, None);
        let mut pushed = 0u64;
        for chunk in &chunks {
            buf.push(chunk);
            pushed += chunk.len() as u64;
            prop_assert!(buf.in_memory_len() <= max_bytes * 2);
            prop_assert!(buf.view().len() <= max_bytes);
        }
        prop_assert_eq!(buf.total_bytes(), pushed);
    }

    /// Once total output exceeds the budget the truncation flag is set,
    /// and never before.
    #[test]
    fn truncation_flag_matches_totals(chunks in arb_chunks(), max_bytes in 1usize..256) {
        let mut buf = TailBuffer::new(max_bytes, None);
        for chunk in &chunks {
            buf.push(chunk);
            let expected = buf.total_bytes() > max_bytes as u64;
            prop_assert_eq!(buf.truncation().is_some(), expected);
            if expected {
                prop_assert_eq!(buf.truncation(), Some(TruncationKind::Bytes));
            }
        }
    }

    /// A truncated view of multi-line text starts at a line boundary: it
    /// equals a suffix of the full text beginning right after a newline
    /// (or the raw tail when a single line overflows the budget).
    #[test]
    fn view_starts_on_line_boundary(lines in arb_line_chunks(), max_bytes in 4usize..128) {
        let mut buf = TailBuffer::new(max_bytes, None);
        let mut full = String::new();
        for line in &lines {
            buf.push(line.as_bytes());
            full.push_str(line);
        }
        let view = buf.view();
        prop_assert!(full.ends_with(&view));
        // An interior newline means the view holds more than one line, so
        // its first line cannot be the oversized-single-line exception.
        let has_interior_newline = view.find('\n').is_some_and(|i| i + 1 < view.len());
        if buf.truncation().is_some() && has_interior_newline {
            let boundary = full.len() - view.len();
            if boundary > 0 {
                prop_assert_eq!(full.as_bytes()[boundary - 1], b'\n');
            }
        }
    }

    /// The view is always identical to independently re-truncating the
    /// concatenated input, regardless of chunk boundaries.
    #[test]
    fn chunking_is_irrelevant(chunks in arb_chunks(), max_bytes in 1usize..256) {
        let mut chunked = TailBuffer::new(max_bytes, None);
        for chunk in &chunks {
            chunked.push(chunk);
        }
        let mut whole = TailBuffer::new(max_bytes, None);
        let all: Vec<u8> = chunks.concat();
        whole.push(&all);
        prop_assert_eq!(chunked.view(), whole.view());
        prop_assert_eq!(chunked.total_bytes(), whole.total_bytes());
        prop_assert_eq!(chunked.total_lines(), whole.total_lines());
    }
}
