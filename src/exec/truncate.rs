//! Rolling tail buffer for child process output.
//!
//! The executor keeps at most `2 × max_bytes` of output in memory; the
//! returned view is the tail, truncated to `max_bytes` (and optionally to a
//! line budget for grep-like tools). Anything beyond the window lives only
//! in the spill file.

/// Which budget tripped first when output was truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationKind {
    Bytes,
    Lines,
}

/// Tail-truncating accumulator for streamed output.
#[derive(Debug)]
pub struct TailBuffer {
    max_bytes: usize,
    max_lines: Option<usize>,
    buf: Vec<u8>,
    total_bytes: u64,
    total_lines: u64,
    truncation: Option<TruncationKind>,
}

impl TailBuffer {
    pub fn new(max_bytes: usize, max_lines: Option<usize>) -> Self {
        Self {
            max_bytes,
            max_lines,
            buf: Vec::new(),
            total_bytes: 0,
            total_lines: 0,
            truncation: None,
        }
    }

    /// Append a chunk, dropping the oldest bytes once the window overflows.
    pub fn push(&mut self, chunk: &[u8]) {
        self.total_bytes += chunk.len() as u64;
        self.total_lines += chunk.iter().filter(|b| **b == b'\n').count() as u64;
        self.buf.extend_from_slice(chunk);

        let window = self.max_bytes.saturating_mul(2);
        if self.buf.len() > window {
            let drop = self.buf.len() - window;
            self.buf.drain(..drop);
        }

        if self.truncation.is_none() {
            if let Some(max_lines) = self.max_lines {
                if self.total_lines > max_lines as u64 {
                    self.truncation = Some(TruncationKind::Lines);
                }
            }
            if self.truncation.is_none() && self.total_bytes > self.max_bytes as u64 {
                self.truncation = Some(TruncationKind::Bytes);
            }
        }
    }

    /// Total bytes pushed, including everything outside the window.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Total newline count across all pushed chunks.
    pub fn total_lines(&self) -> u64 {
        self.total_lines
    }

    pub fn truncation(&self) -> Option<TruncationKind> {
        self.truncation
    }

    /// Bytes currently held in memory. Bounded by `2 × max_bytes`.
    pub fn in_memory_len(&self) -> usize {
        self.buf.len()
    }

    /// The raw window contents. Used to seed the spill file, which happens
    /// before anything has been dropped from the window.
    pub fn view_raw(&self) -> &[u8] {
        &self.buf
    }

    /// The truncated tail view.
    ///
    /// At most `max_bytes` long and, when a line budget is set, at most
    /// `max_lines` lines. When truncated, the view starts at a line
    /// boundary unless the final line alone exceeds the byte budget.
    pub fn view(&self) -> String {
        let tail_start = self.buf.len().saturating_sub(self.max_bytes);
        let mut tail = &self.buf[tail_start..];

        if self.truncation.is_some() && tail_start > 0 {
            // Drop the partial first line; keep the raw tail when the
            // remaining output is a single oversized line.
            if let Some(nl) = tail.iter().position(|b| *b == b'\n') {
                if nl + 1 < tail.len() {
                    tail = &tail[nl + 1..];
                }
            }
        }

        let mut text = String::from_utf8_lossy(tail).into_owned();

        if let Some(max_lines) = self.max_lines {
            let line_count = text.lines().count();
            if line_count > max_lines {
                let skip = line_count - max_lines;
                let mut start = 0;
                for _ in 0..skip {
                    match text[start..].find('\n') {
                        Some(nl) => start += nl + 1,
                        None => break,
                    }
                }
                text = text.split_off(start);
            }
        }

        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_output_passes_through() {
        let mut buf = TailBuffer::new(1024, None);
        buf.push(b"hello\nworld\n");
        assert_eq!(buf.view(), "hello\nworld\n");
        assert_eq!(buf.truncation(), None);
        assert_eq!(buf.total_lines(), 2);
    }

    #[test]
    fn byte_truncation_keeps_tail() {
        let mut buf = TailBuffer::new(16, None);
        for i in 0..20 {
            buf.push(format!("line-{i}\n").as_bytes());
        }
        assert_eq!(buf.truncation(), Some(TruncationKind::Bytes));
        let view = buf.view();
        assert!(view.len() <= 16);
        assert!(view.ends_with("line-19\n"));
        // First emitted line starts at a line boundary.
        assert!(view.starts_with("line-"));
    }

    #[test]
    fn window_is_bounded() {
        let mut buf = TailBuffer::new(64, None);
        for _ in 0..100 {
            buf.push(&[b'x'; 64]);
        }
        assert!(buf.in_memory_len() <= 128);
        assert_eq!(buf.total_bytes(), 6400);
    }

    #[test]
    fn single_oversized_line_keeps_raw_tail() {
        let mut buf = TailBuffer::new(8, None);
        buf.push(b"abcdefghijklmnopqrstuvwxyz");
        let view = buf.view();
        assert_eq!(view, "stuvwxyz");
    }

    #[test]
    fn line_budget_trips_before_bytes() {
        let mut buf = TailBuffer::new(1024, Some(3));
        buf.push(b"a\nb\nc\nd\ne\n");
        assert_eq!(buf.truncation(), Some(TruncationKind::Lines));
        assert_eq!(buf.view(), "c\nd\ne\n");
    }

    #[test]
    fn chunk_straddling_boundaries() {
        let mut buf = TailBuffer::new(10, None);
        buf.push(b"aaaa\nbb");
        buf.push(b"bb\ncccc\ndd");
        buf.push(b"dd\n");
        let view = buf.view();
        assert!(view.ends_with("dddd\n"));
        assert!(view.len() <= 10);
    }
}
