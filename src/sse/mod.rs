//! SSE line framer — stateless byte-to-line splitting (spec §4.1).
//!
//! Modeled on `aiproxy_common::sse::SseParser`'s feed/flush shape, but the wire format
//! here is not full SSE event blocks (`event:`/`data:` separated by a blank line) — it is
//! the raw LF-delimited line stream the upstream `data: {...}` frames arrive on. Splitting
//! into `event_type`/`data` pairs happens one layer up, per provider.

pub mod google;
pub mod openai;

/// Incremental LF-line framer carrying state (the unconsumed tail) across chunks.
pub struct LineFramer {
    buffer: Vec<u8>,
    max_line_len: usize,
}

impl LineFramer {
    pub fn new(max_line_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line_len,
        }
    }

    /// Feed a byte chunk, returning complete lines (CR stripped). Lines longer than
    /// `max_line_len` are dropped with a warning; the terminating LF is still consumed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0usize;

        while let Some(rel_idx) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let idx = start + rel_idx;
            let mut line = &self.buffer[start..idx];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if line.len() > self.max_line_len {
                tracing::warn!(len = line.len(), "SSE line too long, dropping");
            } else {
                lines.push(line.to_vec());
            }
            start = idx + 1;
        }

        self.buffer.drain(..start);
        lines
    }

    /// Flush any remaining buffered bytes as a final line (handles a missing trailing LF).
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buffer);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.is_empty() || line.len() > self.max_line_len {
            return None;
        }
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framer_splits_simple_lines() {
        let mut framer = LineFramer::new(1024);
        let lines = framer.feed(b"a\nb\nc\n");
        assert_eq!(lines, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert!(framer.flush().is_none());
    }

    #[test]
    fn framer_strips_cr() {
        let mut framer = LineFramer::new(1024);
        let lines = framer.feed(b"data: a\r\ndata: b\r\n");
        assert_eq!(lines, vec![b"data: a".to_vec(), b"data: b".to_vec()]);
    }

    #[test]
    fn framer_boundary_scenario_s6() {
        // spec.md S6: ["data: a\n", "bc\ndata:", " d\n"] -> ["data: a", "bc", "data: d"]
        let mut framer = LineFramer::new(1024);
        let mut all = Vec::new();
        all.extend(framer.feed(b"data: a\n"));
        all.extend(framer.feed(b"bc\ndata:"));
        all.extend(framer.feed(b" d\n"));
        let as_strings: Vec<String> = all
            .into_iter()
            .map(|l| String::from_utf8(l).unwrap())
            .collect();
        assert_eq!(as_strings, vec!["data: a", "bc", "data: d"]);
        assert!(framer.flush().is_none());
    }

    #[test]
    fn framer_drops_overlong_lines() {
        let mut framer = LineFramer::new(4);
        let lines = framer.feed(b"toolong\nok\n");
        assert_eq!(lines, vec![b"ok".to_vec()]);
    }

    #[test]
    fn framer_flush_returns_residual() {
        let mut framer = LineFramer::new(1024);
        let lines = framer.feed(b"no-newline-yet");
        assert!(lines.is_empty());
        assert_eq!(framer.flush(), Some(b"no-newline-yet".to_vec()));
        assert!(framer.flush().is_none());
    }

    /// Testable property 4: frame(S) == frame_incremental(split(S, any)) for any split.
    #[test]
    fn framer_round_trip_arbitrary_splits() {
        let input = b"data: one\ndata: two\nmid-line".to_vec();
        let whole_lines = {
            let mut f = LineFramer::new(1024);
            let mut lines = f.feed(&input);
            if let Some(tail) = f.flush() {
                lines.push(tail);
            }
            lines
        };

        for split_at in 0..=input.len() {
            let (a, b) = input.split_at(split_at);
            let mut f = LineFramer::new(1024);
            let mut lines = f.feed(a);
            lines.extend(f.feed(b));
            if let Some(tail) = f.flush() {
                lines.push(tail);
            }
            assert_eq!(lines, whole_lines, "mismatch splitting at {split_at}");
        }
    }
}
