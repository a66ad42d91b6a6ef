// External crates
use bytes::BytesMut;

/// Longest line, in characters, shipped as-is.
pub const MAX_LINE_CHARS: usize = 32_000;

/// Appended to lines cut at [`MAX_LINE_CHARS`].
pub const TRUNCATION_MARKER: &str = " (cut off, too long...)";

/// Bytes of an unterminated line kept in memory. Enough for `MAX_LINE_CHARS`
/// four-byte characters; anything beyond is cut anyway.
const MAX_PENDING_BYTES: usize = MAX_LINE_CHARS * 4;

/// Splits appended file bytes into complete `\n` terminated lines, holding a
/// trailing partial line until its newline arrives.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: BytesMut,
    overflowed: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.extend_pending(&rest[..pos]);
            lines.push(self.take_line());
            rest = &rest[pos + 1..];
        }

        self.extend_pending(rest);
        lines
    }

    /// Drop any held partial line. Returns the number of bytes discarded.
    pub fn reset(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.overflowed = false;
        dropped
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn extend_pending(&mut self, bytes: &[u8]) {
        let room = MAX_PENDING_BYTES.saturating_sub(self.pending.len());
        if bytes.len() > room {
            self.overflowed = true;
        }
        self.pending.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    fn take_line(&mut self) -> String {
        let raw = self.pending.split().freeze();
        let line = String::from_utf8_lossy(&raw).into_owned();
        let overflowed = std::mem::take(&mut self.overflowed);

        if overflowed {
            force_truncate(line)
        } else {
            cap_line(line)
        }
    }
}

/// Cut `line` to [`MAX_LINE_CHARS`] characters plus the marker when it is longer.
pub fn cap_line(line: String) -> String {
    match line.char_indices().nth(MAX_LINE_CHARS) {
        Some(_) => force_truncate(line),
        None => line,
    }
}

fn force_truncate(mut line: String) -> String {
    if let Some((idx, _)) = line.char_indices().nth(MAX_LINE_CHARS) {
        line.truncate(idx);
    }
    line.push_str(TRUNCATION_MARKER);
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines_and_holds_partial() {
        let mut framer = LineFramer::new();

        assert_eq!(framer.push(b"first\nsecond\nthi"), vec!["first", "second"]);
        assert_eq!(framer.pending_len(), 3);
        assert_eq!(framer.push(b"rd\n"), vec!["third"]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn empty_lines_are_preserved() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"a\n\nb\n"), vec!["a", "", "b"]);
    }

    #[test]
    fn long_line_is_cut_with_marker() {
        let line = "x".repeat(40_000);
        let capped = cap_line(line.clone());

        assert_eq!(capped, format!("{}{}", &line[..32_000], TRUNCATION_MARKER));
    }

    #[test]
    fn line_at_the_limit_is_untouched() {
        let line = "y".repeat(MAX_LINE_CHARS);
        assert_eq!(cap_line(line.clone()), line);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let line = "é".repeat(MAX_LINE_CHARS + 5);
        let capped = cap_line(line);

        let body = capped.strip_suffix(TRUNCATION_MARKER).unwrap();
        assert_eq!(body.chars().count(), MAX_LINE_CHARS);
    }

    #[test]
    fn oversized_partial_line_is_bounded_in_memory() {
        let mut framer = LineFramer::new();
        for _ in 0..20 {
            assert!(framer.push(&[b'z'; 64 * 1024]).is_empty());
        }
        assert!(framer.pending_len() <= MAX_LINE_CHARS * 4);

        let lines = framer.push(b"\nnext\n");
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(TRUNCATION_MARKER));
        assert_eq!(lines[0].len(), MAX_LINE_CHARS + TRUNCATION_MARKER.len());
        assert_eq!(lines[1], "next");
    }

    #[test]
    fn reset_drops_partial_line() {
        let mut framer = LineFramer::new();
        framer.push(b"half");
        assert_eq!(framer.reset(), 4);
        assert_eq!(framer.push(b"whole\n"), vec!["whole"]);
    }
}
