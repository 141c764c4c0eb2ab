use memchr::memchr_iter;

/// Incremental line splitter for an upstream byte stream.
///
/// Feed it raw chunks cut at arbitrary byte boundaries and it yields every
/// complete line in order, holding back the trailing fragment until its
/// terminator arrives. Lines end at `\n`; a preceding `\r` is stripped.
///
/// Splitting happens on bytes and each line is decoded only once it is
/// complete. `\n` never occurs inside a multi-byte UTF-8 sequence, so a
/// character split across chunks is reassembled before decoding.
#[derive(Debug, Default)]
pub struct LineReassembler {
    buffer: Vec<u8>,
    read_offset: usize,
}

impl LineReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the complete lines it finished.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed a chunk and append complete lines into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        let scan_start = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut processed_up_to = self.read_offset;
        for rel_pos in memchr_iter(b'\n', &self.buffer[scan_start..]) {
            let line_end = scan_start + rel_pos;
            out.push(decode_line(&self.buffer[processed_up_to..line_end]));
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Take the unterminated tail at end of stream.
    ///
    /// Returns `None` when nothing but whitespace is pending. The buffer is
    /// empty afterwards.
    pub fn finish(&mut self) -> Option<String> {
        let tail = decode_line(&self.buffer[self.read_offset..]);
        self.buffer.clear();
        self.read_offset = 0;
        if tail.trim().is_empty() {
            None
        } else {
            Some(tail)
        }
    }

    /// Number of bytes held back waiting for a terminator.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.read_offset
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"héllo 👋\"}]}}]}\r\n\r\n\
data: {\"candidates\":[{\"finishReason\":\"STOP\"}]}\n\n";

    fn lines_for_chunks(chunks: &[&[u8]]) -> (Vec<String>, Option<String>) {
        let mut reassembler = LineReassembler::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            reassembler.feed_into(chunk, &mut lines);
        }
        let tail = reassembler.finish();
        (lines, tail)
    }

    #[test]
    fn splits_complete_lines_and_strips_cr() {
        let mut reassembler = LineReassembler::new();
        let lines = reassembler.feed(b"a\r\nb\n\nc");
        assert_eq!(lines, vec!["a", "b", ""]);
        assert_eq!(reassembler.pending_len(), 1);
        assert_eq!(reassembler.finish().as_deref(), Some("c"));
        assert_eq!(reassembler.pending_len(), 0);
    }

    #[test]
    fn partial_line_is_held_until_terminated() {
        let mut reassembler = LineReassembler::new();
        assert!(reassembler.feed(b"data: {\"candid").is_empty());
        let lines = reassembler.feed(b"ates\":[]}\n\n");
        assert_eq!(lines, vec!["data: {\"candidates\":[]}", ""]);
    }

    #[test]
    fn every_two_way_split_yields_identical_lines() {
        let bytes = SAMPLE.as_bytes();
        let (expected, expected_tail) = lines_for_chunks(&[bytes]);
        assert_eq!(expected.len(), 4);
        assert!(expected[0].contains("héllo 👋"));
        assert!(expected_tail.is_none());

        // Includes cuts inside "\r\n" and inside the multi-byte characters.
        for cut in 0..=bytes.len() {
            let (lines, tail) = lines_for_chunks(&[&bytes[..cut], &bytes[cut..]]);
            assert_eq!(lines, expected, "cut at {cut}");
            assert_eq!(tail, expected_tail, "cut at {cut}");
        }
    }

    #[test]
    fn byte_at_a_time_yields_identical_lines() {
        let bytes = SAMPLE.as_bytes();
        let (expected, _) = lines_for_chunks(&[bytes]);
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        let (lines, tail) = lines_for_chunks(&chunks);
        assert_eq!(lines, expected);
        assert!(tail.is_none());
    }

    #[test]
    fn unterminated_final_event_is_flushed() {
        let (lines, tail) = lines_for_chunks(&[b"data: {\"a\":1}\n\ndata: {\"b\":", b"2}"]);
        assert_eq!(lines, vec!["data: {\"a\":1}", ""]);
        assert_eq!(tail.as_deref(), Some("data: {\"b\":2}"));
    }

    #[test]
    fn whitespace_tail_is_not_flushed() {
        let (_, tail) = lines_for_chunks(&[b"data: x\n  \r"]);
        assert!(tail.is_none());
    }

    #[test]
    fn invalid_utf8_is_replaced_not_dropped() {
        let (lines, _) = lines_for_chunks(&[b"ok\n\xff\xfe\n"]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "ok");
        assert!(lines[1].contains('\u{fffd}'));
    }

    #[test]
    fn long_streams_compact_the_buffer() {
        let mut reassembler = LineReassembler::new();
        let mut total = 0;
        for _ in 0..1_000 {
            total += reassembler.feed(b"data: {\"x\":1}\npartial").len();
            total += reassembler.feed(b"-rest\n").len();
        }
        assert_eq!(total, 2_000);
        assert_eq!(reassembler.pending_len(), 0);
    }
}
