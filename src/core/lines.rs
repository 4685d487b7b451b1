// src/core/lines.rs

/// Incremental UTF-8 line splitter.
///
/// Bytes arrive in arbitrary chunks; multibyte sequences split across chunks
/// are stitched back together and invalid sequences become U+FFFD. Lines end
/// at `\r\n`, `\n` or `\r`. A `\r` at the very end of a chunk is held back
/// until the next chunk shows whether a `\n` follows.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
    text: String,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode(chunk);
        let mut lines = Vec::new();
        self.drain_lines(&mut lines, false);
        lines
    }

    /// Ends the stream.
    ///
    /// Returns the remaining lines, the trailing partial line if there is one,
    /// and finally one empty string for the decoder flush.
    pub fn finish(mut self) -> Vec<String> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.text.push_str(&String::from_utf8_lossy(&rest));
        }
        let mut lines = Vec::new();
        self.drain_lines(&mut lines, true);
        if !self.text.is_empty() {
            lines.push(std::mem::take(&mut self.text));
        }
        lines.push(String::new());
        lines
    }

    fn decode(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // `valid_up_to` guarantees this prefix is valid UTF-8.
                    self.text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            rest = after.get(len..).unwrap_or_default();
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes.
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
    }

    fn drain_lines(&mut self, out: &mut Vec<String>, eof: bool) {
        let bytes = self.text.as_bytes();
        let mut start = 0;
        let mut cursor = 0;
        while let Some(offset) = bytes
            .get(cursor..)
            .and_then(|tail| tail.iter().position(|b| *b == b'\n' || *b == b'\r'))
        {
            let pos = cursor + offset;
            let sep_len = match (bytes.get(pos), bytes.get(pos + 1)) {
                (Some(b'\r'), Some(b'\n')) => 2,
                (Some(b'\r'), None) if !eof => break,
                _ => 1,
            };
            if let Some(line) = self.text.get(start..pos) {
                out.push(line.to_string());
            }
            start = pos + sep_len;
            cursor = start;
        }
        self.text.drain(..start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(chunks: &[&[u8]]) -> Vec<String> {
        let mut decoder = LineDecoder::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            lines.extend(decoder.push(chunk));
        }
        lines.extend(decoder.finish());
        lines
    }

    #[test]
    fn test_mixed_line_endings() {
        assert_eq!(feed(&[b"a\r\nb\nc\rd"]), ["a", "b", "c", "d", ""]);
    }

    #[test]
    fn test_trailing_newline_yields_flush_only() {
        assert_eq!(feed(&[b"one\ntwo\n"]), ["one", "two", ""]);
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        assert_eq!(feed(&[b"one\r", b"\ntwo"]), ["one", "two", ""]);
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let bytes = "h\u{e9}llo\n".as_bytes();
        let (a, b) = bytes.split_at(2);
        assert_eq!(feed(&[a, b]), ["h\u{e9}llo", ""]);
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        assert_eq!(feed(&[b"ok\xff\n"]), ["ok\u{fffd}", ""]);
    }

    #[test]
    fn test_empty_stream() {
        assert_eq!(feed(&[]), [""]);
    }
}
