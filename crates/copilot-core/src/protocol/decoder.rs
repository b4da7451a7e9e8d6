/// Field prefix every data-carrying line starts with.
const DATA_FIELD: &str = "data:";

/// Turns arbitrarily split byte chunks into complete `data:` payloads.
///
/// Undecoded bytes are held until their line terminator arrives, so a
/// multi-byte character split across two reads is decoded whole. `\n` never
/// occurs inside a UTF-8 continuation byte, which makes splitting on the raw
/// byte safe.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the payloads of every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let remainder = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, remainder);

        complete
            .split(|&b| b == b'\n')
            .filter_map(|raw| {
                let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
                let line = String::from_utf8_lossy(raw);
                data_payload(&line).map(str::to_string)
            })
            .collect()
    }

    /// Bytes received after the last line terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Ends the stream. An unterminated trailing line is truncated data and
    /// is dropped.
    pub fn finish(self) {
        if !self.pending.is_empty() {
            tracing::debug!(
                bytes = self.pending.len(),
                "Discarding unterminated line at end of stream"
            );
        }
    }
}

/// Extract the payload of a `data:` line, removing one optional space after
/// the colon. Blank lines, comments, and other fields yield `None`.
fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(DATA_FIELD)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut decoder = FrameDecoder::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            lines.extend(decoder.push(chunk));
        }
        decoder.finish();
        lines
    }

    #[test]
    fn test_single_chunk_multiple_lines() {
        let lines = decode_all(&[b"data: Hello\n\ndata:  world\n\ndata: [DONE]\n\n"]);
        assert_eq!(lines, vec!["Hello", " world", "[DONE]"]);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let lines = decode_all(&[b"data: Hel", b"lo\n", b"\ndata: [DO", b"NE]\n\n"]);
        assert_eq!(lines, vec!["Hello", "[DONE]"]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let bytes = "data: caf\u{e9} \u{1F680}\n".as_bytes();
        // Split inside both the two-byte and the four-byte sequence.
        let e_acute = bytes.iter().position(|&b| b == 0xC3).unwrap();
        let rocket = bytes.iter().position(|&b| b == 0xF0).unwrap();
        let lines = decode_all(&[
            &bytes[..e_acute + 1],
            &bytes[e_acute + 1..rocket + 2],
            &bytes[rocket + 2..],
        ]);
        assert_eq!(lines, vec!["caf\u{e9} \u{1F680}"]);
    }

    #[test]
    fn test_every_split_point_yields_same_payloads() {
        let stream = "data: [META]{\"intent\":\"risk\"}\n\ndata: Sch\u{e4}tzung\n\ndata:  l\u{e4}uft\n\ndata: [DONE]\n\n"
            .as_bytes();
        let expected = decode_all(&[stream]);
        for split in 0..=stream.len() {
            assert_eq!(
                decode_all(&[&stream[..split], &stream[split..]]),
                expected,
                "split at {split}"
            );
        }
        let byte_at_a_time: Vec<&[u8]> = stream.chunks(1).collect();
        assert_eq!(decode_all(&byte_at_a_time), expected);
    }

    #[test]
    fn test_ignores_blank_comment_and_other_fields() {
        let lines = decode_all(&[b": keep-alive\n\nevent: message\nid: 7\ndata: x\n\n"]);
        assert_eq!(lines, vec!["x"]);
    }

    #[test]
    fn test_crlf_terminators() {
        let lines = decode_all(&[b"data: a\r\n\r\ndata: b\r\n"]);
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_preserves_payload_whitespace() {
        let lines = decode_all(&[b"data:   indented  \n"]);
        assert_eq!(lines, vec!["  indented  "]);
    }

    #[test]
    fn test_unterminated_trailing_line_is_dropped() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push(b"data: kept\ndata: trunc"), vec!["kept"]);
        assert_eq!(decoder.pending_len(), "data: trunc".len());
        decoder.finish();
    }
}
