// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Server-sent events frame decoding.
//!
//! Only the subset of the protocol the upstream actually uses is understood:
//!
//! - a line starting with `:` is a comment and is skipped,
//! - a line starting with `data: ` contributes its remainder to the pending event,
//!   consecutive data lines being joined with `\n`,
//! - a blank line dispatches the pending event, if any,
//! - every other line (`id:`, `event:`, `retry:`, ...) is ignored.
//!
//! At end of input a pending event is dispatched once before the stream ends.
//! The decoder holds per-stream state, so every new connection needs a new one.
//! A line longer than [`MAX_LINE_LENGTH`] fails decoding.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::constants::MAX_LINE_LENGTH;

const DATA_PREFIX: &str = "data: ";

#[derive(Debug)]
pub struct FrameDecoder {
    pending: String,
    /// Bytes of the buffered partial line already searched for a newline.
    next_index: usize,
    max_line_length: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            pending: String::new(),
            next_index: 0,
            max_line_length,
        }
    }

    fn line_too_long(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line longer than {} bytes", self.max_line_length),
        )
    }

    /// Applies one line and returns a dispatched event, if the line completes one.
    fn process_line(&mut self, line: &[u8]) -> Option<String> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if line.is_empty() {
            return self.take_pending();
        }
        if line.starts_with(b":") {
            return None;
        }
        if let Some(data) = line.strip_prefix(DATA_PREFIX.as_bytes()) {
            if !self.pending.is_empty() {
                self.pending.push('\n');
            }
            self.pending.push_str(&String::from_utf8_lossy(data));
        }
        None
    }

    fn take_pending(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

impl Decoder for FrameDecoder {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
                if src.len() > self.max_line_length {
                    return Err(self.line_too_long());
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let newline = self.next_index + offset;
            self.next_index = 0;
            if newline > self.max_line_length {
                return Err(self.line_too_long());
            }
            let line = src.split_to(newline + 1);
            if let Some(event) = self.process_line(&line[..newline]) {
                return Ok(Some(event));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        if !src.is_empty() {
            // unterminated last line
            let line = src.split_to(src.len());
            if let Some(event) = self.process_line(&line) {
                return Ok(Some(event));
            }
        }
        src.advance(src.len());
        self.next_index = 0;
        Ok(self.take_pending())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Feeds `chunks` through a fresh decoder the way the stream client does and
    /// collects every dispatched event, including those flushed at end of input.
    fn decode_chunks<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<String> {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        let mut events = Vec::new();
        for chunk in chunks {
            buf.extend_from_slice(chunk);
            while let Some(event) = decoder.decode(&mut buf).expect("decode failed") {
                events.push(event);
            }
        }
        while let Some(event) = decoder.decode_eof(&mut buf).expect("decode_eof failed") {
            events.push(event);
        }
        events
    }

    fn decode_all(input: &str) -> Vec<String> {
        decode_chunks([input.as_bytes()])
    }

    #[test]
    fn test_multi_line_data_is_joined() {
        assert_eq!(decode_all("data: a\ndata: b\n\n"), vec!["a\nb"]);
    }

    #[test]
    fn test_comments_contribute_nothing() {
        assert_eq!(decode_all(": keepalive\n\n"), Vec::<String>::new());
        assert_eq!(
            decode_all("data: a\n: heartbeat\ndata: b\n\n"),
            vec!["a\nb"]
        );
    }

    #[test]
    fn test_other_fields_are_ignored() {
        assert_eq!(
            decode_all("id: 7\nevent: update\nretry: 100\ndata: x\n\n"),
            vec!["x"]
        );
        // `data:` without the space is not the supported prefix
        assert_eq!(decode_all("data:x\n\n"), Vec::<String>::new());
    }

    #[test]
    fn test_blank_lines_without_data_are_noops() {
        assert_eq!(decode_all("\n\n\ndata: a\n\n\n\ndata: b\n\n"), vec!["a", "b"]);
    }

    #[test]
    fn test_trailing_buffer_flushed_once() {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from("data: tail\n");

        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert_eq!(
            decoder.decode_eof(&mut buf).unwrap(),
            Some("tail".to_string())
        );
        assert_eq!(decoder.decode_eof(&mut buf).unwrap(), None);
        assert_eq!(decoder.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_unterminated_last_line_is_processed() {
        assert_eq!(decode_all("data: a\n\ndata: b"), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_input_ends_immediately() {
        assert_eq!(decode_all(""), Vec::<String>::new());
    }

    #[test]
    fn test_crlf_line_endings() {
        assert_eq!(decode_all("data: a\r\ndata: b\r\n\r\n"), vec!["a\nb"]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let events = decode_chunks([
            b"da".as_slice(),
            b"ta: {\"tweet\":".as_slice(),
            b"{\"timestamp\":1}}\n".as_slice(),
            b"\n".as_slice(),
        ]);
        assert_eq!(events, vec![r#"{"tweet":{"timestamp":1}}"#]);
    }

    #[test]
    fn test_overlong_line_fails() {
        let mut decoder = FrameDecoder::with_max_line_length(8);
        let mut buf = BytesMut::from("data: 0");
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"123");
        let err = decoder.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_overlong_terminated_line_fails() {
        let mut decoder = FrameDecoder::with_max_line_length(8);
        let mut buf = BytesMut::from("data: 0123456789\n\n");
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn test_line_at_limit_is_accepted() {
        let mut decoder = FrameDecoder::with_max_line_length(8);
        let mut buf = BytesMut::from("data: ab");
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"\n\n");
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some("ab".to_string()));
    }

    proptest! {
        #[test]
        fn chunk_boundaries_do_not_change_events(
            payloads in proptest::collection::vec("[a-z0-9{}\":, ]{1,20}", 0..8),
            cuts in proptest::collection::vec(0usize..200, 0..10),
        ) {
            let input: String = payloads
                .iter()
                .map(|p| format!("data: {p}\n: c\n\n"))
                .collect();
            let bytes = input.as_bytes();

            let mut offsets: Vec<usize> = cuts.into_iter().map(|c| c.min(bytes.len())).collect();
            offsets.push(0);
            offsets.push(bytes.len());
            offsets.sort_unstable();
            offsets.dedup();
            let chunks = offsets.windows(2).map(|w| &bytes[w[0]..w[1]]);

            prop_assert_eq!(decode_chunks(chunks), payloads);
        }
    }
}
