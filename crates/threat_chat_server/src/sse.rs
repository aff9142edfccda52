//! Server-Sent Events decoding for streaming completion responses.

use serde::de::DeserializeOwned;

/// Line-buffered SSE decoder. Bytes are buffered until a full line is
/// available, so multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Upper bound on buffered bytes without a newline.
    const MAX_BUFFER_SIZE: usize = 1024 * 1024;

    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk and return every complete `data:` frame.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(frame) = Self::parse_line(&line) {
                frames.push(frame);
            }
        }

        if self.buffer.len() > Self::MAX_BUFFER_SIZE {
            tracing::warn!(
                bytes = self.buffer.len(),
                "SSE line exceeded buffer limit, discarding"
            );
            self.buffer.clear();
        }
        frames
    }

    /// Flush a trailing line that had no newline.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let rest = std::mem::take(&mut self.buffer);
        Self::parse_line(&rest).into_iter().collect()
    }

    fn parse_line(line: &[u8]) -> Option<SseFrame> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        let data = line.strip_prefix("data:")?;
        Some(SseFrame {
            data: data.trim_start().to_string(),
        })
    }
}

/// One `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub data: String,
}

impl SseFrame {
    /// `[DONE]` sentinel that ends an OpenAI-style stream.
    pub fn is_done(&self) -> bool {
        self.data == "[DONE]"
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.data)
    }

    /// First 200 characters, for log lines.
    pub fn preview(&self) -> String {
        if self.data.chars().count() > 200 {
            let head: String = self.data.chars().take(200).collect();
            format!("{}...", head)
        } else {
            self.data.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_frames_and_ignores_other_fields() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"event: message\n: keep-alive\ndata: {\"a\":1}\n\ndata:[DONE]\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert!(frames[1].is_done());
    }

    #[test]
    fn partial_lines_wait_for_newline() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"part\":").is_empty());
        let frames = decoder.push(b" 1}\n");
        assert_eq!(frames.len(), 1);
        let value: serde_json::Value = frames[0].parse().unwrap();
        assert_eq!(value["part"], 1);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let line = "data: café\n".as_bytes();
        let split = line.len() - 2;
        assert!(decoder.push(&line[..split]).is_empty());
        let frames = decoder.push(&line[split..]);
        assert_eq!(frames[0].data, "café");
    }

    #[test]
    fn oversized_line_is_discarded_and_decoding_resumes() {
        let mut decoder = SseDecoder::new();
        let mut huge = b"data: ".to_vec();
        huge.extend(std::iter::repeat(b'x').take(SseDecoder::MAX_BUFFER_SIZE + 1));
        assert!(decoder.push(&huge).is_empty());
        assert!(decoder.buffer.is_empty());

        let frames = decoder.push(b"data: {\"ok\":true}\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"ok\":true}");
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish()[0].data, "tail");
        assert!(decoder.finish().is_empty());
    }
}
