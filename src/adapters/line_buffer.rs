/// Splits a byte stream into newline-terminated lines.
///
/// Works on raw bytes so a network chunk that ends inside a multi-byte UTF-8
/// sequence is held back until the rest of the line arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    max_buffer_bytes: Option<usize>,
    overflowed_bytes: usize,
}

impl LineBuffer {
    pub fn new(max_buffer_bytes: Option<usize>) -> Self {
        Self {
            buffer: Vec::new(),
            max_buffer_bytes,
            overflowed_bytes: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(idx) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=idx).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }

        // Only the unterminated tail is subject to the cap.
        if let Some(max) = self.max_buffer_bytes {
            if self.buffer.len() > max {
                let excess = self.buffer.len() - max;
                self.buffer.drain(..excess);
                self.overflowed_bytes = self.overflowed_bytes.saturating_add(excess);
            }
        }

        lines
    }

    pub fn consume_overflowed_bytes(&mut self) -> usize {
        std::mem::take(&mut self.overflowed_bytes)
    }

    /// Returns whatever is left after the last newline.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}
