//! Line framing for `text/event-stream` bodies.

/// Accumulates raw body chunks and yields the payload of each complete
/// `data:` line. Bytes are buffered until a newline arrives, so multi-byte
/// characters split across chunks survive intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the `data:` payloads it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = data_payload(line) {
                payloads.push(data.to_string());
            }
        }
        payloads
    }

    /// Payload of a trailing line that never received its newline.
    pub fn finish(self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.pending);
        data_payload(line.trim_end_matches('\r')).map(str::to_string)
    }
}

fn data_payload(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.is_empty() {
        None
    } else {
        Some(data)
    }
}
