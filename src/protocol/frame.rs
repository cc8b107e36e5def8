//! The wire frame: a 4-byte big-endian length, a 4-byte counter, and a payload
//! whose first whitespace-delimited token is the command name.

use bytes::Bytes;

pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Monotonic per-direction counter pairing a response to its request.
    pub counter: u32,
    /// Raw payload: `<command> <body>` or just `<command>` with no body.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(counter: u32, payload: Bytes) -> Self {
        Self { counter, payload }
    }

    /// Splits the payload into its command token and the remaining body.
    pub fn split_command(&self) -> (&str, &[u8]) {
        let bytes = self.payload.as_ref();
        match bytes.iter().position(|&b| b == b' ') {
            Some(pos) => {
                let cmd = std::str::from_utf8(&bytes[..pos]).unwrap_or("");
                (cmd, &bytes[pos + 1..])
            }
            None => (std::str::from_utf8(bytes).unwrap_or(""), &[]),
        }
    }

    pub fn ok(counter: u32, body: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(3 + body.len());
        payload.extend_from_slice(b"ok ");
        payload.extend_from_slice(body);
        Frame::new(counter, Bytes::from(payload))
    }

    pub fn err(counter: u32, message: impl AsRef<str>) -> Self {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"err ");
        payload.extend_from_slice(message.as_ref().as_bytes());
        Frame::new(counter, Bytes::from(payload))
    }

    pub fn ack(counter: u32, worker_id: impl AsRef<str>) -> Self {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"ack ");
        payload.extend_from_slice(worker_id.as_ref().as_bytes());
        Frame::new(counter, Bytes::from(payload))
    }
}
