//! `tokio_util::codec` adapter for [`Frame`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::ClusterError;

use super::frame::{Frame, HEADER_LEN};

/// Payloads above this size indicate a corrupt or hostile length field rather
/// than a legitimate archive chunk (those go through the streaming sub-protocol,
/// not a single frame).
const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct ClusterFrameCodec;

impl Encoder<Frame> for ClusterFrameCodec {
    type Error = ClusterError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u32(item.payload.len() as u32);
        dst.put_u32(item.counter);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for ClusterFrameCodec {
    type Item = Frame;
    type Error = ClusterError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = u32::from_be_bytes(src[0..4].try_into().unwrap()) as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(ClusterError::MalformedFrame(format!(
                "frame length {len} exceeds maximum"
            )));
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }
        let counter = u32::from_be_bytes(src[4..8].try_into().unwrap());
        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame::new(counter, payload)))
    }
}

/// Reads a single `<len> <filename> <mtime>\n<body>` merge record header from a
/// streamed archive body. Returns `None` if the stream is exhausted (no more records).
pub fn parse_merge_record_header(line: &str) -> Result<(usize, String, i64), ClusterError> {
    let mut parts = line.splitn(3, ' ');
    let len: usize = parts
        .next()
        .ok_or_else(|| ClusterError::Archive("missing record length".into()))?
        .parse()?;
    let filename = parts
        .next()
        .ok_or_else(|| ClusterError::Archive("missing record filename".into()))?
        .to_string();
    let mtime: i64 = parts
        .next()
        .ok_or_else(|| ClusterError::Archive("missing record mtime".into()))?
        .trim()
        .parse()
        .map_err(|_| ClusterError::Archive("invalid record mtime".into()))?;
    Ok((len, filename, mtime))
}

pub fn encode_merge_record_header(len: usize, filename: &str, mtime: i64) -> Bytes {
    Bytes::from(format!("{len} {filename} {mtime}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn round_trips_a_frame() {
        let mut codec = ClusterFrameCodec;
        let mut buf = BytesMut::new();
        let frame = Frame::new(7, Bytes::from_static(b"echo-c hello"));
        codec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_frame_waits_for_more_bytes() {
        let mut codec = ClusterFrameCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(b"abc");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn merge_record_header_round_trips() {
        let header = encode_merge_record_header(128, "001", 1_700_000_000);
        let line = std::str::from_utf8(&header).unwrap().trim_end_matches('\n');
        let (len, filename, mtime) = parse_merge_record_header(line).unwrap();
        assert_eq!(len, 128);
        assert_eq!(filename, "001");
        assert_eq!(mtime, 1_700_000_000);
    }
}
