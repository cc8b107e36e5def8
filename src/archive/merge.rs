//! Merges many small client-owned files into one stream, and unmerges them back.
//!
//! Record format: `<length> <filename> <mtime>\n<body>`, no separator between records.

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::{ClusterError, ClusterResult};
use crate::protocol::codec::{encode_merge_record_header, parse_merge_record_header};

#[derive(Debug, Clone, PartialEq)]
pub struct MergeRecord {
    pub filename: String,
    pub mtime: i64,
    pub body: Bytes,
}

/// Concatenates records, optionally dropping any older than `now - time_limit_seconds`
/// (`time_limit_seconds == 0` means no filtering).
pub fn merge(records: &[MergeRecord], now: i64, time_limit_seconds: i64) -> Bytes {
    let mut out = BytesMut::new();
    for record in records {
        if time_limit_seconds > 0 && now - record.mtime > time_limit_seconds {
            continue;
        }
        let header = encode_merge_record_header(record.body.len(), &record.filename, record.mtime);
        out.put_slice(&header);
        out.put_slice(&record.body);
    }
    out.freeze()
}

/// Splits a merged stream back into its constituent records.
pub fn unmerge(mut data: &[u8]) -> ClusterResult<Vec<MergeRecord>> {
    let mut records = Vec::new();
    while !data.is_empty() {
        let newline = data
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| ClusterError::Archive("truncated merge record header".into()))?;
        let header_line = std::str::from_utf8(&data[..newline])
            .map_err(|e| ClusterError::Archive(e.to_string()))?;
        let (len, filename, mtime) = parse_merge_record_header(header_line)?;
        let body_start = newline + 1;
        if data.len() < body_start + len {
            return Err(ClusterError::Archive("truncated merge record body".into()));
        }
        let body = Bytes::copy_from_slice(&data[body_start..body_start + len]);
        records.push(MergeRecord {
            filename,
            mtime,
            body,
        });
        data = &data[body_start + len..];
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_then_unmerge_is_the_identity() {
        let records = vec![
            MergeRecord {
                filename: "001".into(),
                mtime: 100,
                body: Bytes::from_static(b"hello"),
            },
            MergeRecord {
                filename: "002".into(),
                mtime: 200,
                body: Bytes::from_static(b"world!"),
            },
        ];
        let merged = merge(&records, 1000, 0);
        let round_tripped = unmerge(&merged).unwrap();
        assert_eq!(round_tripped, records);
    }

    #[test]
    fn time_limit_drops_old_records() {
        let records = vec![
            MergeRecord {
                filename: "001".into(),
                mtime: 0,
                body: Bytes::from_static(b"old"),
            },
            MergeRecord {
                filename: "002".into(),
                mtime: 990,
                body: Bytes::from_static(b"recent"),
            },
        ];
        let merged = merge(&records, 1000, 100);
        let round_tripped = unmerge(&merged).unwrap();
        assert_eq!(round_tripped.len(), 1);
        assert_eq!(round_tripped[0].filename, "002");
    }

    #[test]
    fn truncated_body_is_an_error() {
        let bad = b"100 001 5\nshort";
        assert!(unmerge(bad).is_err());
    }
}
