//! Line layouts of the node stream.
//!
//! ```text
//! {"format":"zk-migrator-stream","version":1,"source":..,"root":"/",..}
//! {"path":"/","data":"","acl":[{"perms":31,"scheme":"world","id":"anyone"}],"ephemeral":false}
//! {"path":"/app","data":"68656c6c6f","acl":[..],"ephemeral":false}
//! {"end":{"records":2,"checksum":"<blake3 of the record lines>"}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zkm_types::{Acl, NodeRecord};

use crate::error::{CodecError, CodecResult};

pub const FORMAT_NAME: &str = "zk-migrator-stream";
pub const FORMAT_VERSION: u32 = 1;

/// First line of every stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHeader {
    pub format: String,
    pub version: u32,
    /// Endpoint the tree was exported from.
    pub source: String,
    /// Root path of the export, relative to the source chroot.
    pub root: String,
    pub run_id: Uuid,
    pub exported_at: DateTime<Utc>,
}

impl StreamHeader {
    pub fn new(source: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            format: FORMAT_NAME.into(),
            version: FORMAT_VERSION,
            source: source.into(),
            root: root.into(),
            run_id: Uuid::now_v7(),
            exported_at: Utc::now(),
        }
    }
}

/// Last line of every stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTrailer {
    pub records: u64,
    /// BLAKE3 over every record line, newlines included, hex-encoded.
    pub checksum: String,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct TrailerLine {
    pub end: StreamTrailer,
}

#[derive(Serialize)]
struct RecordLineRef<'a> {
    path: &'a str,
    data: String,
    acl: &'a [Acl],
    ephemeral: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RecordLine {
    pub path: String,
    pub data: String,
    pub acl: Vec<Acl>,
    pub ephemeral: bool,
}

/// Encode one record as a newline-terminated line.
pub fn encode_node(record: &NodeRecord) -> CodecResult<Vec<u8>> {
    let line = RecordLineRef {
        path: &record.path,
        data: hex::encode(&record.data),
        acl: &record.acl,
        ephemeral: record.ephemeral,
    };
    let mut buf =
        serde_json::to_vec(&line).map_err(|e| CodecError::Serialization(e.to_string()))?;
    buf.push(b'\n');
    Ok(buf)
}

pub(crate) fn encode_line<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf =
        serde_json::to_vec(value).map_err(|e| CodecError::Serialization(e.to_string()))?;
    buf.push(b'\n');
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkm_types::{open_acl_unsafe, Id, Perms};

    #[test]
    fn encode_node_is_one_line() {
        let rec = NodeRecord::new("/a", b"line1\nline2".to_vec(), open_acl_unsafe()).unwrap();
        let bytes = encode_node(&rec).unwrap();
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(*bytes.last().unwrap(), b'\n');
    }

    #[test]
    fn encode_node_hex_data() {
        let rec = NodeRecord::new("/a", vec![0x00, 0xff], vec![Acl::new(Perms::READ, Id::anyone())])
            .unwrap();
        let text = String::from_utf8(encode_node(&rec).unwrap()).unwrap();
        assert_eq!(
            text,
            "{\"path\":\"/a\",\"data\":\"00ff\",\"acl\":[{\"perms\":1,\"scheme\":\"world\",\"id\":\"anyone\"}],\"ephemeral\":false}\n"
        );
    }

    #[test]
    fn header_defaults() {
        let h = StreamHeader::new("zk1:2181/app", "/");
        assert_eq!(h.format, FORMAT_NAME);
        assert_eq!(h.version, FORMAT_VERSION);
        assert_eq!(h.root, "/");
    }
}
