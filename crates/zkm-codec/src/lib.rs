//! Node stream format for zk-migrator.
//!
//! A stream is a UTF-8 text file with one JSON value per line: a header,
//! one line per node in parent-before-child order, and a trailer carrying
//! the record count and a BLAKE3 checksum of the record lines. Payloads
//! are hex-encoded so any byte sequence survives; ACL schemes and ids are
//! JSON strings.
//!
//! - [`StreamWriter`] writes a stream and refuses out-of-order records
//! - [`StreamReader`] decodes lazily; restart by re-reading from the start
//! - [`verify_stream`] validates a whole stream with no side effects

pub mod error;
pub mod format;
pub mod reader;
pub mod writer;

pub use error::{CodecError, CodecResult};
pub use format::{encode_node, StreamHeader, StreamTrailer, FORMAT_NAME, FORMAT_VERSION};
pub use reader::{decode_stream, verify_stream, StreamReader};
pub use writer::{StreamSummary, StreamWriter};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use zkm_types::{Acl, Id, NodeRecord, Perms};

    fn write_all(records: &[NodeRecord]) -> Vec<u8> {
        let mut w = StreamWriter::new(Vec::new(), StreamHeader::new("src:2181", "/")).unwrap();
        for r in records {
            w.write_record(r).unwrap();
        }
        w.finish().unwrap().0
    }

    proptest! {
        #[test]
        fn arbitrary_payloads_and_acl_strings_survive(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            scheme in "\\PC{0,12}",
            id in "\\PC{0,40}",
            bits in 0u32..32,
        ) {
            let acl = vec![Acl::new(Perms::from_bits(bits).unwrap(), Id::new(scheme, id))];
            let records = vec![
                NodeRecord::new("/", Vec::new(), acl.clone()).unwrap(),
                NodeRecord::new("/node", data, acl).unwrap(),
            ];
            let bytes = write_all(&records);
            let decoded: Vec<NodeRecord> =
                decode_stream(bytes.as_slice()).unwrap().collect::<CodecResult<_>>().unwrap();
            prop_assert_eq!(decoded, records);
        }
    }

    #[test]
    fn control_characters_in_acl_id_stay_on_one_line() {
        let acl = vec![Acl::new(Perms::ALL, Id::new("x509", "CN=a\nOU=b\r\t\"q\""))];
        let records = vec![NodeRecord::new("/", b"\n\n".to_vec(), acl).unwrap()];
        let bytes = write_all(&records);
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 3);
        let summary = verify_stream(bytes.as_slice()).unwrap();
        assert_eq!(summary.records, 1);
    }
}
