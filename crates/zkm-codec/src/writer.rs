use std::collections::HashSet;
use std::io::Write;

use tracing::debug;
use zkm_types::NodeRecord;

use crate::error::{CodecError, CodecResult};
use crate::format::{encode_line, encode_node, StreamHeader, StreamTrailer, TrailerLine};

/// Counts reported once a stream is complete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSummary {
    pub header: StreamHeader,
    pub records: u64,
    pub checksum: String,
}

/// Writes a node stream, enforcing parent-before-child order.
///
/// The first record may be any path (it is the root of the export). Every
/// later record must name a parent that was already written.
pub struct StreamWriter<W: Write> {
    out: W,
    header: StreamHeader,
    hasher: blake3::Hasher,
    written: HashSet<String>,
    records: u64,
}

impl<W: Write> StreamWriter<W> {
    /// Start a stream by writing its header line.
    pub fn new(mut out: W, header: StreamHeader) -> CodecResult<Self> {
        out.write_all(&encode_line(&header)?)?;
        Ok(Self {
            out,
            header,
            hasher: blake3::Hasher::new(),
            written: HashSet::new(),
            records: 0,
        })
    }

    /// Append one record.
    pub fn write_record(&mut self, record: &NodeRecord) -> CodecResult<()> {
        if self.records > 0 {
            match record.parent() {
                Some(parent) if self.written.contains(parent) => {}
                parent => {
                    return Err(CodecError::OutOfOrder {
                        path: record.path.clone(),
                        parent: parent.unwrap_or("").to_string(),
                    })
                }
            }
        }
        let line = encode_node(record)?;
        self.hasher.update(&line);
        self.out.write_all(&line)?;
        self.written.insert(record.path.clone());
        self.records += 1;
        debug!(path = %record.path, bytes = record.data.len(), "record written");
        Ok(())
    }

    /// Records written so far.
    pub fn len(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Write the trailer and flush. Returns the sink and a summary.
    pub fn finish(mut self) -> CodecResult<(W, StreamSummary)> {
        let checksum = self.hasher.finalize().to_hex().to_string();
        let trailer = TrailerLine {
            end: StreamTrailer {
                records: self.records,
                checksum: checksum.clone(),
            },
        };
        self.out.write_all(&encode_line(&trailer)?)?;
        self.out.flush()?;
        let summary = StreamSummary {
            header: self.header,
            records: self.records,
            checksum,
        };
        Ok((self.out, summary))
    }
}
