use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use zkm_types::path::validate_path;
use zkm_types::NodeRecord;

use crate::error::{CodecError, CodecResult};
use crate::format::{RecordLine, StreamHeader, TrailerLine, FORMAT_NAME, FORMAT_VERSION};
use crate::writer::StreamSummary;

/// Lazily decodes a node stream.
///
/// Yields records in stream order. The iterator ends after a valid trailer;
/// a missing trailer, a partial last line, or a count/checksum mismatch
/// surfaces as [`CodecError::MalformedRecord`]. After the first error the
/// iterator is exhausted.
pub struct StreamReader<R: BufRead> {
    input: R,
    header: StreamHeader,
    line: usize,
    records: u64,
    hasher: blake3::Hasher,
    buf: Vec<u8>,
    done: bool,
    trailer: Option<String>,
}

impl StreamReader<BufReader<File>> {
    /// Open a stream file from disk.
    pub fn open(path: &Path) -> CodecResult<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: BufRead> StreamReader<R> {
    /// Read and validate the header line.
    pub fn new(mut input: R) -> CodecResult<Self> {
        let mut buf = Vec::new();
        let n = input.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(CodecError::malformed(1, "empty stream: missing header"));
        }
        if buf.last() != Some(&b'\n') {
            return Err(CodecError::malformed(1, "truncated header"));
        }
        let header: StreamHeader = serde_json::from_slice(&buf)
            .map_err(|e| CodecError::malformed(1, format!("invalid header: {e}")))?;
        if header.format != FORMAT_NAME {
            return Err(CodecError::malformed(
                1,
                format!("unknown stream format {:?}", header.format),
            ));
        }
        if header.version != FORMAT_VERSION {
            return Err(CodecError::malformed(
                1,
                format!("unsupported stream version {}", header.version),
            ));
        }
        Ok(Self {
            input,
            header,
            line: 1,
            records: 0,
            hasher: blake3::Hasher::new(),
            buf,
            done: false,
            trailer: None,
        })
    }

    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    /// Records decoded so far.
    pub fn records_read(&self) -> u64 {
        self.records
    }

    /// Checksum from the trailer, once the stream has been fully read.
    pub fn checksum(&self) -> Option<&str> {
        self.trailer.as_deref()
    }

    fn next_record(&mut self) -> CodecResult<Option<NodeRecord>> {
        self.buf.clear();
        let n = self.input.read_until(b'\n', &mut self.buf)?;
        self.line += 1;
        let line = self.line;
        if n == 0 {
            return Err(CodecError::malformed(line, "stream truncated: missing trailer"));
        }
        if self.buf.last() != Some(&b'\n') {
            return Err(CodecError::malformed(line, "truncated record"));
        }

        let value: serde_json::Value = serde_json::from_slice(&self.buf)
            .map_err(|e| CodecError::malformed(line, format!("invalid JSON: {e}")))?;

        if value.get("end").is_some() {
            let trailer: TrailerLine = serde_json::from_value(value)
                .map_err(|e| CodecError::malformed(line, format!("invalid trailer: {e}")))?;
            self.check_trailer(line, trailer)?;
            return Ok(None);
        }

        let raw: RecordLine = serde_json::from_value(value)
            .map_err(|e| CodecError::malformed(line, format!("invalid record: {e}")))?;
        validate_path(&raw.path).map_err(|e| CodecError::malformed(line, e.to_string()))?;
        let data = hex::decode(&raw.data)
            .map_err(|e| CodecError::malformed(line, format!("invalid data encoding: {e}")))?;

        self.hasher.update(&self.buf);
        self.records += 1;
        Ok(Some(NodeRecord {
            path: raw.path,
            data,
            acl: raw.acl,
            ephemeral: raw.ephemeral,
        }))
    }

    fn check_trailer(&mut self, line: usize, trailer: TrailerLine) -> CodecResult<()> {
        let end = trailer.end;
        if end.records != self.records {
            return Err(CodecError::malformed(
                line,
                format!("trailer counts {} records, stream holds {}", end.records, self.records),
            ));
        }
        let computed = self.hasher.finalize().to_hex().to_string();
        if !computed.eq_ignore_ascii_case(&end.checksum) {
            return Err(CodecError::malformed(line, "stream checksum mismatch"));
        }

        // Nothing but blank space may follow the trailer.
        let mut rest = Vec::new();
        self.input.read_to_end(&mut rest)?;
        if rest.iter().any(|b| !b.is_ascii_whitespace()) {
            return Err(CodecError::malformed(line + 1, "content after trailer"));
        }
        self.trailer = Some(computed);
        Ok(())
    }
}

impl<R: BufRead> Iterator for StreamReader<R> {
    type Item = CodecResult<NodeRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode a stream lazily.
pub fn decode_stream<R: BufRead>(input: R) -> CodecResult<StreamReader<R>> {
    StreamReader::new(input)
}

/// Validate an entire stream without acting on its records.
pub fn verify_stream<R: BufRead>(input: R) -> CodecResult<StreamSummary> {
    let mut reader = StreamReader::new(input)?;
    for record in reader.by_ref() {
        record?;
    }
    let checksum = reader
        .checksum()
        .map(str::to_string)
        .unwrap_or_default();
    Ok(StreamSummary {
        header: reader.header.clone(),
        records: reader.records,
        checksum,
    })
}
