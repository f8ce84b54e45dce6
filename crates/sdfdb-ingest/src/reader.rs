//! Streaming SD file reader
//!
//! An SD file is a sequence of records, each terminated by a `$$$$` line:
//!
//! ```text
//! 2244
//!   -OEChem-03212409512D
//! ...structure block...
//! M  END
//! > <PUBCHEM_COMPOUND_CID>
//! 2244
//!
//! > <PUBCHEM_MOLECULAR_WEIGHT>
//! 180.16
//!
//! $$$$
//! ```
//!
//! The reader yields one [`RawRecord`] at a time and never holds more than
//! the current record in memory. Malformed records are reported as
//! [`ParseError`]s and skipped: the reader resynchronises at the next `$$$$`
//! and carries on. I/O errors end the stream.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, BufRead};
use thiserror::Error;

/// Line that terminates every record
pub const RECORD_SENTINEL: &str = "$$$$";

/// One record as it appears in the file: tag values plus the opaque structure block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    /// Zero-based position of the record in its file, counting skipped records
    pub index: usize,
    /// One-based line on which the record starts
    pub line: usize,
    structure: String,
    tags: HashMap<String, Vec<String>>,
}

impl RawRecord {
    pub fn new(index: usize, line: usize) -> Self {
        Self {
            index,
            line,
            ..Default::default()
        }
    }

    /// Builder used by tests and callers that assemble records by hand
    pub fn with_value(mut self, tag: &str, value: impl Into<String>) -> Self {
        self.push_value(tag, value.into());
        self
    }

    pub fn push_value(&mut self, tag: &str, value: String) {
        match self.tags.get_mut(tag) {
            Some(values) => values.push(value),
            None => {
                self.tags.insert(tag.to_string(), vec![value]);
            },
        }
    }

    /// All values of a tag in encounter order; empty if the tag is missing
    pub fn values(&self, tag: &str) -> &[String] {
        self.tags.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value of the tag that is not blank
    pub fn first_non_empty(&self, tag: &str) -> Option<&str> {
        self.values(tag)
            .iter()
            .map(String::as_str)
            .find(|v| !v.trim().is_empty())
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    /// The connection table and header lines preceding the first data block
    pub fn structure(&self) -> &str {
        &self.structure
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// A line between data blocks that is not a `> <TAG>` header
    MalformedHeader(String),
    /// The `$$$$` sentinel appeared before the data block's blank line
    UnterminatedBlock(String),
    /// The stream ended inside a record
    Truncated,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::MalformedHeader(line) => write!(f, "malformed tag header '{}'", line),
            ParseErrorKind::UnterminatedBlock(tag) => {
                write!(f, "data block <{}> not terminated before {}", tag, RECORD_SENTINEL)
            },
            ParseErrorKind::Truncated => write!(f, "stream ended inside the record"),
        }
    }
}

/// A record that could not be read; the reader has already skipped past it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record {record} at line {line}: {kind}")]
pub struct ParseError {
    pub record: usize,
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("I/O error near line {line}: {source}")]
    Io {
        line: usize,
        #[source]
        source: io::Error,
    },
}

enum State {
    Structure,
    Block(String),
    BetweenBlocks,
}

/// Lazily yields records from a decompressed SD byte stream
pub struct RecordReader<R> {
    input: R,
    buf: Vec<u8>,
    line_no: usize,
    next_index: usize,
    records_read: usize,
    skipped: usize,
    resync: bool,
    finished: bool,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            buf: Vec::with_capacity(256),
            line_no: 0,
            next_index: 0,
            records_read: 0,
            skipped: 0,
            resync: false,
            finished: false,
        }
    }

    /// Records successfully yielded so far
    pub fn records_read(&self) -> usize {
        self.records_read
    }

    /// Records reported as parse errors and skipped
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn next_line(&mut self) -> Result<Option<String>, ReadError> {
        self.buf.clear();
        let n = self
            .input
            .read_until(b'\n', &mut self.buf)
            .map_err(|source| ReadError::Io {
                line: self.line_no + 1,
                source,
            })?;
        if n == 0 {
            return Ok(None);
        }
        self.line_no += 1;

        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }

    fn skip_to_sentinel(&mut self) -> Result<bool, ReadError> {
        while let Some(line) = self.next_line()? {
            if is_sentinel(&line) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn read_record(&mut self) -> Result<Option<RawRecord>, ReadError> {
        if self.resync {
            self.resync = false;
            if !self.skip_to_sentinel()? {
                return Ok(None);
            }
        }

        let mut record = RawRecord::new(self.next_index, self.line_no + 1);
        let mut state = State::Structure;
        let mut has_content = false;

        loop {
            let Some(line) = self.next_line()? else {
                // Trailing whitespace after the last sentinel is not a record
                if !has_content {
                    return Ok(None);
                }
                return Err(self.error(record.line, ParseErrorKind::Truncated));
            };
            has_content |= !line.trim().is_empty();

            state = match state {
                State::Structure if is_sentinel(&line) => return Ok(Some(record)),
                State::Structure if line.starts_with('>') => self.header(&line)?,
                State::Structure => {
                    record.structure.push_str(&line);
                    record.structure.push('\n');
                    State::Structure
                },

                State::Block(tag) if is_sentinel(&line) => {
                    return Err(self.error(self.line_no, ParseErrorKind::UnterminatedBlock(tag)));
                },
                State::Block(tag) if line.trim().is_empty() => {
                    // A header followed directly by a blank line has one empty value
                    if !record.has_tag(&tag) {
                        record.push_value(&tag, String::new());
                    }
                    State::BetweenBlocks
                },
                State::Block(tag) => {
                    record.push_value(&tag, line);
                    State::Block(tag)
                },

                State::BetweenBlocks if is_sentinel(&line) => return Ok(Some(record)),
                State::BetweenBlocks if line.trim().is_empty() => State::BetweenBlocks,
                State::BetweenBlocks if line.starts_with('>') => self.header(&line)?,
                State::BetweenBlocks => {
                    return Err(self.error(self.line_no, ParseErrorKind::MalformedHeader(line)));
                },
            };
        }
    }

    /// Parse a `> <TAG>` header. Text between `>` and `<` (a field number)
    /// and anything after the closing `>` are ignored.
    fn header(&self, line: &str) -> Result<State, ReadError> {
        parse_header(line)
            .map(|tag| State::Block(tag.to_string()))
            .ok_or_else(|| {
                self.error(self.line_no, ParseErrorKind::MalformedHeader(line.to_string()))
            })
    }

    fn error(&self, line: usize, kind: ParseErrorKind) -> ReadError {
        ReadError::Parse(ParseError {
            record: self.next_index,
            line,
            kind,
        })
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = Result<RawRecord, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_record() {
            Ok(Some(record)) => {
                self.next_index += 1;
                self.records_read += 1;
                Some(Ok(record))
            },
            Ok(None) => {
                self.finished = true;
                None
            },
            Err(ReadError::Parse(e)) => {
                self.next_index += 1;
                self.skipped += 1;
                match e.kind {
                    ParseErrorKind::Truncated => self.finished = true,
                    // The sentinel itself was consumed, the next record starts cleanly
                    ParseErrorKind::UnterminatedBlock(_) => {},
                    ParseErrorKind::MalformedHeader(_) => self.resync = true,
                }
                Some(Err(ReadError::Parse(e)))
            },
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            },
        }
    }
}

fn is_sentinel(line: &str) -> bool {
    line.trim() == RECORD_SENTINEL
}

fn parse_header(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('>')?;
    let open = rest.find('<')?;
    let rest = &rest[open + 1..];
    let close = rest.find('>')?;
    let tag = rest[..close].trim();
    if tag.is_empty() {
        None
    } else {
        Some(tag)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn record(cid: &str, extra: &str) -> String {
        format!(
            "{cid}\n  -OEChem-03212409512D\n\n  1  0  0     0  0  0  0  0  0999 V2000\nM  END\n\
             > <PUBCHEM_COMPOUND_CID>\n{cid}\n\n{extra}$$$$\n"
        )
    }

    fn read_all(text: &str) -> Vec<Result<RawRecord, ReadError>> {
        RecordReader::new(Cursor::new(text.as_bytes().to_vec())).collect()
    }

    #[test]
    fn test_reads_tags_and_structure() {
        let text = record("2244", "> <PUBCHEM_MOLECULAR_WEIGHT> (3)\n180.16\n\n");
        let mut reader = RecordReader::new(Cursor::new(text));
        let rec = reader.next().unwrap().unwrap();

        assert_eq!(rec.index, 0);
        assert_eq!(rec.line, 1);
        assert_eq!(rec.first_non_empty("PUBCHEM_COMPOUND_CID"), Some("2244"));
        assert_eq!(rec.values("PUBCHEM_MOLECULAR_WEIGHT"), ["180.16"]);
        assert!(rec.structure().starts_with("2244\n"));
        assert!(rec.structure().contains("M  END"));
        assert!(reader.next().is_none());
        assert_eq!(reader.records_read(), 1);
    }

    #[test]
    fn test_multi_line_and_repeated_tags_accumulate() {
        let text = record(
            "1",
            "> <SYNONYM>\naspirin\nacetylsalicylic acid\n\n> 12 <SYNONYM>\nASA\n\n",
        );
        let recs = read_all(&text);
        let rec = recs[0].as_ref().unwrap();
        assert_eq!(rec.values("SYNONYM"), ["aspirin", "acetylsalicylic acid", "ASA"]);
    }

    #[test]
    fn test_crlf_and_empty_block() {
        let text = "\r\nM  END\r\n> <EMPTY>\r\n\r\n> <NAME>\r\nwater\r\n\r\n$$$$\r\n";
        let recs = read_all(text);
        let rec = recs[0].as_ref().unwrap();
        assert_eq!(rec.values("EMPTY"), [""]);
        assert_eq!(rec.first_non_empty("EMPTY"), None);
        assert_eq!(rec.first_non_empty("NAME"), Some("water"));
    }

    #[test]
    fn test_trailing_whitespace_is_clean_end() {
        let text = format!("{}\n  \n\n", record("1", ""));
        let recs = read_all(&text);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].is_ok());
    }

    #[test]
    fn test_malformed_header_resyncs() {
        let text = format!(
            "{}{}{}",
            record("1", ""),
            record("2", "not a header\n> <X>\nx\n\n"),
            record("3", "")
        );
        let mut reader = RecordReader::new(Cursor::new(text));
        let results: Vec<_> = reader.by_ref().collect();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().first_non_empty("PUBCHEM_COMPOUND_CID"), Some("1"));
        match &results[1] {
            Err(ReadError::Parse(e)) => {
                assert_eq!(e.record, 1);
                assert_eq!(e.kind, ParseErrorKind::MalformedHeader("not a header".into()));
            },
            other => panic!("expected parse error, got {:?}", other),
        }
        let third = results[2].as_ref().unwrap();
        assert_eq!(third.index, 2);
        assert_eq!(third.first_non_empty("PUBCHEM_COMPOUND_CID"), Some("3"));
        assert_eq!(reader.skipped(), 1);
        assert_eq!(reader.records_read(), 2);
    }

    #[test]
    fn test_block_cut_by_sentinel() {
        let text = "M  END\n> <A>\n1\n$$$$\nM  END\n> <A>\n2\n\n$$$$\n";
        let recs = read_all(text);
        assert_eq!(recs.len(), 2);
        match &recs[0] {
            Err(ReadError::Parse(e)) => {
                assert_eq!(e.kind, ParseErrorKind::UnterminatedBlock("A".into()));
                assert_eq!(e.line, 4);
            },
            other => panic!("expected parse error, got {:?}", other),
        }
        assert_eq!(recs[1].as_ref().unwrap().values("A"), ["2"]);
    }

    #[test]
    fn test_header_without_angle_brackets() {
        let recs = read_all("M  END\n> TAG\nx\n\n$$$$\n");
        assert!(matches!(
            &recs[0],
            Err(ReadError::Parse(ParseError { kind: ParseErrorKind::MalformedHeader(_), .. }))
        ));
    }

    proptest! {
        /// Cutting the stream anywhere inside the last record yields exactly
        /// one parse error and leaves the earlier records untouched
        #[test]
        fn prop_truncated_tail_is_one_error(n in 1usize..5, cut in 1usize..60) {
            let mut text = String::new();
            for i in 0..n {
                text.push_str(&record(&i.to_string(), "> <W>\n1.5\n\n"));
            }
            let last = record("999", "> <W>\n2.5\n\n");
            let cut = cut.min(last.len() - 1);
            text.push_str(&last[..cut]);
            // Only whitespace left means the cut fell before any content
            prop_assume!(!last[..cut].trim().is_empty());

            let recs = read_all(&text);
            prop_assert_eq!(recs.len(), n + 1);
            for (i, r) in recs[..n].iter().enumerate() {
                let rec = r.as_ref().unwrap();
                let cid = i.to_string();
                prop_assert_eq!(rec.first_non_empty("PUBCHEM_COMPOUND_CID"), Some(cid.as_str()));
            }
            let is_parse_error = matches!(recs[n], Err(ReadError::Parse(_)));
            prop_assert!(is_parse_error);
        }
    }
}
