//! Streaming parser for structure-data files (SDF)
//!
//! Records are pulled one at a time from any [`BufRead`], so memory use is
//! bounded by the largest single record rather than by the file.
//!
//! A record is a structure block followed by a metadata block of tagged
//! fields and closed by a `$$$$` line:
//!
//! ```text
//! <structure block>
//! > <PUBCHEM_COMPOUND_CID>
//! 2244
//!
//! $$$$
//! ```
//!
//! Two delimiting policies are supported, see [`RecordPolicy`].

use std::collections::VecDeque;
use std::io::BufRead;

use super::models::{RecordPolicy, SdfRecord, RECORD_TERMINATOR, STRUCTURE_END};
use crate::error::{IngestError, Result};

/// Parser options shared by every stream of a dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserOptions {
    pub policy: RecordPolicy,
    /// Full tag line, e.g. `> <DATABASE_ID>`
    tag_line: String,
    /// Literal prefix stripped from the identifier value, e.g. `DB`
    id_prefix: String,
}

impl ParserOptions {
    /// Options for a dataset whose identifier lives in field `field`
    pub fn new(field: &str) -> Self {
        Self {
            policy: RecordPolicy::default(),
            tag_line: format!("> <{}>", field),
            id_prefix: String::new(),
        }
    }

    pub fn with_policy(mut self, policy: RecordPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    pub fn tag_line(&self) -> &str {
        &self.tag_line
    }

    pub fn id_prefix(&self) -> &str {
        &self.id_prefix
    }

    /// Parse an identifier value line
    ///
    /// The prefix is removed first (exact match), then whitespace is trimmed.
    pub fn parse_id(&self, value: &str) -> Option<i32> {
        let stripped = value.strip_prefix(self.id_prefix.as_str()).unwrap_or(value);
        stripped.trim().parse().ok()
    }

    /// Render a record back into SDF text carrying only the identifier field
    pub fn render(&self, id: i32, molfile: &str) -> String {
        let structure = match self.policy {
            RecordPolicy::Scanning => molfile,
            RecordPolicy::Structured => molfile.strip_prefix('\n').unwrap_or(molfile),
        };
        format!(
            "{}{}\n{}{}\n\n{}\n",
            structure, self.tag_line, self.id_prefix, id, RECORD_TERMINATOR
        )
    }

    /// Start parsing `reader`, `source_name` is used in error messages
    pub fn records<R: BufRead>(&self, reader: R, source_name: impl Into<String>) -> SdfRecords<R> {
        SdfRecords {
            lines: LineSource::new(reader),
            options: self.clone(),
            source_name: source_name.into(),
            ordinal: 0,
            finished: false,
        }
    }
}

/// Lazy sequence of records from one stream
///
/// The sequence ends at end of input or after the first error.
pub struct SdfRecords<R> {
    lines: LineSource<R>,
    options: ParserOptions,
    source_name: String,
    ordinal: usize,
    finished: bool,
}

impl<R: BufRead> SdfRecords<R> {
    fn next_record(&mut self) -> Result<Option<SdfRecord>> {
        if !self.skip_to_record()? {
            return Ok(None);
        }

        let line = self.lines.line_number() + 1;
        let (molfile, first_meta) = match self.options.policy {
            RecordPolicy::Scanning => self.scan_structure()?,
            RecordPolicy::Structured => (self.counted_structure()?, None),
        };
        let id = self.read_metadata(first_meta)?;

        self.ordinal += 1;
        Ok(Some(SdfRecord {
            id,
            molfile,
            ordinal: self.ordinal,
            line,
        }))
    }

    /// Returns false when only blank lines remain
    fn skip_to_record(&mut self) -> Result<bool> {
        let mut blanks = Vec::new();
        while let Some(line) = self.lines.next_line()? {
            let blank = line.trim().is_empty();
            blanks.push(line);
            if !blank {
                self.lines.push_back(blanks);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Structure lines up to the first tag or terminator line, which is
    /// returned alongside so metadata scanning can start from it
    fn scan_structure(&mut self) -> Result<(String, Option<String>)> {
        let mut molfile = String::new();
        loop {
            let line = self.expect_line("structure block")?;
            if line.starts_with('>') || line == RECORD_TERMINATOR {
                return Ok((molfile, Some(line)));
            }
            molfile.push_str(&line);
            molfile.push('\n');
        }
    }

    fn counted_structure(&mut self) -> Result<String> {
        let mut molfile = String::from("\n");
        let mut header = Vec::with_capacity(4);
        for _ in 0..4 {
            header.push(self.expect_line("header")?);
        }

        let counts_line = self.lines.line_number();
        let (atoms, bonds) = match header.last() {
            Some(counts) => self.parse_counts(counts, counts_line)?,
            None => return Err(self.malformed("missing counts line")),
        };
        for line in &header {
            push_line(&mut molfile, line);
        }

        for _ in 0..atoms {
            let line = self.expect_line("atom block")?;
            push_line(&mut molfile, &line);
        }
        for _ in 0..bonds {
            let line = self.expect_line("bond block")?;
            push_line(&mut molfile, &line);
        }

        loop {
            let line = self.expect_line("property block")?;
            push_line(&mut molfile, &line);
            if line == STRUCTURE_END {
                return Ok(molfile);
            }
        }
    }

    /// Atom and bond counts, right-justified in character columns 0-3 and 3-6
    fn parse_counts(&self, counts: &str, line: usize) -> Result<(usize, usize)> {
        let chars: Vec<char> = counts.chars().collect();
        if chars.len() < 6 {
            return Err(IngestError::malformed(
                &self.source_name,
                line,
                format!("counts line too short: {:?}", counts),
            ));
        }

        let field = |range: std::ops::Range<usize>| -> Result<usize> {
            let text: String = chars[range].iter().collect();
            text.trim().parse().map_err(|_| {
                IngestError::malformed(
                    &self.source_name,
                    line,
                    format!("invalid count {:?} in counts line", text.trim()),
                )
            })
        };

        Ok((field(0..3)?, field(3..6)?))
    }

    fn read_metadata(&mut self, first: Option<String>) -> Result<Option<i32>> {
        let mut id = None;
        let mut line = match first {
            Some(line) => line,
            None => self.expect_line("metadata block")?,
        };

        while line != RECORD_TERMINATOR {
            if line == self.options.tag_line {
                let value = self.expect_line("identifier value")?;
                match self.options.parse_id(&value) {
                    Some(parsed) => id = Some(parsed),
                    None => {
                        return Err(self.malformed(format!("unparsable identifier {:?}", value)));
                    },
                }
            }
            line = self.expect_line("metadata block")?;
        }

        Ok(id)
    }

    fn expect_line(&mut self, context: &str) -> Result<String> {
        match self.lines.next_line()? {
            Some(line) => Ok(line),
            None => Err(self.malformed(format!("stream ended inside {}", context))),
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> IngestError {
        IngestError::malformed(&self.source_name, self.lines.line_number(), reason)
    }
}

impl<R: BufRead> Iterator for SdfRecords<R> {
    type Item = Result<SdfRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            },
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            },
        }
    }
}

fn push_line(buffer: &mut String, line: &str) {
    buffer.push_str(line);
    buffer.push('\n');
}

/// Line reader with pushback
///
/// Bytes are decoded as ISO-8859-1 so arbitrary input never fails to decode.
struct LineSource<R> {
    reader: R,
    pending: VecDeque<(usize, String)>,
    buffer: Vec<u8>,
    read: usize,
    current: usize,
}

impl<R: BufRead> LineSource<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            pending: VecDeque::new(),
            buffer: Vec::new(),
            read: 0,
            current: 0,
        }
    }

    /// Number of the last line handed out
    fn line_number(&self) -> usize {
        self.current
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        if let Some((number, line)) = self.pending.pop_front() {
            self.current = number;
            return Ok(Some(line));
        }

        self.buffer.clear();
        if self.reader.read_until(b'\n', &mut self.buffer)? == 0 {
            return Ok(None);
        }
        if self.buffer.last() == Some(&b'\n') {
            self.buffer.pop();
        }
        if self.buffer.last() == Some(&b'\r') {
            self.buffer.pop();
        }

        self.read += 1;
        self.current = self.read;
        Ok(Some(self.buffer.iter().map(|&b| char::from(b)).collect()))
    }

    /// Return the most recently read lines, oldest first
    fn push_back(&mut self, lines: Vec<String>) {
        let first = self.current + 1 - lines.len();
        for (offset, line) in lines.into_iter().enumerate().rev() {
            self.pending.push_front((first + offset, line));
        }
        self.current = first - 1;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const ASPIRIN_STRUCTURE: &str = "2244\n  -OEChem-\n\n  3  2  0     0  0  0  0  0  0999 V2000\n    2.0000    0.0000    0.0000 O   0  0\n    3.0000    0.0000    0.0000 C   0  0\n    4.0000    0.0000    0.0000 C   0  0\n  1  2  1  0\n  2  3  2  0\nM  END\n";

    fn pubchem() -> ParserOptions {
        ParserOptions::new("PUBCHEM_COMPOUND_CID")
    }

    fn parse_all(options: &ParserOptions, input: &str) -> Result<Vec<SdfRecord>> {
        options.records(Cursor::new(input.as_bytes()), "test.sdf").collect()
    }

    #[test]
    fn test_scanning_single_record() {
        let input = "\n  -OEChem-\n\n> <PUBCHEM_COMPOUND_CID>\n42\n\n$$$$\n";
        let records = parse_all(&pubchem(), input).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, Some(42));
        assert_eq!(records[0].molfile, "\n  -OEChem-\n\n");
        assert_eq!(records[0].ordinal, 1);
    }

    #[test]
    fn test_prefix_is_stripped_before_trim() {
        let options = ParserOptions::new("DATABASE_ID").with_prefix("DB");
        let input = "x\n> <DATABASE_ID>\nDB00945\n\n$$$$\n";
        let records = parse_all(&options, input).unwrap();

        assert_eq!(records[0].id, Some(945));
    }

    #[test]
    fn test_last_identifier_tag_wins() {
        let input = "x\n> <PUBCHEM_COMPOUND_CID>\n1\n\n> <PUBCHEM_COMPOUND_CID>\n2\n\n$$$$\n";
        let records = parse_all(&pubchem(), input).unwrap();

        assert_eq!(records[0].id, Some(2));
    }

    #[test]
    fn test_tag_line_must_match_exactly() {
        let input = "x\n> <PUBCHEM_COMPOUND_CID_TYPE>\n1\n\n$$$$\n";
        let records = parse_all(&pubchem(), input).unwrap();

        assert_eq!(records[0].id, None);
        assert!(records[0].require_id("test.sdf").is_err());
    }

    #[test]
    fn test_other_fields_are_skipped() {
        let input = "x\n> <PUBCHEM_IUPAC_NAME>\n$$$$ not a terminator\n\n> <PUBCHEM_COMPOUND_CID>\n7\n\n$$$$\n";
        let records = parse_all(&pubchem(), input).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, Some(7));
    }

    #[test]
    fn test_empty_and_blank_streams_yield_nothing() {
        assert!(parse_all(&pubchem(), "").unwrap().is_empty());
        assert!(parse_all(&pubchem(), "\n\n  \n").unwrap().is_empty());
    }

    #[test]
    fn test_trailing_blank_lines_after_last_record() {
        let input = "x\n> <PUBCHEM_COMPOUND_CID>\n1\n\n$$$$\n\n\n";
        let records = parse_all(&pubchem(), input).unwrap();

        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_truncated_record_is_malformed() {
        let input = "x\n> <PUBCHEM_COMPOUND_CID>\n1\n\n$$$$\ny\n> <PUBCHEM_COMPOUND_CID>\n2\n";
        let mut records = pubchem().records(Cursor::new(input.as_bytes()), "test.sdf");

        assert_eq!(records.next().unwrap().unwrap().id, Some(1));
        match records.next().unwrap().unwrap_err() {
            IngestError::MalformedRecord { line, .. } => assert_eq!(line, 8),
            other => panic!("unexpected error: {other}"),
        }
        assert!(records.next().is_none());
    }

    #[test]
    fn test_missing_identifier_value_is_malformed() {
        let input = "x\n> <PUBCHEM_COMPOUND_CID>\n";
        assert!(matches!(
            parse_all(&pubchem(), input).unwrap_err(),
            IngestError::MalformedRecord { .. }
        ));
    }

    #[test]
    fn test_unparsable_identifier_is_malformed() {
        let input = "x\n> <PUBCHEM_COMPOUND_CID>\nabc\n\n$$$$\n";
        assert!(matches!(
            parse_all(&pubchem(), input).unwrap_err(),
            IngestError::MalformedRecord { line: 3, .. }
        ));
    }

    #[test]
    fn test_crlf_line_endings() {
        let input = "x\r\n> <PUBCHEM_COMPOUND_CID>\r\n5\r\n\r\n$$$$\r\n";
        let records = parse_all(&pubchem(), input).unwrap();

        assert_eq!(records[0].id, Some(5));
        assert_eq!(records[0].molfile, "x\n");
    }

    #[test]
    fn test_non_ascii_bytes_decode() {
        let mut input = b"caf\xe9\n".to_vec();
        input.extend_from_slice(b"> <PUBCHEM_COMPOUND_CID>\n9\n\n$$$$\n");
        let records: Vec<_> = pubchem()
            .records(Cursor::new(input), "bytes.sdf")
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(records[0].molfile, "caf\u{e9}\n");
    }

    #[test]
    fn test_structured_record() {
        let options = pubchem().with_policy(RecordPolicy::Structured);
        let input = format!(
            "{}> <PUBCHEM_COMPOUND_CID>\n2244\n\n$$$$\n",
            ASPIRIN_STRUCTURE
        );
        let records = parse_all(&options, &input).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, Some(2244));
        assert_eq!(records[0].molfile, format!("\n{}", ASPIRIN_STRUCTURE));
    }

    #[test]
    fn test_structured_keeps_angle_bracket_lines_in_structure() {
        let options = pubchem().with_policy(RecordPolicy::Structured);
        let input = "> odd title\n\n\n  0  0  0     0  0  0  0  0  0999 V2000\nM  END\n> <PUBCHEM_COMPOUND_CID>\n3\n\n$$$$\n";
        let records = parse_all(&options, input).unwrap();

        assert_eq!(records[0].id, Some(3));
        assert!(records[0].molfile.starts_with("\n> odd title\n"));
    }

    #[test]
    fn test_structured_blank_title_lines() {
        let options = pubchem().with_policy(RecordPolicy::Structured);
        let input = "\n\n\n  0  0  0     0  0  0  0  0  0999 V2000\nM  END\n> <PUBCHEM_COMPOUND_CID>\n11\n\n$$$$\n";
        let records = parse_all(&options, input).unwrap();

        assert_eq!(records[0].id, Some(11));
        assert_eq!(records[0].line, 1);
    }

    #[test]
    fn test_structured_counts_beyond_input_is_malformed() {
        let options = pubchem().with_policy(RecordPolicy::Structured);
        let input = "t\n\n\n 99  0  0     0  0  0  0  0  0999 V2000\nM  END\n";
        assert!(matches!(
            parse_all(&options, input).unwrap_err(),
            IngestError::MalformedRecord { .. }
        ));
    }

    #[test]
    fn test_structured_bad_counts_line() {
        let options = pubchem().with_policy(RecordPolicy::Structured);
        for counts in ["  3", " x  2  0"] {
            let input = format!("t\n\n\n{}\nM  END\n$$$$\n", counts);
            assert!(matches!(
                parse_all(&options, &input).unwrap_err(),
                IngestError::MalformedRecord { line: 4, .. }
            ));
        }
    }

    #[test]
    fn test_render_round_trip_both_policies() {
        for policy in [RecordPolicy::Scanning, RecordPolicy::Structured] {
            let options = ParserOptions::new("DATABASE_ID")
                .with_prefix("DB")
                .with_policy(policy);
            let molfile = match policy {
                RecordPolicy::Scanning => ASPIRIN_STRUCTURE.to_string(),
                RecordPolicy::Structured => format!("\n{}", ASPIRIN_STRUCTURE),
            };
            let text = format!(
                "{}{}",
                options.render(1, &molfile),
                options.render(2, &molfile)
            );
            let records = parse_all(&options, &text).unwrap();

            assert_eq!(records.len(), 2);
            assert_eq!(records[1].id, Some(2));
            assert_eq!(records[1].molfile, molfile);
            assert_eq!(records[1].ordinal, 2);
        }
    }

    #[test]
    fn test_record_start_lines() {
        let input = "\n\na\n> <PUBCHEM_COMPOUND_CID>\n1\n$$$$\nb\n> <PUBCHEM_COMPOUND_CID>\n2\n$$$$\n";
        let records = parse_all(&pubchem(), input).unwrap();

        assert_eq!(records[0].line, 1);
        assert_eq!(records[0].molfile, "\n\na\n");
        assert_eq!(records[1].line, 7);
    }
}
