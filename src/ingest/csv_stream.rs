//! Push-style CSV decoder for feeds that never fit in memory at once.
//!
//! Bytes are appended with [`CsvStreamParser::push`]; complete rows become
//! available through [`CsvStreamParser::next_row`] as soon as their
//! terminating newline (outside quotes) has been seen. [`CsvStreamParser::finish`]
//! marks the end of input and releases a trailing row without a newline.
//! A `"` opens a quoted field only at the start of a field, so inch marks in
//! titles like `12" Vinyl` stay literal.

use std::collections::HashMap;
use std::sync::Arc;

/// Column names of the first row, trimmed, with a name → index lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Header {
    fn new(fields: Vec<String>) -> Self {
        let names: Vec<String> = fields
            .into_iter()
            .map(|f| f.trim().trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        let mut index = HashMap::with_capacity(names.len());
        for (i, n) in names.iter().enumerate() {
            index.entry(n.clone()).or_insert(i);
        }
        Self { names, index }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One data row, addressable by column name.
#[derive(Debug, Clone)]
pub struct CsvRecord {
    header: Arc<Header>,
    fields: Vec<String>,
}

impl CsvRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.header
            .position(column)
            .and_then(|i| self.fields.get(i))
            .map(String::as_str)
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn header(&self) -> &Arc<Header> {
        &self.header
    }
}

/// Row counters kept by the parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub rows: u64,
    /// Rows dropped because their field count differs from the header's.
    pub skipped: u64,
}

const INITIAL_FIELD_BYTES: usize = 1024;
const INITIAL_FIELDS: usize = 32;

/// Incremental row reader over `csv_core::Reader`. The core reader keeps the
/// quoting state between pushes, so every byte is scanned once.
pub struct CsvStreamParser {
    reader: csv_core::Reader,
    buf: Vec<u8>,
    /// Start of unconsumed input in `buf`.
    pos: usize,
    /// Field bytes and field end offsets of the record being assembled.
    out: Vec<u8>,
    out_len: usize,
    ends: Vec<usize>,
    ends_len: usize,
    finished: bool,
    done: bool,
    header: Option<Arc<Header>>,
    stats: ParseStats,
}

impl Default for CsvStreamParser {
    fn default() -> Self {
        Self {
            reader: csv_core::Reader::new(),
            buf: Vec::new(),
            pos: 0,
            out: vec![0; INITIAL_FIELD_BYTES],
            out_len: 0,
            ends: vec![0; INITIAL_FIELDS],
            ends_len: 0,
            finished: false,
            done: false,
            header: None,
            stats: ParseStats::default(),
        }
    }
}

impl CsvStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes. Consumed input is compacted away here, once per push.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Signal end of input; a trailing unterminated row becomes available.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn header(&self) -> Option<&Arc<Header>> {
        self.header.as_ref()
    }

    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    /// Next complete data row, or `None` until more input (or `finish`) arrives.
    pub fn next_row(&mut self) -> Option<CsvRecord> {
        loop {
            let fields = self.read_fields()?;
            if fields.len() == 1 && fields[0].trim().is_empty() {
                continue;
            }

            let Some(header) = &self.header else {
                self.header = Some(Arc::new(Header::new(fields)));
                continue;
            };

            if fields.len() != header.len() {
                self.stats.skipped += 1;
                continue;
            }
            self.stats.rows += 1;
            return Some(CsvRecord {
                header: Arc::clone(header),
                fields,
            });
        }
    }

    /// Iterator over rows currently available.
    pub fn records(&mut self) -> Records<'_> {
        Records { parser: self }
    }

    /// Drive the core reader until it completes a record or wants more input.
    /// An empty slice tells it the input ended, so that only happens after
    /// `finish`.
    fn read_fields(&mut self) -> Option<Vec<String>> {
        use csv_core::ReadRecordResult;

        loop {
            if self.done {
                return None;
            }
            let input = &self.buf[self.pos..];
            if input.is_empty() && !self.finished {
                return None;
            }
            let at_eof = input.is_empty();
            let (res, nin, nout, nend) = self.reader.read_record(
                input,
                &mut self.out[self.out_len..],
                &mut self.ends[self.ends_len..],
            );
            self.pos += nin;
            self.out_len += nout;
            self.ends_len += nend;

            match res {
                ReadRecordResult::InputEmpty if at_eof => self.done = true,
                ReadRecordResult::InputEmpty => {}
                ReadRecordResult::OutputFull => {
                    let grown = self.out.len() * 2;
                    self.out.resize(grown, 0);
                }
                ReadRecordResult::OutputEndsFull => {
                    let grown = self.ends.len() * 2;
                    self.ends.resize(grown, 0);
                }
                ReadRecordResult::Record => return Some(self.take_fields()),
                ReadRecordResult::End => self.done = true,
            }
        }
    }

    fn take_fields(&mut self) -> Vec<String> {
        let mut start = 0;
        let fields = self.ends[..self.ends_len]
            .iter()
            .map(|&end| {
                let field = String::from_utf8_lossy(&self.out[start..end]).into_owned();
                start = end;
                field
            })
            .collect();
        self.out_len = 0;
        self.ends_len = 0;
        fields
    }
}

pub struct Records<'a> {
    parser: &'a mut CsvStreamParser,
}

impl Iterator for Records<'_> {
    type Item = CsvRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.next_row()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[u8]) -> Vec<Vec<String>> {
        let mut p = CsvStreamParser::new();
        p.push(data);
        p.finish();
        p.records().map(|r| r.fields().to_vec()).collect()
    }

    #[test]
    fn escaped_quotes_and_commas() {
        let got = rows(b"a,b,c,d,e\nx,\"b, c\",\"say \"\"hi\"\"\",,\n");
        assert_eq!(got, vec![vec!["x", "b, c", r#"say "hi""#, "", ""]]);
    }

    #[test]
    fn inch_mark_inside_an_unquoted_field_is_literal() {
        let got = rows(b"product_name,search_price\nNew Order - Blue Monday 12\" Vinyl,9.99\nBlur - Parklife LP,19.99\n");
        assert_eq!(
            got,
            vec![
                vec!["New Order - Blue Monday 12\" Vinyl", "9.99"],
                vec!["Blur - Parklife LP", "19.99"],
            ]
        );
    }

    #[test]
    fn rows_wait_for_their_newline() {
        let mut p = CsvStreamParser::new();
        p.push(b"name,price\nfoo,1");
        assert!(p.next_row().is_none());
        p.push(b"2\nbar,3\n");
        let r = p.next_row().unwrap();
        assert_eq!(r.get("name"), Some("foo"));
        assert_eq!(r.get("price"), Some("12"));
        assert_eq!(p.next_row().unwrap().get("name"), Some("bar"));
        assert!(p.next_row().is_none());
    }

    #[test]
    fn finish_flushes_trailing_row() {
        let mut p = CsvStreamParser::new();
        p.push(b"a,b\n1,2");
        assert!(p.next_row().is_none());
        p.finish();
        let r = p.next_row().unwrap();
        assert_eq!(r.fields(), &["1".to_string(), "2".to_string()]);
    }
}
