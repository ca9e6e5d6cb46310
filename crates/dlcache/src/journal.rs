//! Journal format, parser and writer
//!
//! File format:
//! ```text
//! dlcache.DiskLruCache
//! 1
//! <app version>
//! <value count>
//!
//! DIRTY <key>
//! CLEAN <key> <size_0> ... <size_n-1>
//! REMOVE <key>
//! READ <key>
//! ```
//!
//! The journal is append-only between rebuilds. A rebuild writes
//! `journal.tmp` and renames it over `journal`.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use nom::{
    bytes::complete::{tag, take_till1, take_until},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{all_consuming, map_res},
    multi::separated_list0,
    sequence::{delimited, terminated, tuple},
    IResult,
};
use tracing::{debug, warn};

use crate::entry::validate_key;
use crate::error::{Error, Result};

/// Journal file name inside the cache directory
pub const JOURNAL_FILE: &str = "journal";

/// Scratch file used while rebuilding the journal
pub const JOURNAL_FILE_TMP: &str = "journal.tmp";

/// Magic first line of every journal
pub const MAGIC: &str = "dlcache.DiskLruCache";

/// Journal format version
pub const VERSION_1: &str = "1";

/// Journal header; must match the opening configuration exactly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalHeader {
    /// Application version supplied by the caller
    pub app_version: u32,
    /// Number of value slots per entry
    pub value_count: usize,
}

impl JournalHeader {
    /// Serialize the five header lines
    pub fn to_text(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n\n",
            MAGIC, VERSION_1, self.app_version, self.value_count
        )
    }
}

/// One journal record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// An edit began
    Dirty(String),
    /// An edit was committed with these slot sizes
    Clean(String, Vec<u64>),
    /// The entry was deleted
    Remove(String),
    /// The entry was read
    Read(String),
}

impl Record {
    /// Key the record refers to
    pub fn key(&self) -> &str {
        match self {
            Record::Dirty(key) | Record::Clean(key, _) | Record::Remove(key) | Record::Read(key) => {
                key
            }
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Dirty(key) => write!(f, "DIRTY {}", key),
            Record::Clean(key, sizes) => {
                write!(f, "CLEAN {}", key)?;
                for size in sizes {
                    write!(f, " {}", size)?;
                }
                Ok(())
            }
            Record::Remove(key) => write!(f, "REMOVE {}", key),
            Record::Read(key) => write!(f, "READ {}", key),
        }
    }
}

/// Parse one newline-terminated line
fn line(input: &str) -> IResult<&str, &str> {
    terminated(take_until("\n"), char('\n'))(input)
}

fn token(input: &str) -> IResult<&str, &str> {
    take_till1(|c: char| c.is_whitespace())(input)
}

/// Split a record line on runs of whitespace
fn tokens(input: &str) -> IResult<&str, Vec<&str>> {
    all_consuming(delimited(
        multispace0,
        separated_list0(multispace1, token),
        multispace0,
    ))(input)
}

fn size(input: &str) -> IResult<&str, u64> {
    all_consuming(map_res(digit1, str::parse::<u64>))(input)
}

/// Parse and validate the journal header, returning the remaining input
pub fn parse_header<'a>(input: &'a str, expected: &JournalHeader) -> Result<&'a str> {
    let (rest, (magic, version, app_version, value_count, _)) =
        tuple((line, line, line, line, tag("\n")))(input)
            .map_err(|_| Error::Corrupt("truncated journal header".to_string()))?;

    if magic != MAGIC
        || version != VERSION_1
        || app_version != expected.app_version.to_string()
        || value_count != expected.value_count.to_string()
    {
        return Err(Error::Corrupt(format!(
            "unexpected journal header: [{}, {}, {}, {}]",
            magic, version, app_version, value_count
        )));
    }

    Ok(rest)
}

/// Parse a single record line (without its trailing newline)
pub fn parse_record(input: &str, value_count: usize) -> Result<Record> {
    let (_, parts) = tokens(input)?;

    if parts.len() < 2 {
        return Err(Error::Corrupt(format!("unexpected journal line: {}", input)));
    }

    validate_key(parts[1])
        .map_err(|e| Error::Corrupt(format!("{} in journal line: {}", e, input)))?;

    let key = parts[1].to_string();
    let record = match (parts[0], parts.len()) {
        ("REMOVE", 2) => Record::Remove(key),
        ("DIRTY", 2) => Record::Dirty(key),
        ("READ", 2) => Record::Read(key),
        ("CLEAN", n) if n == 2 + value_count => {
            let sizes = parts[2..]
                .iter()
                .map(|part| size(part).map(|(_, s)| s))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Record::Clean(key, sizes)
        }
        _ => return Err(Error::Corrupt(format!("unexpected journal line: {}", input))),
    };

    Ok(record)
}

/// Result of reading a journal from disk
#[derive(Debug, Default)]
pub struct Replay {
    /// Records in file order
    pub records: Vec<Record>,
    /// Reading stopped before the end of the file
    pub truncated: bool,
}

/// Byte length of the five header lines, or the whole input if shorter
fn header_len(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'\n')
        .nth(4)
        .map_or(bytes.len(), |(i, _)| i + 1)
}

/// Read a journal file
///
/// A bad header is an error. A malformed, non-UTF-8 or unterminated record
/// stops the replay: everything before it is kept and `truncated` is set.
pub fn read_journal(path: &Path, expected: &JournalHeader) -> Result<Replay> {
    let bytes =
        fs::read(path).map_err(|e| Error::Corrupt(format!("unreadable journal: {}", e)))?;

    let (head, body) = bytes.split_at(header_len(&bytes));
    let head = std::str::from_utf8(head)
        .map_err(|_| Error::Corrupt("journal header is not UTF-8".to_string()))?;
    parse_header(head, expected)?;

    let mut replay = Replay::default();
    for raw in body.split_inclusive(|&b| b == b'\n') {
        let Some(record_line) = raw.strip_suffix(b"\n") else {
            warn!(journal = %path.display(), "ignoring unterminated journal tail");
            replay.truncated = true;
            break;
        };

        let parsed = std::str::from_utf8(record_line)
            .map_err(|e| Error::Corrupt(format!("journal line is not UTF-8: {}", e)))
            .and_then(|line| parse_record(line, expected.value_count));

        match parsed {
            Ok(record) => replay.records.push(record),
            Err(e) => {
                warn!(journal = %path.display(), error = %e, "stopping journal replay");
                replay.truncated = true;
                break;
            }
        }
    }

    Ok(replay)
}

/// Append handle on the journal file
#[derive(Debug)]
pub struct JournalWriter {
    writer: BufWriter<File>,
}

impl JournalWriter {
    /// Open an existing journal for appending
    pub fn open_append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Write a fresh journal atomically and open it for appending
    ///
    /// The header and records are written to `journal.tmp`, synced, then
    /// renamed over `journal`.
    pub fn rebuild<'a, I>(dir: &Path, header: &JournalHeader, records: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let journal = dir.join(JOURNAL_FILE);
        let journal_tmp = dir.join(JOURNAL_FILE_TMP);

        let mut count = 0usize;
        {
            let file = File::create(&journal_tmp)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(header.to_text().as_bytes())?;
            for record in records {
                writeln!(writer, "{}", record)?;
                count += 1;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::rename(&journal_tmp, &journal)?;
        debug!(journal = %journal.display(), records = count, "journal rebuilt");

        Self::open_append(&journal)
    }

    /// Buffer one record
    pub fn append(&mut self, record: &Record) -> Result<()> {
        writeln!(self.writer, "{}", record)?;
        Ok(())
    }

    /// Push buffered records to disk and sync them
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn header(value_count: usize) -> JournalHeader {
        JournalHeader {
            app_version: 1,
            value_count,
        }
    }

    #[test]
    fn test_header_text() {
        assert_eq!(header(2).to_text(), "dlcache.DiskLruCache\n1\n1\n2\n\n");
    }

    #[test]
    fn test_parse_header() {
        let text = format!("{}DIRTY foo\n", header(1).to_text());
        let rest = parse_header(&text, &header(1)).unwrap();
        assert_eq!(rest, "DIRTY foo\n");
    }

    #[test]
    fn test_parse_header_mismatch() {
        let text = header(1).to_text();

        assert!(matches!(parse_header(&text, &header(2)), Err(Error::Corrupt(_))));

        let other_app = JournalHeader {
            app_version: 7,
            value_count: 1,
        };
        assert!(matches!(parse_header(&text, &other_app), Err(Error::Corrupt(_))));

        let bad_magic = text.replacen("dlcache", "other", 1);
        assert!(matches!(parse_header(&bad_magic, &header(1)), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_parse_header_missing_blank_line() {
        let text = "dlcache.DiskLruCache\n1\n1\n1\nDIRTY foo\n";
        assert!(matches!(parse_header(text, &header(1)), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_parse_records() {
        assert_eq!(parse_record("DIRTY foo", 2).unwrap(), Record::Dirty("foo".into()));
        assert_eq!(parse_record("READ foo", 2).unwrap(), Record::Read("foo".into()));
        assert_eq!(parse_record("REMOVE foo", 2).unwrap(), Record::Remove("foo".into()));
        assert_eq!(
            parse_record("CLEAN foo 11 7", 2).unwrap(),
            Record::Clean("foo".into(), vec![11, 7])
        );
    }

    #[test]
    fn test_parse_record_tolerates_extra_whitespace() {
        assert_eq!(
            parse_record("  CLEAN\tfoo  3 ", 1).unwrap(),
            Record::Clean("foo".into(), vec![3])
        );
    }

    #[test]
    fn test_parse_record_rejects_bad_shapes() {
        for line in [
            "",
            "DIRTY",
            "DIRTY foo extra",
            "REMOVE foo 1",
            "READ foo 1",
            "CLEAN foo",
            "CLEAN foo 1",
            "CLEAN foo 1 2 3",
            "CLEAN foo 1 x",
            "CLEAN foo 1 -2",
            "WRITE foo",
            "DIRTY ../escape",
            "READ a\\b",
            "CLEAN sub/dir 1 2",
        ] {
            assert!(
                matches!(parse_record(line, 2), Err(Error::Corrupt(_))),
                "{line:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_record_display() {
        assert_eq!(Record::Clean("foo".into(), vec![1, 22]).to_string(), "CLEAN foo 1 22");
        assert_eq!(Record::Dirty("foo".into()).to_string(), "DIRTY foo");
        assert_eq!(Record::Remove("foo".into()).to_string(), "REMOVE foo");
        assert_eq!(Record::Read("foo".into()).to_string(), "READ foo");
    }

    #[test]
    fn test_rebuild_then_read() {
        let dir = TempDir::new().unwrap();
        let records = vec![
            Record::Clean("a".into(), vec![3]),
            Record::Dirty("b".into()),
        ];

        let mut writer = JournalWriter::rebuild(dir.path(), &header(1), &records).unwrap();
        writer.append(&Record::Read("a".into())).unwrap();
        writer.flush().unwrap();

        assert!(!dir.path().join(JOURNAL_FILE_TMP).exists());

        let replay = read_journal(&dir.path().join(JOURNAL_FILE), &header(1)).unwrap();
        assert!(!replay.truncated);
        assert_eq!(
            replay.records,
            vec![
                Record::Clean("a".into(), vec![3]),
                Record::Dirty("b".into()),
                Record::Read("a".into()),
            ]
        );
    }

    #[test]
    fn test_read_stops_at_malformed_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(JOURNAL_FILE);
        let text = format!(
            "{}CLEAN a 1\nBOGUS\nCLEAN b 2\n",
            header(1).to_text()
        );
        fs::write(&path, text).unwrap();

        let replay = read_journal(&path, &header(1)).unwrap();
        assert!(replay.truncated);
        assert_eq!(replay.records, vec![Record::Clean("a".into(), vec![1])]);
    }

    #[test]
    fn test_read_drops_unterminated_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(JOURNAL_FILE);
        let text = format!("{}CLEAN a 1\nCLEAN b 1", header(1).to_text());
        fs::write(&path, text).unwrap();

        let replay = read_journal(&path, &header(1)).unwrap();
        assert!(replay.truncated);
        assert_eq!(replay.records, vec![Record::Clean("a".into(), vec![1])]);
    }

    #[test]
    fn test_read_drops_tail_torn_inside_multibyte_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(JOURNAL_FILE);
        let mut bytes = format!("{}CLEAN a 1\nDIRTY caf", header(1).to_text()).into_bytes();
        bytes.push(0xC3);
        fs::write(&path, bytes).unwrap();

        let replay = read_journal(&path, &header(1)).unwrap();
        assert!(replay.truncated);
        assert_eq!(replay.records, vec![Record::Clean("a".into(), vec![1])]);
    }

    #[test]
    fn test_read_stops_at_invalid_utf8_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(JOURNAL_FILE);
        let mut bytes = format!("{}CLEAN a 1\nREAD ", header(1).to_text()).into_bytes();
        bytes.extend_from_slice(&[0xFF, 0xFE]);
        bytes.extend_from_slice(b"\nCLEAN b 1\n");
        fs::write(&path, bytes).unwrap();

        let replay = read_journal(&path, &header(1)).unwrap();
        assert!(replay.truncated);
        assert_eq!(replay.records, vec![Record::Clean("a".into(), vec![1])]);
    }

    #[test]
    fn test_read_multibyte_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(JOURNAL_FILE);
        fs::write(&path, format!("{}CLEAN café 4\n", header(1).to_text())).unwrap();

        let replay = read_journal(&path, &header(1)).unwrap();
        assert!(!replay.truncated);
        assert_eq!(replay.records, vec![Record::Clean("café".into(), vec![4])]);
    }

    #[test]
    fn test_read_rejects_bad_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(JOURNAL_FILE);
        fs::write(&path, "not a journal\n").unwrap();

        assert!(matches!(read_journal(&path, &header(1)), Err(Error::Corrupt(_))));
    }
}
