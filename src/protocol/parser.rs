//! Incremental decoder for engine output.
//!
//! Bytes arrive in arbitrary chunks that need not align with line
//! boundaries. `LineParser` buffers partial lines across calls and yields
//! classified records lazily as complete lines become available.

use crate::protocol::record::{
    EngineFault, ExclusionReason, Record, ScanLine, ScanLineStatus, ARCHIVE_DELIMITER,
    EXCLUSION_MARKER, SCAN_COMPLETE,
};

/// Default longest line kept before a partial line is discarded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Stateful line decoder for one connection.
///
/// Create a fresh parser (or call [`LineParser::reset`]) for every new
/// connection; leftover bytes from a previous connection are meaningless.
///
/// # Examples
///
/// ```rust
/// use scanline::protocol::{LineParser, Record};
///
/// let mut parser = LineParser::new();
/// assert_eq!(parser.feed(b"200 SCAN").count(), 0);
///
/// let records: Vec<Record> = parser.feed(b" OK\r\n").collect();
/// assert_eq!(records, vec![Record::ScanComplete]);
/// ```
#[derive(Debug)]
pub struct LineParser {
    buffer: Vec<u8>,
    cursor: usize,
    max_line_length: usize,
    skipping: bool,
    lines_read: u64,
    lines_ignored: u64,
    lines_discarded: u64,
}

impl LineParser {
    /// Creates a parser with the default line length limit.
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Creates a parser that discards lines longer than `max_line_length` bytes.
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: Vec::new(),
            cursor: 0,
            max_line_length,
            skipping: false,
            lines_read: 0,
            lines_ignored: 0,
            lines_discarded: 0,
        }
    }

    /// Appends a chunk of bytes and returns the records completed by it.
    ///
    /// Records are produced lazily; complete lines left unconsumed when the
    /// iterator is dropped are returned by the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Records<'_> {
        self.compact();

        let mut chunk = chunk;
        if self.skipping {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    chunk = &chunk[pos + 1..];
                    self.skipping = false;
                }
                None => chunk = &[],
            }
        }
        self.buffer.extend_from_slice(chunk);

        let tail_start = self
            .buffer
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos + 1);
        if self.buffer.len() - tail_start > self.max_line_length {
            tracing::warn!(
                max_line_length = self.max_line_length,
                "Discarding oversized response line"
            );
            self.buffer.truncate(tail_start);
            self.skipping = true;
            self.lines_discarded += 1;
        }

        Records { parser: self }
    }

    /// Returns the next record from complete buffered lines, if any.
    pub fn next_record(&mut self) -> Option<Record> {
        while let Some(line) = self.next_line() {
            self.lines_read += 1;
            match classify_line(&line) {
                Some(record) => return Some(record),
                None => {
                    self.lines_ignored += 1;
                    tracing::trace!(line = %line, "Ignoring unrecognized line");
                }
            }
        }
        None
    }

    /// Drops all buffered bytes.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.skipping = false;
    }

    /// Number of buffered bytes not yet returned as lines.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    /// Number of complete lines read so far.
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Number of lines that matched no record kind.
    pub fn lines_ignored(&self) -> u64 {
        self.lines_ignored
    }

    /// Number of oversized lines discarded.
    pub fn lines_discarded(&self) -> u64 {
        self.lines_discarded
    }

    fn compact(&mut self) {
        if self.cursor > 0 {
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }
    }

    fn next_line(&mut self) -> Option<String> {
        loop {
            let rel = self.buffer[self.cursor..]
                .iter()
                .position(|&b| b == b'\n')?;
            let end = self.cursor + rel;
            let mut line = &self.buffer[self.cursor..end];
            self.cursor = end + 1;

            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            if line.is_empty() {
                continue;
            }
            return Some(String::from_utf8_lossy(line).into_owned());
        }
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy iterator over the records available in a [`LineParser`].
#[derive(Debug)]
pub struct Records<'a> {
    parser: &'a mut LineParser,
}

impl Iterator for Records<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.next_record()
    }
}

/// Classifies one complete line (without its terminator).
///
/// Rules are applied in priority order: engine error, version info, scan
/// completion, scan result. Anything else yields `None`.
pub fn classify_line(line: &str) -> Option<Record> {
    if let Some(fault) = parse_engine_error(line) {
        return Some(Record::EngineError(fault));
    }

    if let Some(rest) = line.strip_prefix("VPS") {
        return Some(Record::VersionInfo {
            version: rest.trim().to_string(),
        });
    }

    if line.trim() == SCAN_COMPLETE {
        return Some(Record::ScanComplete);
    }

    if line.starts_with("SCAN") {
        return parse_scan_line(line).map(Record::Scan);
    }

    None
}

fn parse_engine_error(line: &str) -> Option<EngineFault> {
    let (code, rest) = line.split_once(|c: char| c.is_ascii_whitespace())?;
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let code: u16 = code.parse().ok()?;
    if !(400..600).contains(&code) {
        return None;
    }

    let mut fields = rest.split('\t');
    let message = fields.next().unwrap_or_default().trim().to_string();
    let path = fields
        .filter_map(|field| field.strip_prefix("SCAN "))
        .map(root_of)
        .find(|root| !root.is_empty())
        .map(str::to_string);

    Some(EngineFault {
        code,
        message,
        path,
        raw: line.to_string(),
    })
}

fn parse_scan_line(line: &str) -> Option<ScanLine> {
    let fields: Vec<&str> = line.split('\t').collect();
    let (command, member_path) = fields[0].split_once(' ')?;
    if command != "SCAN" || member_path.is_empty() {
        return None;
    }
    let root_path = root_of(member_path);

    let status = if fields.len() > 2 {
        if fields[1].starts_with(EXCLUSION_MARKER) {
            let details = fields[1..].join("\t").to_lowercase();
            let reason = if details.contains("password protected") {
                ExclusionReason::PasswordProtected
            } else if details.contains("permission denied") {
                ExclusionReason::PermissionDenied
            } else {
                ExclusionReason::Other
            };
            ScanLineStatus::Excluded(reason)
        } else {
            let last = fields[fields.len() - 1];
            ScanLineStatus::Detection {
                malware_name: last.replace('\\', ""),
            }
        }
    } else {
        ScanLineStatus::Clean
    };

    Some(ScanLine {
        raw: line.to_string(),
        member_path: member_path.to_string(),
        root_path: root_path.to_string(),
        status,
    })
}

fn root_of(member_path: &str) -> &str {
    member_path
        .split(ARCHIVE_DELIMITER)
        .next()
        .unwrap_or(member_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(line: &str) -> ScanLine {
        match classify_line(line) {
            Some(Record::Scan(scan)) => scan,
            other => panic!("expected scan line, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_clean_line() {
        let line = scan("SCAN /tmp/clean.txt");
        assert_eq!(line.member_path, "/tmp/clean.txt");
        assert_eq!(line.root_path, "/tmp/clean.txt");
        assert_eq!(line.status, ScanLineStatus::Clean);
        assert!(!line.is_archive_member());

        let line = scan("SCAN /tmp/clean.txt\t[+]");
        assert_eq!(line.status, ScanLineStatus::Clean);
    }

    #[test]
    fn test_classify_archive_detection() {
        let line = scan("SCAN /tmp/a.zip|>evil.exe\tFOUND\tWin32:EvilTrojan");
        assert_eq!(line.member_path, "/tmp/a.zip|>evil.exe");
        assert_eq!(line.root_path, "/tmp/a.zip");
        assert!(line.is_archive_member());
        assert_eq!(
            line.status,
            ScanLineStatus::Detection {
                malware_name: "Win32:EvilTrojan".to_string()
            }
        );
    }

    #[test]
    fn test_detection_name_strips_escapes() {
        let line = scan("SCAN /tmp/e.com\t[L]0.0\tEICAR\\ Test-NOT\\ virus!!!");
        assert_eq!(
            line.status,
            ScanLineStatus::Detection {
                malware_name: "EICAR Test-NOT virus!!!".to_string()
            }
        );
    }

    #[test]
    fn test_classify_exclusions() {
        let line = scan("SCAN /tmp/l.zip\t[E]42144\tError 42144 {Archive is password protected}");
        assert_eq!(
            line.status,
            ScanLineStatus::Excluded(ExclusionReason::PasswordProtected)
        );

        let line = scan("SCAN /root/secret\t[E]13.0\tError 13 {Permission denied}");
        assert_eq!(
            line.status,
            ScanLineStatus::Excluded(ExclusionReason::PermissionDenied)
        );

        let line = scan("SCAN /tmp/big.iso\t[E]42110\tError 42110 {The file is a decompression bomb}");
        assert_eq!(line.status, ScanLineStatus::Excluded(ExclusionReason::Other));
    }

    #[test]
    fn test_scan_line_path_with_spaces() {
        let line = scan("SCAN /tmp/my file.txt");
        assert_eq!(line.root_path, "/tmp/my file.txt");
    }

    #[test]
    fn test_classify_engine_error() {
        match classify_line("451 Engine Error\tSCAN /tmp/x") {
            Some(Record::EngineError(fault)) => {
                assert_eq!(fault.code, 451);
                assert_eq!(fault.message, "Engine Error");
                assert_eq!(fault.path.as_deref(), Some("/tmp/x"));
            }
            other => panic!("expected engine error, got {:?}", other),
        }

        match classify_line("501 Syntax error") {
            Some(Record::EngineError(fault)) => {
                assert_eq!(fault.code, 501);
                assert_eq!(fault.path, None);
            }
            other => panic!("expected engine error, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_status_lines() {
        assert_eq!(classify_line("200 SCAN OK"), Some(Record::ScanComplete));
        assert_eq!(classify_line("  200 SCAN OK  "), Some(Record::ScanComplete));
        assert_eq!(classify_line("210 SCAN DATA"), None);
        assert_eq!(classify_line("220 DAEMON"), None);
        assert_eq!(classify_line("SCANNER READY"), None);
        assert_eq!(classify_line("hello"), None);
    }

    #[test]
    fn test_classify_version_info() {
        assert_eq!(
            classify_line("VPS 24011004 "),
            Some(Record::VersionInfo {
                version: "24011004".to_string()
            })
        );
    }

    #[test]
    fn test_feed_buffers_partial_lines() {
        let mut parser = LineParser::new();

        assert_eq!(parser.feed(b"SCAN /tmp/a.zip|>ev").count(), 0);
        assert!(parser.pending_bytes() > 0);

        let records: Vec<Record> = parser
            .feed(b"il.exe\tFOUND\tWin32:EvilTrojan\r\n200 SCAN OK\r")
            .collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].root_path(), Some("/tmp/a.zip"));

        let records: Vec<Record> = parser.feed(b"\n").collect();
        assert_eq!(records, vec![Record::ScanComplete]);
        assert_eq!(parser.pending_bytes(), 0);
    }

    #[test]
    fn test_feed_byte_at_a_time() {
        let input = b"210 SCAN DATA\r\nSCAN /tmp/clean.txt\r\n200 SCAN OK\r\n";
        let mut parser = LineParser::new();
        let mut records = Vec::new();
        for byte in input.iter() {
            records.extend(parser.feed(std::slice::from_ref(byte)));
        }

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind(), "scan");
        assert_eq!(records[1], Record::ScanComplete);
        assert_eq!(parser.lines_read(), 3);
        assert_eq!(parser.lines_ignored(), 1);
    }

    #[test]
    fn test_unconsumed_records_survive_next_feed() {
        let mut parser = LineParser::new();
        let first = parser.feed(b"SCAN /a\r\nSCAN /b\r\n").next();
        assert_eq!(first.and_then(|r| r.root_path().map(str::to_string)), Some("/a".into()));

        let rest: Vec<Record> = parser.feed(b"SCAN /c\r\n").collect();
        let roots: Vec<&str> = rest.iter().filter_map(|r| r.root_path()).collect();
        assert_eq!(roots, vec!["/b", "/c"]);
    }

    #[test]
    fn test_oversized_line_is_discarded() {
        let mut parser = LineParser::with_max_line_length(16);

        assert_eq!(parser.feed(b"SCAN /tmp/very/long/").count(), 0);
        assert_eq!(parser.lines_discarded(), 1);
        assert_eq!(parser.feed(b"path/that/keeps/going").count(), 0);

        let records: Vec<Record> = parser.feed(b"\r\nSCAN /ok\r\n").collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].root_path(), Some("/ok"));
    }

    #[test]
    fn test_reset_drops_partial_line() {
        let mut parser = LineParser::new();
        assert_eq!(parser.feed(b"SCAN /tmp/stale").count(), 0);
        parser.reset();

        let records: Vec<Record> = parser.feed(b"200 SCAN OK\r\n").collect();
        assert_eq!(records, vec![Record::ScanComplete]);
    }
}
