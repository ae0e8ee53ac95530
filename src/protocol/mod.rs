//! The engine's line protocol.
//!
//! Client to engine: `SCAN <absolute-path>\n` and `VPS\n`.
//!
//! Engine to client, one record per `\r\n`-terminated line:
//!
//! - `SCAN <path>[\t<flag>\t...\t<malware-name>]` - a result for a file or
//!   archive member (`<root-path>|><member-path>`)
//! - `VPS <version>` - virus definitions version
//! - `200 SCAN OK` - end of one scan transaction
//! - `<code> <message>` - an engine fault (4xx/5xx)

mod parser;
mod record;

pub use parser::{classify_line, LineParser, Records, DEFAULT_MAX_LINE_LENGTH};
pub use record::{
    EngineFault, ExclusionReason, Record, ScanLine, ScanLineStatus, ARCHIVE_DELIMITER,
    EXCLUSION_MARKER, SCAN_COMPLETE,
};

/// Command requesting the virus definitions version.
pub const VPS_COMMAND: &str = "VPS\n";
