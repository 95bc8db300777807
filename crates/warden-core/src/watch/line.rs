//! Log line interpretation.

use time::PrimitiveDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

const STAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const STAMP_LEN: usize = "YYYY-MM-DD HH:MM:SS".len();

/// The node's control API is listening.
pub const API_STARTED: &str = "Starting API on port";
/// The node could not open its repository.
pub const REPOSITORY_FAILURE: &str = "Unable to start repository";
/// A bootstrap archive is downloading.
pub const BOOTSTRAP_DOWNLOADING: &str = "Downloading full node bootstrap";
/// A bootstrap archive is being unpacked.
pub const BOOTSTRAP_EXTRACTING: &str = "Extracting bootstrap";
/// The node restarts itself after importing a bootstrap.
pub const NODE_RESTARTING: &str = "Restarting node";

/// Lines proving a bootstrap is under way.
pub const BOOTSTRAP_BEGUN: &[&str] = &["Bootstrapping", BOOTSTRAP_DOWNLOADING, BOOTSTRAP_EXTRACTING];

/// Lines proving a bootstrap failed.
pub const BOOTSTRAP_FAILED: &[&str] = &[
    "Unable to bootstrap",
    "Bootstrap failed",
    "Unable to download bootstrap",
    REPOSITORY_FAILURE,
];

/// Parses the leading `YYYY-MM-DD HH:MM:SS` stamp of a log line.
#[must_use]
pub fn line_timestamp(line: &str) -> Option<PrimitiveDateTime> {
    let stamp = line.get(..STAMP_LEN)?;
    PrimitiveDateTime::parse(stamp, STAMP_FORMAT).ok()
}

/// Whether a line was written strictly after `started_at`.
///
/// Unstamped lines never qualify.
#[must_use]
pub fn is_fresh(line: &str, started_at: PrimitiveDateTime) -> bool {
    line_timestamp(line).is_some_and(|stamp| stamp > started_at)
}

/// First marker from `markers` contained in `line`.
#[must_use]
pub fn find_marker(line: &str, markers: &[&'static str]) -> Option<&'static str> {
    markers.iter().copied().find(|marker| line.contains(marker))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use time::macros::datetime;

    use super::*;

    #[rstest]
    #[case::stamped("2024-05-01 12:00:01 INFO Starting API on port 12391", true)]
    #[case::same_second("2024-05-01 12:00:00 INFO Starting API on port 12391", false)]
    #[case::earlier("2024-04-30 23:59:59 ERROR Unable to start repository", false)]
    #[case::unstamped("Starting API on port 12391", false)]
    #[case::garbled("2024-13-45 99:00:00 INFO", false)]
    fn freshness_is_strictly_after_start(#[case] line: &str, #[case] fresh: bool) {
        assert_eq!(is_fresh(line, datetime!(2024-05-01 12:00:00)), fresh);
    }

    #[test]
    fn failure_markers_are_matched_by_substring() {
        let line = "2024-05-01 12:00:01 ERROR Bootstrap failed: checksum mismatch";
        assert_eq!(find_marker(line, BOOTSTRAP_FAILED), Some("Bootstrap failed"));
        assert_eq!(find_marker(line, BOOTSTRAP_BEGUN), None);
    }

    #[test]
    fn short_lines_have_no_timestamp() {
        assert_eq!(line_timestamp("2024-05-01"), None);
    }
}
