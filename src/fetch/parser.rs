//! Parser for the machine-readable lines yt-dlp prints on stdout
//!
//! The fetcher asks yt-dlp to emit three tagged line kinds through
//! `--progress-template` and `--print`; everything else is ignored.

use std::path::PathBuf;

use crate::task::MediaMetadata;

/// Tag of progress lines: `<tag> <downloaded> <total> <total_estimate>`
pub(super) const PROGRESS_TAG: &str = "[shorts-dl:progress]";
/// Tag of metadata lines: `<tag> <duration>\t<uploader>\t<title>`
pub(super) const META_TAG: &str = "[shorts-dl:meta]";
/// Tag of the final output path line: `<tag> <filepath>`
pub(super) const FILE_TAG: &str = "[shorts-dl:file]";

/// One interpreted stdout line
#[derive(Debug, Clone, PartialEq)]
pub(super) enum OutputLine {
    /// Byte counters of the running download
    Progress {
        /// Bytes downloaded so far
        downloaded: u64,
        /// Exact total or yt-dlp's estimate, whichever is known
        total: Option<u64>,
    },
    /// Media metadata, printed once before the download starts
    Metadata(MediaMetadata),
    /// Final artifact path, printed after post-processing moved it
    Output(PathBuf),
    /// Anything else
    Other,
}

/// Interpret a single stdout line
pub(super) fn parse_line(line: &str) -> OutputLine {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(rest) = line.strip_prefix(PROGRESS_TAG) {
        let mut fields = rest.split_whitespace();
        let downloaded = fields.next().and_then(parse_number);
        let total = fields.next().and_then(parse_number);
        let estimate = fields.next().and_then(parse_number);
        return match downloaded {
            Some(downloaded) => OutputLine::Progress {
                downloaded,
                total: total.or(estimate),
            },
            None => OutputLine::Other,
        };
    }

    if let Some(rest) = line.strip_prefix(META_TAG) {
        let mut fields = rest.trim_start().splitn(3, '\t');
        let duration_secs = fields.next().and_then(parse_number);
        let uploader = fields.next().and_then(parse_text);
        let title = fields.next().and_then(parse_text);
        return OutputLine::Metadata(MediaMetadata {
            title,
            duration_secs,
            uploader,
            estimated_size_bytes: None,
        });
    }

    if let Some(rest) = line.strip_prefix(FILE_TAG) {
        let path = rest.trim();
        if !path.is_empty() && path != "NA" {
            return OutputLine::Output(PathBuf::from(path));
        }
    }

    OutputLine::Other
}

/// Pick the message shown to the user from yt-dlp's stderr
///
/// Prefers the last `ERROR:` line (without the prefix), then the last
/// non-empty line.
pub(super) fn error_message(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    lines
        .iter()
        .rev()
        .find_map(|l| l.strip_prefix("ERROR:"))
        .map(|msg| msg.trim().to_string())
        .or_else(|| lines.last().map(|l| l.to_string()))
}

/// yt-dlp prints "NA" for unknown fields and floats for estimates
fn parse_number(field: &str) -> Option<u64> {
    let value: f64 = field.trim().parse().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value.round() as u64)
    } else {
        None
    }
}

fn parse_text(field: &str) -> Option<String> {
    let field = field.trim();
    if field.is_empty() || field == "NA" {
        None
    } else {
        Some(field.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_progress_with_exact_total() {
        assert_eq!(
            parse_line("[shorts-dl:progress] 1024 4096 NA"),
            OutputLine::Progress {
                downloaded: 1024,
                total: Some(4096)
            }
        );
    }

    #[test]
    fn progress_falls_back_to_estimate() {
        assert_eq!(
            parse_line("[shorts-dl:progress] 512 NA 2048.7"),
            OutputLine::Progress {
                downloaded: 512,
                total: Some(2049)
            }
        );
    }

    #[test]
    fn progress_without_counters_is_ignored() {
        assert_eq!(parse_line("[shorts-dl:progress] NA NA NA"), OutputLine::Other);
    }

    #[test]
    fn parses_metadata_with_tabs_in_title() {
        let line = "[shorts-dl:meta] 59.0\tSome Channel\tFunny\tclip";
        match parse_line(line) {
            OutputLine::Metadata(meta) => {
                assert_eq!(meta.duration_secs, Some(59));
                assert_eq!(meta.uploader.as_deref(), Some("Some Channel"));
                assert_eq!(meta.title.as_deref(), Some("Funny\tclip"));
            }
            other => panic!("expected metadata, got {:?}", other),
        }
    }

    #[test]
    fn metadata_unknown_fields_are_none() {
        match parse_line("[shorts-dl:meta] NA\tNA\tTitle") {
            OutputLine::Metadata(meta) => {
                assert_eq!(meta.duration_secs, None);
                assert_eq!(meta.uploader, None);
                assert_eq!(meta.title.as_deref(), Some("Title"));
            }
            other => panic!("expected metadata, got {:?}", other),
        }
    }

    #[test]
    fn parses_output_path() {
        assert_eq!(
            parse_line("[shorts-dl:file] /dl/task_1/My clip.mp4\r\n"),
            OutputLine::Output(PathBuf::from("/dl/task_1/My clip.mp4"))
        );
        assert_eq!(parse_line("[shorts-dl:file] NA"), OutputLine::Other);
    }

    #[test]
    fn untagged_lines_are_other() {
        assert_eq!(
            parse_line("[youtube] dQw4w9WgXcQ: Downloading webpage"),
            OutputLine::Other
        );
        assert_eq!(parse_line(""), OutputLine::Other);
    }

    #[test]
    fn error_message_prefers_last_error_line() {
        let stderr = "WARNING: something\nERROR: first\nERROR: [youtube] abc: Video unavailable\n";
        assert_eq!(
            error_message(stderr).as_deref(),
            Some("[youtube] abc: Video unavailable")
        );
    }

    #[test]
    fn error_message_falls_back_to_last_line() {
        assert_eq!(
            error_message("Traceback...\nKeyError: 'x'\n\n").as_deref(),
            Some("KeyError: 'x'")
        );
        assert_eq!(error_message("  \n"), None);
    }
}
