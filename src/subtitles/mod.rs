//! Caption tracks: SubRip parsing and formatting, overlap repair, and
//! the human-readable transcript.

mod correct;
mod srt;

use std::time::Duration;

pub use correct::{fix_overlaps, format_for_reading};
pub use srt::{format_srt, parse_srt};

/// One timed caption entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleCue {
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub lines: Vec<String>,
}

impl SubtitleCue {
    /// All the lines of the cue joined with a space
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
