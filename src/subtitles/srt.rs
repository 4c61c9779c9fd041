use std::{fmt::Write, sync::OnceLock, time::Duration};

use regex::Regex;

use super::SubtitleCue;
use crate::result::{Error, Result};

static TIMING_RE: OnceLock<Regex> = OnceLock::new();

fn timing_re() -> &'static Regex {
    TIMING_RE.get_or_init(|| {
        Regex::new(r"^(\d{2,}):(\d{2}):(\d{2})[,.](\d{3}) +--> +(\d{2,}):(\d{2}):(\d{2})[,.](\d{3})")
            .expect("timing pattern is valid")
    })
}

fn malformed(line: usize, message: impl Into<String>) -> Error {
    Error::Subtitles {
        line,
        message: message.into(),
    }
}

/// Parse a SubRip document.
///
/// Blocks are an index line, a `HH:MM:SS,mmm --> HH:MM:SS,mmm` line and zero or
/// more text lines, separated by blank lines.
pub fn parse_srt(text: &str) -> Result<Vec<SubtitleCue>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let lines: Vec<&str> = text.lines().map(str::trim).collect();

    let mut cues = Vec::new();
    let mut i = 0;
    loop {
        while i < lines.len() && lines[i].is_empty() {
            i += 1;
        }
        if i >= lines.len() {
            break;
        }

        let index = lines[i]
            .parse::<usize>()
            .map_err(|_| malformed(i + 1, format!("expected a cue index, got '{}'", lines[i])))?;
        i += 1;

        let timing = lines
            .get(i)
            .ok_or_else(|| malformed(i + 1, "missing timing line"))?;
        let cap = timing_re()
            .captures(timing)
            .ok_or_else(|| malformed(i + 1, format!("bad timing line '{timing}'")))?;
        let time = |first: usize| -> Result<Duration> {
            let field = |n: usize| -> Result<u64> {
                cap[first + n]
                    .parse::<u64>()
                    .map_err(|_| malformed(i + 1, "timing field out of range"))
            };
            let (h, m, s, ms) = (field(0)?, field(1)?, field(2)?, field(3)?);
            h.checked_mul(60)
                .and_then(|t| t.checked_add(m))
                .and_then(|t| t.checked_mul(60))
                .and_then(|t| t.checked_add(s))
                .and_then(|t| t.checked_mul(1000))
                .and_then(|t| t.checked_add(ms))
                .map(Duration::from_millis)
                .ok_or_else(|| malformed(i + 1, "timing field out of range"))
        };
        let (start, end) = (time(1)?, time(5)?);
        i += 1;

        let mut cue_lines = Vec::new();
        while i < lines.len() && !lines[i].is_empty() {
            cue_lines.push(lines[i].to_string());
            i += 1;
        }

        cues.push(SubtitleCue {
            index,
            start,
            end,
            lines: cue_lines,
        });
    }

    Ok(cues)
}

fn format_time(out: &mut String, d: Duration) {
    let ms = d.as_millis();
    let _ = write!(
        out,
        "{:02}:{:02}:{:02},{:03}",
        ms / 3_600_000,
        (ms / 60_000) % 60,
        (ms / 1000) % 60,
        ms % 1000
    );
}

/// Format cues back as a SubRip document
pub fn format_srt(cues: &[SubtitleCue]) -> String {
    let mut out = String::new();
    for cue in cues {
        let _ = writeln!(out, "{}", cue.index);
        format_time(&mut out, cue.start);
        out.push_str(" --> ");
        format_time(&mut out, cue.end);
        out.push('\n');
        for line in &cue.lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}
