use tracing::debug;

use super::SubtitleCue;
use crate::types::{format_hms, Chapter};

/// Largest share of a cue that can be handed to the cue before it
const MAX_OVERLAP_FRACTION: f64 = 1.0 - f64::EPSILON;

/// Make every cue end before the next one starts.
///
/// Caption sources sometimes make cues overlap for crawl effects, which many
/// players cannot show. When `previous` overlaps `current`, the leading words
/// of `current` are moved to `previous` in proportion to the overlapping part
/// of `current`'s interval, then `current` is made to start where `previous`
/// ends. Words are never split, dropped, or duplicated.
///
/// A cue left without text, or whose interval becomes empty, is merged into the
/// cue before it and removed; the remaining cues are then renumbered from 1.
pub fn fix_overlaps(cues: &mut Vec<SubtitleCue>) {
    let mut fixed: Vec<SubtitleCue> = Vec::with_capacity(cues.len());
    let mut dropped = 0;

    for mut current in cues.drain(..) {
        let Some(previous) = fixed.last_mut() else {
            fixed.push(current);
            continue;
        };

        if previous.end <= current.start {
            fixed.push(current);
            continue;
        }

        let overlap = previous.end - current.start;
        let span = current.end.saturating_sub(current.start);
        let fraction = if span.is_zero() {
            MAX_OVERLAP_FRACTION
        } else {
            (overlap.as_secs_f64() / span.as_secs_f64()).clamp(0.0, MAX_OVERLAP_FRACTION)
        };

        let current_text = current.text();
        let target = (current_text.chars().count() as f64 * fraction).floor() as usize;

        let mut previous_text = previous.text();
        let mut words = current_text.split_whitespace();
        let mut moved = 0;
        while moved < target {
            let Some(word) = words.next() else { break };
            moved += word.chars().count() + 1;
            push_word(&mut previous_text, word);
        }
        let remaining: Vec<&str> = words.collect();

        current.start = previous.end;

        if remaining.is_empty() || current.start >= current.end {
            for word in remaining {
                push_word(&mut previous_text, word);
            }
            previous.lines = single_line(previous_text);

            debug!("Cue {} absorbed by cue {}", current.index, previous.index);
            dropped += 1;
            continue;
        }

        previous.lines = single_line(previous_text);
        current.lines = single_line(remaining.join(" "));
        fixed.push(current);
    }

    if dropped > 0 {
        for (i, cue) in fixed.iter_mut().enumerate() {
            cue.index = i + 1;
        }
    }

    *cues = fixed;
}

fn push_word(text: &mut String, word: &str) {
    if !text.is_empty() {
        text.push(' ');
    }
    text.push_str(word);
}

fn single_line(text: String) -> Vec<String> {
    if text.is_empty() {
        vec![]
    } else {
        vec![text]
    }
}

/// Render the cues as prose, with a `HH:MM:SS caption` heading inserted
/// before the first cue ending after each chapter start.
pub fn format_for_reading(cues: &[SubtitleCue], chapters: &[Chapter]) -> String {
    let mut out = String::new();
    let mut chapters = chapters.iter().peekable();

    for cue in cues {
        while let Some(chapter) = chapters.next_if(|chapter| cue.end > chapter.start) {
            out.push_str(&format!(
                "\n\n{} {}\n\n",
                format_hms(chapter.start),
                chapter.caption
            ));
        }

        let text = cue.text();
        if !text.is_empty() {
            out.push_str(&text);
            out.push(' ');
        }
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn cue(index: usize, start: u64, end: u64, text: &str) -> SubtitleCue {
        SubtitleCue {
            index,
            start: Duration::from_secs(start),
            end: Duration::from_secs(end),
            lines: vec![text.to_string()],
        }
    }

    fn words(cues: &[SubtitleCue]) -> Vec<String> {
        cues.iter()
            .flat_map(|c| {
                c.text()
                    .split_whitespace()
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn assert_sequential(cues: &[SubtitleCue]) {
        for pair in cues.windows(2) {
            assert!(
                pair[0].end <= pair[1].start,
                "cue {} overlaps cue {}",
                pair[0].index,
                pair[1].index
            );
        }
    }

    #[test]
    fn proportional_words_move_to_previous_cue() {
        let mut cues = vec![cue(1, 10, 20, "hello world"), cue(2, 15, 25, "foo bar baz")];
        fix_overlaps(&mut cues);

        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start, Duration::from_secs(10));
        assert_eq!(cues[0].lines, vec!["hello world foo bar"]);
        assert_eq!(cues[1].start, Duration::from_secs(20));
        assert_eq!(cues[1].end, Duration::from_secs(25));
        assert_eq!(cues[1].lines, vec!["baz"]);
    }

    #[test]
    fn sequential_cues_are_untouched() {
        let original = vec![
            cue(1, 0, 2, "a"),
            SubtitleCue {
                lines: vec!["two".into(), "lines".into()],
                ..cue(2, 2, 4, "")
            },
        ];
        let mut cues = original.clone();
        fix_overlaps(&mut cues);
        assert_eq!(cues, original);
    }

    #[test]
    fn crawling_captions_become_sequential_without_losing_words() {
        let original = vec![
            cue(1, 0, 4, "the quick brown"),
            cue(2, 2, 6, "fox jumps over the"),
            cue(3, 3, 8, "lazy dog while"),
            cue(4, 7, 10, "everyone watches quietly"),
            cue(5, 9, 9, "now"),
        ];
        let mut cues = original.clone();
        fix_overlaps(&mut cues);

        assert_sequential(&cues);
        assert_eq!(words(&cues), words(&original));
        for c in &cues {
            assert!(c.start < c.end || c.lines.is_empty(), "degenerate cue {c:?}");
        }
    }

    #[test]
    fn fully_covered_cue_is_merged_and_dropped() {
        let mut cues = vec![
            cue(1, 0, 10, "long cue"),
            cue(2, 2, 5, "hidden words"),
            cue(3, 12, 14, "after"),
        ];
        fix_overlaps(&mut cues);

        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].lines, vec!["long cue hidden words"]);
        assert_eq!(cues[1].index, 2);
        assert_eq!(cues[1].lines, vec!["after"]);
    }

    #[test]
    fn transcript_has_chapter_headings() {
        let cues = vec![
            cue(1, 0, 5, "welcome"),
            cue(2, 5, 12, "first topic"),
            cue(3, 12, 20, "second topic"),
        ];
        let chapters = vec![
            Chapter {
                start: Duration::ZERO,
                finish: Duration::from_secs(10),
                caption: "Intro".into(),
            },
            Chapter {
                start: Duration::from_secs(10),
                finish: Duration::from_secs(20),
                caption: "Main".into(),
            },
        ];

        assert_eq!(
            format_for_reading(&cues, &chapters),
            "00:00:00 Intro\n\nwelcome \n\n00:00:10 Main\n\nfirst topic second topic"
        );
    }
}
