use std::{fmt::Display, ops::Deref, time::Duration};

use regex::Regex;

/// Parse a `[[H:]M:]S` timestamp as found in video descriptions
pub fn parse_timestamp(tstamp: &str) -> Option<Duration> {
    let mut sec = 0u64;
    let mut parts = 0;
    for n in tstamp.split(':') {
        sec = 60 * sec + n.trim().parse::<u64>().ok()?;
        parts += 1;
    }

    (1..=3).contains(&parts).then(|| Duration::from_secs(sec))
}

/// Format a duration as `HH:MM:SS`
pub fn format_hms(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Format a duration as `H:MM:SS`, without padding the hours
pub fn format_hms_short(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Format a duration in seconds with millisecond precision, as the transcoder expects it
pub fn format_seconds(d: Duration) -> String {
    format!("{}.{:03}", d.as_secs(), d.subsec_millis())
}

/// A free-text timing annotation: an offset in the media and the caption starting there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingAnnotation {
    pub offset: Duration,
    pub caption: String,
}

impl Display for TimingAnnotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:>8} - {}", format_hms(self.offset), self.caption)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimingAnnotations(Vec<TimingAnnotation>);

impl TimingAnnotations {
    pub fn new(data: Vec<TimingAnnotation>) -> Self {
        Self(data)
    }

    pub fn into_inner(self) -> Vec<TimingAnnotation> {
        self.0
    }

    pub fn extract(description: &str, clip_regex: &[Regex]) -> Self {
        // For every line, try every regex until one matches
        let captures = description
            .lines()
            .map(str::trim)
            .flat_map(|line| clip_regex.iter().flat_map(|re| re.captures(line)).next());

        // For every line that matched one regex, construct the annotation
        let annotations = captures
            .flat_map(|cap| {
                let offset = parse_timestamp(cap.name("time")?.as_str())?;
                let caption = clean_caption(cap.name("title")?.as_str());

                Some(TimingAnnotation { offset, caption })
            })
            .collect();

        Self(annotations)
    }
}

/// Strip the separators commonly left before a caption and capitalize it
fn clean_caption(raw: &str) -> String {
    let caption = raw.trim().trim_start_matches(['-', '–', '—', '|', ':']).trim();

    let mut chars = caption.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl Deref for TimingAnnotations {
    type Target = Vec<TimingAnnotation>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for TimingAnnotations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "[")?;
        for v in self.0.iter() {
            writeln!(f, "\t{v}")?;
        }
        writeln!(f, "]")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::my_regex::get_default_re_list;

    #[test]
    fn parses_timestamps_of_every_length() {
        assert_eq!(parse_timestamp("42"), Some(Duration::from_secs(42)));
        assert_eq!(parse_timestamp("3:05"), Some(Duration::from_secs(185)));
        assert_eq!(parse_timestamp("1:02:03"), Some(Duration::from_secs(3723)));
        assert_eq!(parse_timestamp("1:2:3:4"), None);
        assert_eq!(parse_timestamp("a:10"), None);
    }

    #[test]
    fn formats_durations() {
        let d = Duration::from_millis(3_723_456);
        assert_eq!(format_hms(d), "01:02:03");
        assert_eq!(format_hms_short(d), "1:02:03");
        assert_eq!(format_seconds(d), "3723.456");
    }

    #[test]
    fn extracts_annotations_from_description() {
        let description = "My mix\n\
            0:00 - intro\n\
            1. 03:15 second song\n\
            not a timestamp\n\
            Last one - 1:02:03\n";

        let annotations = TimingAnnotations::extract(description, get_default_re_list());

        assert_eq!(
            annotations.into_inner(),
            vec![
                TimingAnnotation {
                    offset: Duration::ZERO,
                    caption: "Intro".into()
                },
                TimingAnnotation {
                    offset: Duration::from_secs(195),
                    caption: "Second song".into()
                },
                TimingAnnotation {
                    offset: Duration::from_secs(3723),
                    caption: "Last one".into()
                },
            ]
        );
    }
}
