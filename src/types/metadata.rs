use std::{fmt::Display, time::Duration};

use clap::ValueEnum;

use super::{timestamp::format_hms, TimingAnnotations};

/// Everything known about one source item, as reported by the info provider.
///
/// Immutable for the whole pipeline run.
#[derive(Debug, Clone)]
pub struct MediaDescriptor {
    pub id: String,
    pub author: String,
    pub title: String,
    pub duration: Duration,
    pub description: String,
    pub caption_track: Option<String>,
    pub annotations: TimingAnnotations,
    pub formats: Vec<Format>,
}

impl MediaDescriptor {
    pub fn link(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.id)
    }
}

impl Display for MediaDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {} ({})",
            self.author,
            self.title,
            format_hms(self.duration)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Video,
    Audio,
}

/// One downloadable rendition of a source item
#[derive(Debug, Clone)]
pub struct Format {
    /// Identifier understood by the provider when asking for this stream
    pub id: String,
    pub kind: FormatKind,
    /// Codec tag, e.g. `mp4a.40.2` or `avc1.64001F, mp4a.40.2`
    pub codec: String,
    /// File extension of the container, without the dot
    pub container: String,
    pub has_audio: bool,
    pub approx_size: Option<u64>,
    pub approx_duration: Option<Duration>,
    pub source_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FormatRule {
    /// The first format matching the query, in provider order
    First,
    /// The matching format with the biggest approximate size
    #[default]
    Best,
}

/// Selection policy choosing exactly one [`Format`] per run
#[derive(Debug, Clone)]
pub struct FormatQuery {
    pub kind: Option<FormatKind>,
    pub codec_prefix: Option<String>,
    pub rule: FormatRule,
}

impl Default for FormatQuery {
    /// AAC audio, so that chapters can be stream-copied without re-encoding
    fn default() -> Self {
        Self {
            kind: Some(FormatKind::Audio),
            codec_prefix: Some("mp4a".to_string()),
            rule: FormatRule::Best,
        }
    }
}

impl FormatQuery {
    fn matches(&self, format: &Format) -> bool {
        format.has_audio
            && self.kind.map_or(true, |kind| kind == format.kind)
            && self
                .codec_prefix
                .as_deref()
                .map_or(true, |prefix| format.codec.starts_with(prefix))
    }

    /// Select a format following the query.
    ///
    /// Falls back to the first format carrying audio when nothing matches.
    pub fn select<'a>(&self, formats: &'a [Format]) -> Option<&'a Format> {
        let mut candidates = formats.iter().filter(|f| self.matches(f));

        let selected = match self.rule {
            FormatRule::First => candidates.next(),
            FormatRule::Best => candidates.max_by_key(|f| f.approx_size.unwrap_or(0)),
        };

        selected.or_else(|| formats.iter().find(|f| f.has_audio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(id: &str, kind: FormatKind, codec: &str, size: u64) -> Format {
        Format {
            id: id.into(),
            kind,
            codec: codec.into(),
            container: "m4a".into(),
            has_audio: true,
            approx_size: Some(size),
            approx_duration: None,
            source_url: format!("https://example.com/{id}"),
        }
    }

    #[test]
    fn best_rule_picks_the_biggest_match() {
        let formats = [
            format("18", FormatKind::Video, "avc1, mp4a.40.2", 9000),
            format("139", FormatKind::Audio, "mp4a.40.5", 100),
            format("140", FormatKind::Audio, "mp4a.40.2", 300),
            format("251", FormatKind::Audio, "opus", 400),
        ];

        let selected = FormatQuery::default().select(&formats).unwrap();
        assert_eq!(selected.id, "140");

        let query = FormatQuery {
            rule: FormatRule::First,
            ..FormatQuery::default()
        };
        assert_eq!(query.select(&formats).unwrap().id, "139");
    }

    #[test]
    fn falls_back_to_any_audio_format() {
        let mut silent = format("137", FormatKind::Video, "avc1", 9000);
        silent.has_audio = false;
        let formats = [silent, format("18", FormatKind::Video, "avc1, mp4a", 10)];

        assert_eq!(FormatQuery::default().select(&formats).unwrap().id, "18");
        assert!(FormatQuery::default().select(&formats[..1]).is_none());
    }
}
