use std::{fmt::Display, time::Duration};

use super::{timestamp::format_hms, TimingAnnotation};
use crate::result::{Error, Result};

/// A derived, non-overlapping time range of a media item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub start: Duration,
    pub finish: Duration,
    pub caption: String,
}

impl Chapter {
    pub fn length(&self) -> Duration {
        self.finish.saturating_sub(self.start)
    }
}

impl Display for Chapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {} {}",
            format_hms(self.start),
            format_hms(self.finish),
            self.caption
        )
    }
}

/// Turn the timing annotations of a media item into contiguous chapters
/// covering `[0, total_duration]`.
///
/// Annotations must already be sorted by strictly increasing offset and lie
/// inside the media. Violations are reported, never corrected.
pub fn extract_chapters(
    annotations: &[TimingAnnotation],
    total_duration: Duration,
    title: &str,
) -> Result<Vec<Chapter>> {
    if total_duration.is_zero() {
        return Err(Error::Invariant(
            "cannot compute chapters of a zero-length media".to_string(),
        ));
    }

    if let Some(pair) = annotations
        .windows(2)
        .find(|pair| pair[0].offset >= pair[1].offset)
    {
        return Err(Error::Invariant(format!(
            "annotations out of order: '{}' then '{}'",
            pair[0], pair[1]
        )));
    }

    if let Some(last) = annotations.last() {
        if last.offset >= total_duration {
            return Err(Error::Invariant(format!(
                "annotation '{last}' starts after the end of the media ({})",
                format_hms(total_duration)
            )));
        }
    }

    let mut chapters = Vec::with_capacity(annotations.len() + 1);

    let first_offset = annotations.first().map_or(total_duration, |a| a.offset);
    if !first_offset.is_zero() {
        chapters.push(Chapter {
            start: Duration::ZERO,
            finish: first_offset,
            caption: title.to_string(),
        });
    }

    let finishes = annotations
        .iter()
        .skip(1)
        .map(|next| next.offset)
        .chain([total_duration]);
    for (annotation, finish) in annotations.iter().zip(finishes) {
        chapters.push(Chapter {
            start: annotation.offset,
            finish,
            caption: annotation.caption.clone(),
        });
    }

    Ok(chapters)
}
