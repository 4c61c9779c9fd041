mod bitrate;
mod chapter;
mod extension;
mod metadata;
mod timestamp;

pub use bitrate::Bitrate;
pub use chapter::{extract_chapters, Chapter};
pub use extension::Extension;
pub use metadata::{Format, FormatKind, FormatQuery, FormatRule, MediaDescriptor};
pub use timestamp::{
    format_hms, format_hms_short, format_seconds, TimingAnnotation, TimingAnnotations,
};
