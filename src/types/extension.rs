use std::path::Path;

use clap::ValueEnum;

/// Container of the produced audio artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Extension {
    /// Raw AAC (ADTS), stream-copied from the source
    Aac,
    /// MP3, re-encoded
    Mp3,
    /// MPEG-4 audio, with embedded chapters in full mode
    M4a,
    /// MPEG-4 audiobook, with embedded chapters in full mode
    M4b,
}

impl Extension {
    /// Return the extension with the leading dot.
    /// e.g. ".ext"
    pub fn with_dot(self) -> &'static str {
        match self {
            Extension::Aac => ".aac",
            Extension::Mp3 => ".mp3",
            Extension::M4a => ".m4a",
            Extension::M4b => ".m4b",
        }
    }

    /// Return the extension without the leading dot.
    /// e.g. "ext"
    pub fn with_no_dot(self) -> &'static str {
        &self.with_dot()[1..]
    }

    /// Whether the container can hold a whole item with its chapter marks
    pub fn holds_chapters(self) -> bool {
        matches!(self, Extension::M4a | Extension::M4b)
    }

    /// Parse the path file extension.
    /// Return None in case of no or invalid extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "aac" => Some(Self::Aac),
                "mp3" => Some(Self::Mp3),
                "m4a" => Some(Self::M4a),
                "m4b" => Some(Self::M4b),
                _ => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_round_trips_through_paths() {
        for ext in [Extension::Aac, Extension::Mp3, Extension::M4a, Extension::M4b] {
            let path = format!("001 - Intro{}", ext.with_dot());
            assert_eq!(Extension::from_path(path), Some(ext));
        }
        assert_eq!(Extension::from_path("notes.txt"), None);
    }
}
