use crate::types::{Extension, MediaDescriptor};

const ALLOWED_SYMBOLS: &str = "-+=_ ";
const MAX_NAME_LENGTH: usize = 128;
const FALLBACK_NAME: &str = "untitled";

/// Keep only the characters valid in a file name on every platform:
/// letters, digits and a few symbols.
pub fn sanitize(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|&c| c.is_alphanumeric() || ALLOWED_SYMBOLS.contains(c))
        .take(MAX_NAME_LENGTH)
        .collect();

    match kept.trim() {
        "" => FALLBACK_NAME.to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Directory receiving all the artifacts of an item, also the stem of its
/// whole-media and caption files
pub fn item_name(descriptor: &MediaDescriptor) -> String {
    sanitize(&format!("{} - {}", descriptor.author, descriptor.title))
}

/// File name of the chapter at `index` (0-based)
pub fn chapter_file_name(index: usize, caption: &str, ext: Extension) -> String {
    format!("{:03} - {}{}", index + 1, sanitize(caption), ext.with_dot())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_unsafe_characters() {
        assert_eq!(sanitize("AC/DC: Live? <1991>"), "ACDC Live 1991");
        assert_eq!(sanitize("Élodie - Ça va = ok_+"), "Élodie - Ça va = ok_+");
        assert_eq!(sanitize("  ???  "), "untitled");
        assert_eq!(sanitize(&"a".repeat(300)).len(), 128);
    }

    #[test]
    fn chapters_are_numbered_from_one() {
        assert_eq!(
            chapter_file_name(0, "Intro: the plan", Extension::Aac),
            "001 - Intro the plan.aac"
        );
        assert_eq!(chapter_file_name(41, "x", Extension::Mp3), "042 - x.mp3");
    }
}
