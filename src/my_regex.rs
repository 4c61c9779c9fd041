use std::sync::OnceLock;

use regex::Regex;

// One macro per fragment so the final patterns stay readable

/// An optional index from an enumerated list
macro_rules! opt_idx {
    () => {
        r#"(?:\d+\. *)?"#
    };
}
/// The chapter caption, greedy
macro_rules! title {
    () => {
        r#"(?P<title>.+)"#
    };
}
/// The chapter caption, lazy so that a trailing separator is not swallowed
macro_rules! lazy_title {
    () => {
        r#"(?P<title>.+?)"#
    };
}
/// The chapter timestamp
macro_rules! tstamp_start {
    () => {
        r#"(?P<time>[0-9]+(?::[0-9]+){1,2})"#
    };
}
/// A separator: at most one non-blank character surrounded by spaces
macro_rules! sep {
    () => {
        r#" *\S? +"#
    };
}
/// An optional second timestamp, indicating the end of the chapter
macro_rules! opt_tstamp_end {
    () => {
        concat!(r#"(?: *[-–~] *[0-9]+(?::[0-9]+)+)?"#)
    };
}
macro_rules! timestamp {
    () => {
        concat!(tstamp_start!(), opt_tstamp_end!())
    };
}
/// Pattern 1: An optional index, the timestamp, a separator, the title
/// Example: "6:66 Music That Will Make You Go Insane !!!"
const PATTERN1: &str = concat!("^", opt_idx!(), timestamp!(), sep!(), title!(), "$");

/// Pattern 2: An optional index, the title, a separator, the timestamp
/// Example: "5. My Very Cool Title - 05:49"
const PATTERN2: &str = concat!("^", opt_idx!(), lazy_title!(), sep!(), timestamp!(), "$");

static DEFAULT_RE_LIST: OnceLock<[Regex; 2]> = OnceLock::new();

/// The patterns used to find timing annotations when none are configured.
///
/// Every pattern has two named groups: `time` and `title`.
pub fn get_default_re_list() -> &'static [Regex] {
    DEFAULT_RE_LIST.get_or_init(|| {
        [PATTERN1, PATTERN2].map(|p| Regex::new(p).expect("default patterns are valid"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_match(line: &str) -> Option<(String, String)> {
        get_default_re_list()
            .iter()
            .find_map(|re| re.captures(line))
            .map(|cap| (cap["time"].to_string(), cap["title"].to_string()))
    }

    #[test]
    fn timestamp_then_title() {
        assert_eq!(
            first_match("6:66 Music That Will Make You Go Insane !!!"),
            Some(("6:66".into(), "Music That Will Make You Go Insane !!!".into()))
        );
        assert_eq!(
            first_match("00:00 - 03:10 Intro"),
            Some(("00:00".into(), "Intro".into()))
        );
    }

    #[test]
    fn title_then_timestamp() {
        assert_eq!(
            first_match("5. My Very Cool Title - 05:49"),
            Some(("05:49".into(), "My Very Cool Title".into()))
        );
    }

    #[test]
    fn plain_text_does_not_match() {
        assert_eq!(first_match("Thanks for watching"), None);
    }
}
