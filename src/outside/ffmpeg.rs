use std::{
    ffi::{OsStr, OsString},
    fmt::{Debug, Write},
    io::Read,
    path::Path,
    time::Duration,
};

use tracing::debug;

use super::command::{contains_error, run_command, spawn_stream, Capture, Input};
use crate::{
    result::{Error, Result},
    types::{format_seconds, Bitrate, Chapter, Extension},
};

pub const FFMPEG: &str = "ffmpeg";
const FFXXX_DEFAULT_ARGS: [&str; 3] = ["-hide_banner", "-loglevel", "error"];
const VERSION_MARKER: &str = "ffmpeg version ";

/// Drives an external transcoder through its standard streams
pub trait StreamTransformer: Send + Sync + Debug {
    /// Version reported by the transcoder, used as a readiness check
    fn get_version(&self) -> Result<String>;

    /// Run the transcoder, feeding it `input` if any, and stream its output.
    ///
    /// Any diagnostic line mentioning an error is fatal. The failure is reported
    /// by the returned reader once the output is exhausted.
    fn run(&self, args: &[OsString], input: Option<Input>) -> Result<Box<dyn Read + Send>>;

    /// Run the transcoder writing to a file named in `args`.
    ///
    /// Only the exit code decides the outcome.
    fn run_to_file(&self, args: &[OsString], input: Option<Input>) -> Result<()>;
}

/// Interface for the [ffmpeg](https://ffmpeg.org) program
#[derive(Debug)]
pub struct Ffmpeg {
    program: String,
}

impl Ffmpeg {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new(FFMPEG)
    }
}

impl StreamTransformer for Ffmpeg {
    fn get_version(&self) -> Result<String> {
        let res = run_command(&self.program, |cmd| cmd.arg("-version"), Capture::STDOUT)?;

        parse_version(&String::from_utf8_lossy(&res.stdout)).ok_or_else(|| Error::BadVersion {
            program: self.program.clone(),
        })
    }

    fn run(&self, args: &[OsString], input: Option<Input>) -> Result<Box<dyn Read + Send>> {
        let stream = spawn_stream(&self.program, args, input, Some(contains_error))?;
        Ok(Box::new(stream))
    }

    fn run_to_file(&self, args: &[OsString], input: Option<Input>) -> Result<()> {
        spawn_stream(&self.program, args, input, None)?.finish()
    }
}

/// Find the version in the output of `ffmpeg -version`
fn parse_version(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.trim_start().strip_prefix(VERSION_MARKER))
        .and_then(|rest| rest.split_whitespace().next())
        .map(String::from)
}

/// A sub-range of the source media
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Duration,
    pub finish: Duration,
}

impl TimeWindow {
    /// Seek and duration flags. They must come before `-i` so that ffmpeg
    /// seeks in the input instead of decoding up to the start.
    pub fn to_args(&self) -> [String; 4] {
        [
            "-ss".to_string(),
            format_seconds(self.start),
            "-t".to_string(),
            format_seconds(self.finish.saturating_sub(self.start)),
        ]
    }
}

impl From<&Chapter> for TimeWindow {
    fn from(chapter: &Chapter) -> Self {
        Self {
            start: chapter.start,
            finish: chapter.finish,
        }
    }
}

/// Where the transcoder reads the source media from
#[derive(Debug, Clone, Copy)]
pub enum TranscodeInput<'a> {
    File(&'a Path),
    Stdin,
}

impl TranscodeInput<'_> {
    fn push_args(&self, args: &mut Vec<OsString>) {
        args.push("-i".into());
        match self {
            TranscodeInput::File(path) => args.push(path.as_os_str().to_owned()),
            TranscodeInput::Stdin => args.push("pipe:0".into()),
        }
    }

    fn leading_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = FFXXX_DEFAULT_ARGS.iter().map(OsString::from).collect();
        // Keyboard interaction would steal bytes from a piped input
        if let TranscodeInput::File(_) = self {
            args.push("-nostdin".into());
        }
        args
    }
}

/// Arguments extracting the audio of `input`, or of a window of it, to stdout
pub fn extract_audio_args(
    input: TranscodeInput,
    window: Option<TimeWindow>,
    ext: Extension,
    bitrate: Bitrate,
) -> Vec<OsString> {
    let mut args = input.leading_args();
    if let Some(window) = window {
        args.extend(window.to_args().map(OsString::from));
    }
    input.push_args(&mut args);
    args.extend(["-vn", "-map", "0:a:0"].map(OsString::from));

    match ext {
        Extension::Aac => args.extend(["-c", "copy", "-f", "adts"].map(OsString::from)),
        Extension::Mp3 => {
            args.extend(["-c:a", "libmp3lame", "-b:a"].map(OsString::from));
            args.push(bitrate.to_string().into());
            args.extend(["-f", "mp3"].map(OsString::from));
        }
        // A piped MP4 cannot be rewound to write its index
        Extension::M4a | Extension::M4b => args.extend(
            ["-c", "copy", "-movflags", "frag_keyframe+empty_moov", "-f", "mp4"]
                .map(OsString::from),
        ),
    }

    args.push("pipe:1".into());
    debug!("Audio extraction arguments: {args:?}");
    args
}

/// Arguments copying the audio of `media` into `output`, with the chapters and
/// tags described by the `metadata` sidecar file
pub fn remux_with_chapters_args(
    media: TranscodeInput,
    metadata: &Path,
    output: &Path,
) -> Vec<OsString> {
    let mut args = media.leading_args();
    media.push_args(&mut args);
    args.extend([OsStr::new("-i"), metadata.as_os_str()].map(OsStr::to_owned));
    args.extend(
        ["-map_metadata", "1", "-c", "copy", "-map", "0:a:0", "-f", "mp4", "-y"].map(OsString::from),
    );
    args.push(output.as_os_str().to_owned());
    args
}

/// Escape a value of an FFMETADATA file
fn escape_metadata(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '=' | ';' | '#' | '\\' | '\n') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Build the FFMETADATA sidecar describing the tags and chapters of a media
pub fn ffmetadata(title: &str, artist: &str, chapters: &[Chapter]) -> String {
    let mut out = String::from(";FFMETADATA1\n");
    let _ = writeln!(out, "title={}", escape_metadata(title));
    let _ = writeln!(out, "artist={}", escape_metadata(artist));

    for chapter in chapters {
        let _ = write!(
            out,
            "\n[CHAPTER]\nTIMEBASE=1/1000\nSTART={}\nEND={}\ntitle={}\n",
            chapter.start.as_millis(),
            chapter.finish.as_millis(),
            escape_metadata(&chapter.caption)
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<&str> {
        args.iter().map(|a| a.to_str().unwrap()).collect()
    }

    #[test]
    fn finds_the_version_line() {
        let output = "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023\nbuilt with gcc 13\n";
        assert_eq!(parse_version(output).as_deref(), Some("6.1.1-3ubuntu5"));
        assert_eq!(parse_version("GNU bash, version 5.2\n"), None);
    }

    #[test]
    fn window_seeks_before_the_input() {
        let window = TimeWindow {
            start: Duration::from_millis(30_500),
            finish: Duration::from_secs(90),
        };
        let args = extract_audio_args(
            TranscodeInput::File(Path::new("/tmp/source file.m4a")),
            Some(window),
            Extension::Aac,
            Bitrate::default(),
        );

        assert_eq!(
            strings(&args),
            vec![
                "-hide_banner", "-loglevel", "error", "-nostdin", "-ss", "30.500", "-t", "59.500",
                "-i", "/tmp/source file.m4a", "-vn", "-map", "0:a:0", "-c", "copy", "-f", "adts",
                "pipe:1",
            ]
        );
    }

    #[test]
    fn mp3_is_reencoded_from_stdin() {
        let args = extract_audio_args(
            TranscodeInput::Stdin,
            None,
            Extension::Mp3,
            "192K".parse().unwrap(),
        );
        let args = strings(&args);

        assert!(!args.contains(&"-nostdin"));
        assert!(args.windows(2).any(|w| w == ["-i", "pipe:0"]));
        assert!(args.windows(2).any(|w| w == ["-b:a", "192k"]));
        assert_eq!(args.last(), Some(&"pipe:1"));
    }

    #[test]
    fn remux_maps_the_sidecar_metadata() {
        let args = remux_with_chapters_args(
            TranscodeInput::File(Path::new("in.m4a")),
            Path::new("meta.txt"),
            Path::new("out.m4b"),
        );
        assert_eq!(
            strings(&args)[4..],
            [
                "-i", "in.m4a", "-i", "meta.txt", "-map_metadata", "1", "-c", "copy", "-map",
                "0:a:0", "-f", "mp4", "-y", "out.m4b"
            ]
        );
    }

    #[test]
    fn sidecar_lists_chapters_in_milliseconds() {
        let chapters = [
            Chapter {
                start: Duration::ZERO,
                finish: Duration::from_millis(30_250),
                caption: "Intro".into(),
            },
            Chapter {
                start: Duration::from_millis(30_250),
                finish: Duration::from_secs(60),
                caption: "Q&A; a=b".into(),
            },
        ];

        assert_eq!(
            ffmetadata("Talk", "Someone", &chapters),
            ";FFMETADATA1\ntitle=Talk\nartist=Someone\n\
             \n[CHAPTER]\nTIMEBASE=1/1000\nSTART=0\nEND=30250\ntitle=Intro\n\
             \n[CHAPTER]\nTIMEBASE=1/1000\nSTART=30250\nEND=60000\ntitle=Q&A\\; a\\=b\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn failing_transcoder_reports_its_exit_code() {
        let sh = Ffmpeg::new("sh");
        let args: Vec<OsString> = vec!["-c".into(), "exit 1".into()];

        assert!(matches!(
            sh.run_to_file(&args, None),
            Err(Error::ExitCode { code: 1, .. })
        ));

        let mut out = sh.run(&args, None).unwrap();
        let err = Error::from(out.read_to_end(&mut Vec::new()).unwrap_err());
        assert!(matches!(err, Error::ExitCode { code: 1, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn unversioned_binary_is_rejected() {
        assert!(matches!(
            Ffmpeg::new("sh").get_version(),
            Err(Error::BadVersion { .. })
        ));
    }
}
