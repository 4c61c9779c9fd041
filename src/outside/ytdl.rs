use std::{
    collections::BTreeMap,
    ffi::OsString,
    fmt::Display,
    io::{self, Read},
    process::{Command, Output},
    sync::OnceLock,
    time::Duration,
};

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::command::{assert_success_command, run_command, spawn_stream, Capture};
use crate::{
    result::{Error, Result},
    types::{Format, FormatKind, FormatQuery, MediaDescriptor, TimingAnnotations},
};

pub const YT_DL: &str = "youtube-dl";
pub const YT_DLP: &str = "yt-dlp";

/// What a piece of user input points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    Video(String),
    Playlist(String),
}

impl Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceRef::Video(id) => write!(f, "video {id}"),
            SourceRef::Playlist(id) => write!(f, "playlist {id}"),
        }
    }
}

/// Interface for resolving source items and downloading their streams
pub trait VideoInfoProvider: Send + Sync {
    /// Recognize a video or playlist id, bare or inside a link
    fn parse_id(&self, text: &str) -> Result<SourceRef> {
        parse_source(text)
    }

    /// Get the ids of the videos of a playlist, in playlist order
    fn get_playlist_items(&self, playlist_id: &str) -> Result<Vec<String>>;

    fn get_video_info(&self, video_id: &str) -> Result<MediaDescriptor>;

    /// Select the format to download
    fn get_media_stream_info<'a>(
        &self,
        descriptor: &'a MediaDescriptor,
        query: &FormatQuery,
    ) -> Result<&'a Format> {
        query
            .select(&descriptor.formats)
            .ok_or_else(|| Error::Resolution {
                id: descriptor.id.clone(),
                message: "no format carries audio".to_string(),
            })
    }

    fn get_media_stream(
        &self,
        descriptor: &MediaDescriptor,
        format: &Format,
    ) -> Result<Box<dyn Read + Send>>;

    /// Stream the SubRip caption track, if the item has one
    fn get_subtitles_stream(
        &self,
        descriptor: &MediaDescriptor,
    ) -> Result<Option<Box<dyn Read + Send>>>;
}

fn video_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("video id pattern is valid"))
}

fn playlist_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:PL|OL|UU|FL|RD|LL)[A-Za-z0-9_-]{10,}$").expect("playlist pattern is valid")
    })
}

/// Recognize a video or playlist from a bare id or a link
pub fn parse_source(text: &str) -> Result<SourceRef> {
    let text = text.trim();
    let unknown = || Error::Resolution {
        id: text.to_string(),
        message: "not a video or playlist id".to_string(),
    };

    if playlist_id_re().is_match(text) {
        return Ok(SourceRef::Playlist(text.to_string()));
    }
    if video_id_re().is_match(text) {
        return Ok(SourceRef::Video(text.to_string()));
    }

    let url = Url::parse(text).map_err(|_| unknown())?;
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let is_video = |id: &str| video_id_re().is_match(id);

    if host == "youtu.be" {
        return url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|id| is_video(id))
            .map(|id| SourceRef::Video(id.to_string()))
            .ok_or_else(unknown);
    }
    if host != "youtube.com" && !host.ends_with(".youtube.com") {
        return Err(unknown());
    }

    let query: BTreeMap<_, _> = url.query_pairs().collect();
    if let Some(id) = query.get("v").filter(|id| is_video(id)) {
        return Ok(SourceRef::Video(id.to_string()));
    }
    if let Some(id) = query.get("list") {
        return Ok(SourceRef::Playlist(id.to_string()));
    }

    let mut segments = url.path_segments().into_iter().flatten();
    match (segments.next(), segments.next()) {
        (Some("shorts" | "embed" | "live"), Some(id)) if is_video(id) => {
            Ok(SourceRef::Video(id.to_string()))
        }
        _ => Err(unknown()),
    }
}

/// Split a comma separated list of ids, dropping blanks and duplicates
pub fn split_ids<'a>(inputs: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in inputs.into_iter().flat_map(|s| s.split(',')).map(str::trim) {
        if !id.is_empty() && !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Interface for the [yt-dlp](https://github.com/yt-dlp/yt-dlp) program
#[derive(Debug)]
pub struct Ytdl {
    program: String,
    clip_regex: Vec<Regex>,
    http: reqwest::blocking::Client,
}

impl Ytdl {
    /// Use the given program, or find `yt-dlp` then `youtube-dl` in the PATH
    pub fn new(program: Option<&str>, clip_regex: Vec<Regex>) -> Result<Self> {
        let candidates = match program {
            Some(program) => vec![program],
            None => vec![YT_DLP, YT_DL],
        };

        let program = candidates
            .into_iter()
            .find(|p| assert_success_command(p, |cmd| cmd.arg("--version")).is_ok())
            .ok_or_else(|| Error::BadVersion {
                program: program.unwrap_or(YT_DLP).to_string(),
            })?;
        debug!("Using {program} as video info provider");

        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("clipcast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| Error::Config(format!("Could not build HTTP client: {err}")))?;

        Ok(Self {
            program: program.to_string(),
            clip_regex,
            http,
        })
    }

    /// Run the command and check if it failed with saying the stream is unavailable.
    /// In that case, return [`Error::UnavailableStream`].
    ///
    /// Other failures are reported as a resolution error for `id`.
    fn run_check_availability<F>(&self, id: &str, f: F, capture: Capture) -> Result<Output>
    where
        F: FnOnce(&mut Command) -> &mut Command,
    {
        let res = run_command(&self.program, f, capture | Capture::STDERR)?;

        let stderr = String::from_utf8_lossy(&res.stderr);
        let mut errors = stderr.lines().filter(|line| line.starts_with("ERROR:"));
        if let Some(line) = errors.next() {
            return Err(if is_unavailable(line) {
                Error::UnavailableStream
            } else {
                Error::Resolution {
                    id: id.to_string(),
                    message: line.trim_start_matches("ERROR:").trim().to_string(),
                }
            });
        }
        if !res.status.success() {
            return Err(Error::Resolution {
                id: id.to_string(),
                message: format!("{} exited with {}", self.program, res.status),
            });
        }

        Ok(res)
    }
}

fn is_unavailable(line: &str) -> bool {
    line.to_lowercase().contains("unavailable")
}

fn is_fatal_line(line: &str) -> bool {
    line.starts_with("ERROR:")
}

impl VideoInfoProvider for Ytdl {
    fn get_playlist_items(&self, playlist_id: &str) -> Result<Vec<String>> {
        let url = format!("https://www.youtube.com/playlist?list={playlist_id}");
        let res = self.run_check_availability(
            playlist_id,
            |cmd| {
                cmd.args(["-q", "--no-warnings", "--flat-playlist"])
                    .args(["--print", "id"])
                    .arg("--")
                    .arg(&url)
            },
            Capture::STDOUT,
        )?;

        let output = String::from_utf8_lossy(&res.stdout);
        Ok(output.split_whitespace().map(String::from).collect())
    }

    fn get_video_info(&self, video_id: &str) -> Result<MediaDescriptor> {
        let res = self.run_check_availability(
            video_id,
            |cmd| {
                cmd.args(["-q", "--no-warnings", "--skip-download", "-j"])
                    .arg("--")
                    .arg(video_id)
            },
            Capture::STDOUT,
        )?;

        let info: VideoJson =
            serde_json::from_slice(&res.stdout).map_err(|err| Error::Resolution {
                id: video_id.to_string(),
                message: format!("could not parse the video info: {err}"),
            })?;

        info.into_descriptor(&self.clip_regex)
    }

    fn get_media_stream(
        &self,
        descriptor: &MediaDescriptor,
        format: &Format,
    ) -> Result<Box<dyn Read + Send>> {
        info!("Downloading format {} of {}", format.id, descriptor.id);
        let args: Vec<OsString> = ["-q", "--no-warnings", "--no-part", "-f"]
            .into_iter()
            .map(OsString::from)
            .chain([
                format.id.as_str().into(),
                "-o".into(),
                "-".into(),
                "--".into(),
                descriptor.id.as_str().into(),
            ])
            .collect();

        let stream = spawn_stream(&self.program, &args, None, Some(is_fatal_line))?;
        Ok(Box::new(AvailabilityCheck {
            inner: stream,
            id: descriptor.id.clone(),
        }))
    }

    fn get_subtitles_stream(
        &self,
        descriptor: &MediaDescriptor,
    ) -> Result<Option<Box<dyn Read + Send>>> {
        let Some(url) = descriptor.caption_track.as_deref() else {
            return Ok(None);
        };

        debug!("Fetching caption track of {}", descriptor.id);
        let fetch_failed = |err: reqwest::Error| Error::Resolution {
            id: descriptor.id.clone(),
            message: format!("could not fetch the caption track: {err}"),
        };
        let response = self
            .http
            .get(url)
            .send()
            .and_then(|res| res.error_for_status())
            .map_err(fetch_failed)?;

        Ok(Some(Box::new(response)))
    }
}

/// Reports a fatal `unavailable` line of the downloader as [`Error::UnavailableStream`],
/// and any other fatal line as a resolution failure of the item
struct AvailabilityCheck<R> {
    inner: R,
    id: String,
}

impl<R: Read> Read for AvailabilityCheck<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|err| match Error::from(err) {
            Error::Diagnostic { line, .. } if is_unavailable(&line) => {
                io::Error::other(Error::UnavailableStream)
            }
            Error::Diagnostic { line, .. } => io::Error::other(Error::Resolution {
                id: self.id.clone(),
                message: line,
            }),
            Error::Io(err) => err,
            err => io::Error::other(err),
        })
    }
}

#[derive(Debug, Deserialize)]
struct VideoJson {
    id: String,
    title: String,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    formats: Vec<FormatJson>,
    #[serde(default)]
    subtitles: BTreeMap<String, Vec<TrackJson>>,
    #[serde(default)]
    automatic_captions: BTreeMap<String, Vec<TrackJson>>,
}

#[derive(Debug, Deserialize)]
struct FormatJson {
    format_id: String,
    url: Option<String>,
    ext: Option<String>,
    acodec: Option<String>,
    vcodec: Option<String>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TrackJson {
    ext: String,
    url: String,
}

const PREFERRED_LANGUAGES: [&str; 3] = ["en", "en-US", "en-orig"];

impl VideoJson {
    fn into_descriptor(self, clip_regex: &[Regex]) -> Result<MediaDescriptor> {
        let duration = self
            .duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(Duration::from_secs_f64)
            .ok_or_else(|| Error::Resolution {
                id: self.id.clone(),
                message: "no duration, is it a live stream?".to_string(),
            })?;

        let caption_track = pick_caption_track(&self.subtitles)
            .or_else(|| pick_caption_track(&self.automatic_captions));

        let formats = self
            .formats
            .into_iter()
            .filter_map(|f| f.into_format(duration))
            .collect();

        let description = self.description.unwrap_or_default();
        let annotations = TimingAnnotations::extract(&description, clip_regex);

        Ok(MediaDescriptor {
            id: self.id,
            author: self
                .uploader
                .or(self.channel)
                .unwrap_or_else(|| "Unknown".to_string()),
            title: self.title,
            duration,
            description,
            caption_track,
            annotations,
            formats,
        })
    }
}

impl FormatJson {
    fn into_format(self, duration: Duration) -> Option<Format> {
        let has = |codec: &Option<String>| codec.as_deref().is_some_and(|c| c != "none");
        let has_audio = has(&self.acodec);
        let has_video = has(&self.vcodec);

        let acodec = self.acodec.unwrap_or_default();
        let (kind, codec) = if has_video {
            let vcodec = self.vcodec.unwrap_or_default();
            (FormatKind::Video, format!("{vcodec}, {acodec}"))
        } else {
            (FormatKind::Audio, acodec)
        };

        Some(Format {
            id: self.format_id,
            kind,
            codec,
            container: self.ext.unwrap_or_else(|| "bin".to_string()),
            has_audio,
            approx_size: self.filesize.or(self.filesize_approx),
            approx_duration: Some(duration),
            source_url: self.url?,
        })
    }
}

/// Pick a SubRip track, preferably in English, forcing the SubRip format on
/// the first track when none is offered
fn pick_caption_track(tracks: &BTreeMap<String, Vec<TrackJson>>) -> Option<String> {
    let language = PREFERRED_LANGUAGES
        .iter()
        .find_map(|lang| tracks.get(*lang))
        .or_else(|| tracks.values().next())?;

    if let Some(srt) = language.iter().find(|t| t.ext == "srt") {
        return Some(srt.url.clone());
    }

    let mut url = Url::parse(&language.first()?.url).ok()?;
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "fmt")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair("fmt", "srt");
    Some(url.to_string())
}
