//! Processing of one source item, from its id to the delivered artifacts.
//!
//! An item goes through `Resolving → Downloading → Transcoding → Uploading →
//! Cleanup → Done`. A failure in any stage stops the item, and the cleanup
//! of its workspace still happens.

mod manifest;
mod naming;
mod workspace;

use std::{
    collections::BTreeSet,
    ffi::OsString,
    fmt::Display,
    fs::{self, File},
    io::{self, BufReader, BufWriter, Cursor, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::ValueEnum;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use manifest::{chat_caption, Manifest};
pub use naming::{chapter_file_name, item_name, sanitize};
pub use workspace::Workspace;

use crate::{
    outside::{
        extract_audio_args, ffmetadata, remux_with_chapters_args, Input, StreamTransformer,
        TimeWindow, TranscodeInput, VideoInfoProvider,
    },
    progress::{ProgressLog, ProgressReader},
    result::{Error, Result, ResultExt},
    sink::UploadSink,
    subtitles::{fix_overlaps, format_for_reading, format_srt, parse_srt},
    types::{extract_chapters, Bitrate, Chapter, Extension, Format, FormatQuery, MediaDescriptor},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Downloading,
    Transcoding,
    Uploading,
    Cleanup,
    Done,
    Failed,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Resolving => "resolving",
            Stage::Downloading => "downloading",
            Stage::Transcoding => "transcoding",
            Stage::Uploading => "uploading",
            Stage::Cleanup => "cleanup",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How an item is cut into artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SplitMode {
    /// One file for the whole item, with its chapters embedded when the container allows it
    Full,
    /// One file per chapter
    Chapters,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub split: SplitMode,
    pub ext: Extension,
    pub bitrate: Bitrate,
    pub format: FormatQuery,
    /// Deliver the caption track, corrected and as a readable transcript
    pub subtitles: bool,
    /// Deliver the `info.json` manifest and the item description
    pub info: bool,
    /// Keep the downloaded source in memory and feed it through stdin
    pub in_memory: bool,
    pub temp_dir: PathBuf,
    /// Where downloaded sources are kept between runs
    pub media_cache: Option<PathBuf>,
}

/// Progress of an item, kept between runs
pub trait Journal {
    /// Artifacts still to deliver, `None` when the item was never started
    fn remaining(&self) -> Result<Option<BTreeSet<usize>>>;

    /// Record that the item needs `count` artifacts, forgetting previous progress
    fn assign(&self, count: usize) -> Result<()>;

    /// Record that the artifact at `index` was delivered
    fn artifact_done(&self, index: usize) -> Result<()>;
}

/// A [`Journal`] remembering nothing
pub struct NoJournal;

impl Journal for NoJournal {
    fn remaining(&self) -> Result<Option<BTreeSet<usize>>> {
        Ok(None)
    }

    fn assign(&self, _count: usize) -> Result<()> {
        Ok(())
    }

    fn artifact_done(&self, _index: usize) -> Result<()> {
        Ok(())
    }
}

/// What was delivered for an item
#[derive(Debug, Default)]
pub struct Delivered {
    pub title: String,
    /// Destination of every artifact, as shown by the sink
    pub artifacts: Vec<String>,
    pub bytes: u64,
}

#[derive(Debug, Error)]
#[error("Failed while {stage}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub error: Error,
}

/// Where the transcoder finds the downloaded source
enum SourceMedia {
    File(PathBuf),
    Memory(Arc<[u8]>),
}

impl SourceMedia {
    fn input(&self) -> TranscodeInput<'_> {
        match self {
            SourceMedia::File(path) => TranscodeInput::File(path),
            SourceMedia::Memory(_) => TranscodeInput::Stdin,
        }
    }

    /// Bytes to pipe into the transcoder, a fresh reader for every invocation
    fn feed(&self) -> Option<Input> {
        match self {
            SourceMedia::File(_) => None,
            SourceMedia::Memory(data) => Some(Box::new(Cursor::new(data.clone()))),
        }
    }
}

pub struct MediaDistributionPipeline<'a> {
    provider: &'a dyn VideoInfoProvider,
    transcoder: &'a dyn StreamTransformer,
    options: &'a PipelineOptions,
}

impl<'a> MediaDistributionPipeline<'a> {
    pub fn new(
        provider: &'a dyn VideoInfoProvider,
        transcoder: &'a dyn StreamTransformer,
        options: &'a PipelineOptions,
    ) -> Self {
        Self {
            provider,
            transcoder,
            options,
        }
    }

    /// Process the video `id` to completion, delivering its artifacts to `sink`.
    pub fn process(
        &self,
        id: &str,
        sink: &mut dyn UploadSink,
        journal: &dyn Journal,
    ) -> std::result::Result<Delivered, StageFailure> {
        let mut stage = Stage::Resolving;
        let workspace = Workspace::create(&self.options.temp_dir, id)
            .map_err(|error| StageFailure { stage, error })?;

        let outcome = self.run(id, &workspace, sink, journal, &mut stage);

        debug!("{id}: {}", Stage::Cleanup);
        if let Err(err) = workspace.remove() {
            warn!("{}", err.chain_message());
        }

        match outcome {
            Ok(delivered) => {
                debug!("{id}: {}", Stage::Done);
                Ok(delivered)
            }
            Err(error) => {
                debug!("{id}: {} while {stage}", Stage::Failed);
                Err(StageFailure { stage, error })
            }
        }
    }

    fn run(
        &self,
        id: &str,
        workspace: &Workspace,
        sink: &mut dyn UploadSink,
        journal: &dyn Journal,
        stage: &mut Stage,
    ) -> Result<Delivered> {
        let descriptor = self.provider.get_video_info(id)?;
        info!("Resolved {descriptor}");
        let format = self
            .provider
            .get_media_stream_info(&descriptor, &self.options.format)?;
        debug!("Selected format {} ({})", format.id, format.codec);
        let chapters = extract_chapters(
            &descriptor.annotations,
            descriptor.duration,
            &descriptor.title,
        )
        .with_context(|| format!("Could not compute the chapters of {id}"))?;
        debug!("{} chapters", chapters.len());

        let count = match self.options.split {
            SplitMode::Chapters => chapters.len(),
            SplitMode::Full => 1,
        };
        let todo = match journal.remaining()? {
            Some(remaining) if remaining.iter().all(|&i| i < count) => {
                info!("Resuming {id}: {} of {count} artifacts left", remaining.len());
                remaining
            }
            _ => {
                journal.assign(count)?;
                (0..count).collect()
            }
        };

        let mut delivery = Delivery {
            sink,
            directory: item_name(&descriptor),
            caption: chat_caption(&descriptor, &chapters),
            opened: false,
            delivered: Delivered {
                title: descriptor.title.clone(),
                ..Delivered::default()
            },
        };

        if !todo.is_empty() {
            enter(stage, Stage::Downloading, id);
            let source = self.download(&descriptor, format, workspace)?;

            match self.options.split {
                SplitMode::Chapters => {
                    for index in todo {
                        let chapter = &chapters[index];
                        enter(stage, Stage::Transcoding, id);
                        let name = chapter_file_name(index, &chapter.caption, self.options.ext);
                        let file = workspace.file(&name);
                        let args = extract_audio_args(
                            source.input(),
                            Some(TimeWindow::from(chapter)),
                            self.options.ext,
                            self.options.bitrate,
                        );
                        info!("Extracting chapter {}/{}: {chapter}", index + 1, count);
                        self.transcode_to_file(&args, &source, &file)
                            .with_context(|| format!("Could not extract chapter {}", index + 1))?;

                        enter(stage, Stage::Uploading, id);
                        delivery.upload_file(&name, &file)?;
                        journal.artifact_done(index)?;
                        fs::remove_file(&file)?;
                    }
                }
                SplitMode::Full => {
                    enter(stage, Stage::Transcoding, id);
                    let name = format!("{}{}", delivery.directory, self.options.ext.with_dot());
                    let file = workspace.file(&name);
                    self.transcode_full(&descriptor, &chapters, &source, workspace, &file)
                        .context("Could not extract the whole media")?;

                    enter(stage, Stage::Uploading, id);
                    delivery.upload_file(&name, &file)?;
                    journal.artifact_done(0)?;
                }
            }
        }

        if self.options.subtitles {
            enter(stage, Stage::Downloading, id);
            match self.provider.get_subtitles_stream(&descriptor)? {
                Some(mut stream) => {
                    let mut text = String::new();
                    stream.read_to_string(&mut text)?;
                    let mut cues = parse_srt(&text)?;

                    enter(stage, Stage::Uploading, id);
                    let transcript = format_for_reading(&cues, &chapters);
                    delivery.upload_bytes(&format!("{}.txt", delivery.directory), transcript.as_bytes())?;

                    fix_overlaps(&mut cues);
                    let srt = format_srt(&cues);
                    delivery.upload_bytes(&format!("{}.srt", delivery.directory), srt.as_bytes())?;
                }
                None => info!("{id} has no caption track"),
            }
        }

        if self.options.info {
            enter(stage, Stage::Uploading, id);
            let manifest = serde_json::to_vec_pretty(&Manifest::new(&descriptor, &chapters))
                .map_err(|err| Error::Invariant(format!("unserializable manifest: {err}")))?;
            delivery.upload_bytes("info.json", &manifest)?;
            delivery.upload_bytes("description.txt", descriptor.description.as_bytes())?;
        }

        Ok(delivery.delivered)
    }

    /// Fetch the selected format, from the media cache when it holds it
    fn download(
        &self,
        descriptor: &MediaDescriptor,
        format: &Format,
        workspace: &Workspace,
    ) -> Result<SourceMedia> {
        let file_name = format!("{}.{}", sanitize(&descriptor.id), format.container);
        let cached = self
            .options
            .media_cache
            .as_ref()
            .map(|cache| cache.join(&file_name));

        if let Some(cached) = cached.as_ref().filter(|path| path.is_file()) {
            info!("Using cached media {}", cached.display());
            return Ok(if self.options.in_memory {
                SourceMedia::Memory(fs::read(cached)?.into())
            } else {
                SourceMedia::File(cached.clone())
            });
        }

        let progress =
            ProgressLog::new(format!("Downloading {}", descriptor.id), format.approx_size);
        let mut reader = ProgressReader::new(
            self.provider.get_media_stream(descriptor, format)?,
            Some(progress.into_callback()),
        );

        if self.options.in_memory {
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            reader.complete();
            if let Some(cached) = cached {
                save_atomically(&cached, &mut &data[..])?;
            }
            return Ok(SourceMedia::Memory(data.into()));
        }

        let path = cached.unwrap_or_else(|| workspace.file(&format!("source.{}", format.container)));
        save_atomically(&path, &mut reader)?;
        reader.complete();
        Ok(SourceMedia::File(path))
    }

    /// Run the transcoder streaming its output into `output`
    fn transcode_to_file(&self, args: &[OsString], source: &SourceMedia, output: &Path) -> Result<()> {
        let mut stream = self.transcoder.run(args, source.feed())?;
        let mut writer = BufWriter::new(File::create(output)?);
        io::copy(&mut stream, &mut writer)?;
        writer.flush()?;
        Ok(())
    }

    fn transcode_full(
        &self,
        descriptor: &MediaDescriptor,
        chapters: &[Chapter],
        source: &SourceMedia,
        workspace: &Workspace,
        output: &Path,
    ) -> Result<()> {
        if !self.options.ext.holds_chapters() {
            let args = extract_audio_args(source.input(), None, self.options.ext, self.options.bitrate);
            return self.transcode_to_file(&args, source, output);
        }

        let metadata = workspace.file("metadata.txt");
        fs::write(
            &metadata,
            ffmetadata(&descriptor.title, &descriptor.author, chapters),
        )?;
        let args = remux_with_chapters_args(source.input(), &metadata, output);
        self.transcoder.run_to_file(&args, source.feed())
    }
}

fn enter(stage: &mut Stage, next: Stage, id: &str) {
    if *stage != next {
        debug!("{id}: {next}");
        *stage = next;
    }
}

/// Write `reader` to `path` through a temporary sibling, so that an
/// interrupted download never looks complete
fn save_atomically(path: &Path, reader: &mut dyn Read) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let mut writer = BufWriter::new(File::create(&partial)?);
    io::copy(reader, &mut writer)?;
    writer.into_inner().map_err(|err| err.into_error())?.sync_all()?;
    fs::rename(&partial, path)?;
    Ok(())
}

/// Uploads of one item. The item directory is created with the first upload
/// so that failing before it leaves nothing at the destination.
struct Delivery<'s> {
    sink: &'s mut dyn UploadSink,
    directory: String,
    caption: String,
    opened: bool,
    delivered: Delivered,
}

impl Delivery<'_> {
    fn upload(&mut self, relative: &str, reader: &mut dyn Read, size: Option<u64>) -> Result<()> {
        if !self.opened {
            self.sink
                .create_base_directory(&self.directory, &self.caption)?;
            self.opened = true;
        }

        let relative = Path::new(relative);
        let destination = self.sink.get_absolute_path(relative)?;
        info!("Uploading {destination}");

        let progress = ProgressLog::new(format!("Uploading {}", relative.display()), size);
        let written = self
            .sink
            .upload_file_stream(relative, reader, Some(progress.into_callback()))?;

        self.delivered.artifacts.push(destination);
        self.delivered.bytes += written;
        Ok(())
    }

    fn upload_file(&mut self, relative: &str, path: &Path) -> Result<()> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        self.upload(relative, &mut BufReader::new(file), Some(size))
    }

    fn upload_bytes(&mut self, relative: &str, data: &[u8]) -> Result<()> {
        self.upload(relative, &mut &data[..], Some(data.len() as u64))
    }
}
