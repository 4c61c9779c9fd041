use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use super::{Actor, ItemReport, Outcome, WorkItem};
use crate::{
    database::{CacheDb, ItemJournal},
    outside::{SourceRef, StreamTransformer, VideoInfoProvider},
    pipeline::{MediaDistributionPipeline, NoJournal, PipelineOptions, Stage, StageFailure},
    progress::human_bytes,
    result::{Error, Result, ResultExt},
    sink::UploadSink,
};

/// How a batch reacts to its items
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Process items already delivered to the destination
    pub force: bool,
    /// Stop consuming work after the first failed item
    pub stop_on_error: bool,
    /// Show the destination once the batch is over
    pub open: bool,
}

/// Runs the items of a batch one after the other through the pipeline,
/// owning the sink for the whole batch
pub struct PipelineActor<'a, D> {
    provider: &'a dyn VideoInfoProvider,
    transcoder: &'a dyn StreamTransformer,
    options: &'a PipelineOptions,
    sink: Box<dyn UploadSink>,
    history: Option<&'a D>,
    /// Destination as recorded in the history
    destination: String,
    batch: BatchOptions,

    receive_channel: Option<Receiver<WorkItem>>,
    send_channel: Option<Sender<ItemReport>>,
}

impl<D: CacheDb> Actor<WorkItem, ItemReport> for PipelineActor<'_, D> {
    fn set_receive_channel(&mut self, channel: Receiver<WorkItem>) {
        self.receive_channel = Some(channel);
    }

    fn set_send_channel(&mut self, channel: Sender<ItemReport>) {
        self.send_channel = Some(channel);
    }

    fn run(mut self) -> Result<()> {
        let receive_channel = self
            .receive_channel
            .take()
            .ok_or_else(|| Error::Invariant("Receive channel not set".to_string()))?;

        let send_channel = self
            .send_channel
            .take()
            .ok_or_else(|| Error::Invariant("Send channel not set".to_string()))?;

        self.sink
            .initialize()
            .with_context(|| format!("Could not initialize the {} sink", self.sink.name()))?;

        debug!("Actor started, waiting for work");
        let consumed = self.consume(&receive_channel, &send_channel);

        if self.batch.open {
            if let Err(err) = self.sink.open_in_viewer() {
                warn!("Could not open the destination: {}", err.chain_message());
            }
        }

        let destroyed = self.sink.destroy();
        debug!("All work consumed. Stopping the actor.");

        consumed?;
        destroyed.with_context(|| format!("Could not close the {} sink", self.sink.name()))
    }
}

impl<'a, D: CacheDb> PipelineActor<'a, D> {
    pub fn new(
        provider: &'a dyn VideoInfoProvider,
        transcoder: &'a dyn StreamTransformer,
        options: &'a PipelineOptions,
        sink: Box<dyn UploadSink>,
        history: Option<&'a D>,
        destination: String,
        batch: BatchOptions,
    ) -> Self {
        Self {
            provider,
            transcoder,
            options,
            sink,
            history,
            destination,
            batch,
            receive_channel: None,
            send_channel: None,
        }
    }

    fn consume(&mut self, receive: &Receiver<WorkItem>, send: &Sender<ItemReport>) -> Result<()> {
        for WorkItem(text) in receive {
            debug!("Work '{text}' received");

            let ids = match self.expand(&text) {
                Ok(ids) => ids,
                Err(err) => {
                    let outcome = failed(Stage::Resolving, &err);
                    if self.report(send, text, outcome)? {
                        return Ok(());
                    }
                    continue;
                }
            };

            for id in ids {
                let outcome = self.process(&id);
                if self.report(send, id, outcome)? {
                    return Ok(());
                }
            }

            debug!("Iteration completed. Waiting for next work");
        }
        Ok(())
    }

    /// Send the report, returning whether the batch must stop
    fn report(&self, send: &Sender<ItemReport>, id: String, outcome: Outcome) -> Result<bool> {
        let stop = self.batch.stop_on_error && matches!(outcome, Outcome::Failed { .. });
        send.send(ItemReport { id, outcome })
            .map_err(|_| Error::Invariant("Report channel closed".to_string()))?;

        if stop {
            warn!("Stopping the batch after the first failure");
        }
        Ok(stop)
    }

    /// The videos designated by the user input, in order
    fn expand(&self, text: &str) -> Result<Vec<String>> {
        match self.provider.parse_id(text)? {
            SourceRef::Video(id) => Ok(vec![id]),
            SourceRef::Playlist(id) => {
                info!("Getting the videos of playlist {id}");
                let ids = self.provider.get_playlist_items(&id)?;
                info!("{} videos in the playlist", ids.len());
                Ok(ids)
            }
        }
    }

    fn process(&mut self, id: &str) -> Outcome {
        let journal = match self
            .history
            .map(|db| ItemJournal::open(db, id, &self.destination, self.batch.force))
            .transpose()
        {
            Ok(journal) => journal,
            Err(err) => return failed(Stage::Resolving, &err),
        };

        if journal.as_ref().is_some_and(|journal| journal.is_completed()) {
            info!("{id} already delivered to {}, skipping it", self.destination);
            return Outcome::Skipped;
        }

        let pipeline = MediaDistributionPipeline::new(self.provider, self.transcoder, self.options);
        let processed = match &journal {
            Some(journal) => pipeline.process(id, self.sink.as_mut(), journal),
            None => pipeline.process(id, self.sink.as_mut(), &NoJournal),
        };

        match processed {
            Ok(delivered) => {
                if let Some(journal) = &journal {
                    if let Err(err) = journal.set_completed() {
                        warn!("Could not record {id} as delivered: {}", err.chain_message());
                    }
                }
                info!(
                    "{id} delivered: {} ({} files, {})",
                    delivered.title,
                    delivered.artifacts.len(),
                    human_bytes(delivered.bytes)
                );
                Outcome::Completed {
                    artifacts: delivered.artifacts.len(),
                    bytes: delivered.bytes,
                }
            }
            Err(StageFailure { stage, error }) => {
                error!("{id} failed while {stage}: {}", error.chain_message());
                failed(stage, &error)
            }
        }
    }
}

fn failed(stage: Stage, error: &Error) -> Outcome {
    Outcome::Failed {
        stage,
        kind: error.kind(),
        message: error.chain_message(),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        ffi::OsString,
        io::{Cursor, Read},
        path::Path,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use crossbeam_channel::unbounded;

    use super::*;
    use crate::{
        database::Sqlite,
        outside::Input,
        pipeline::SplitMode,
        progress::ProgressFn,
        result::FailureKind,
        types::{
            Bitrate, Extension, Format, FormatKind, FormatQuery, MediaDescriptor,
            TimingAnnotations,
        },
    };

    const PLAYLIST: &str = "PLx0sYbCqOb8TBPRdmBHs5Iftvv9TPboYG";

    struct FakeProvider;

    impl VideoInfoProvider for FakeProvider {
        fn get_playlist_items(&self, _playlist_id: &str) -> Result<Vec<String>> {
            Ok(vec!["aaaaaaaaaaa".into(), "xxxxxxxxxxx".into(), "bbbbbbbbbbb".into()])
        }

        fn get_video_info(&self, video_id: &str) -> Result<MediaDescriptor> {
            if video_id.starts_with('x') {
                return Err(Error::Resolution {
                    id: video_id.into(),
                    message: "Private video".into(),
                });
            }
            Ok(MediaDescriptor {
                id: video_id.into(),
                author: "Someone".into(),
                title: video_id.into(),
                duration: Duration::from_secs(60),
                description: String::new(),
                caption_track: None,
                annotations: TimingAnnotations::default(),
                formats: vec![Format {
                    id: "140".into(),
                    kind: FormatKind::Audio,
                    codec: "mp4a.40.2".into(),
                    container: "m4a".into(),
                    has_audio: true,
                    approx_size: None,
                    approx_duration: None,
                    source_url: String::new(),
                }],
            })
        }

        fn get_media_stream(
            &self,
            _descriptor: &MediaDescriptor,
            _format: &Format,
        ) -> Result<Box<dyn Read + Send>> {
            Ok(Box::new(&b"source"[..]))
        }

        fn get_subtitles_stream(
            &self,
            _descriptor: &MediaDescriptor,
        ) -> Result<Option<Box<dyn Read + Send>>> {
            Ok(None)
        }
    }

    #[derive(Debug)]
    struct FakeTranscoder;

    impl StreamTransformer for FakeTranscoder {
        fn get_version(&self) -> Result<String> {
            Ok("6.0".into())
        }

        fn run(&self, _args: &[OsString], _input: Option<Input>) -> Result<Box<dyn Read + Send>> {
            Ok(Box::new(Cursor::new(b"audio".to_vec())))
        }

        fn run_to_file(&self, _args: &[OsString], _input: Option<Input>) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeSink(Arc<Mutex<Vec<String>>>);

    impl FakeSink {
        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl UploadSink for FakeSink {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn initialize(&mut self) -> Result<()> {
            self.0.lock().unwrap().push("initialize".into());
            Ok(())
        }

        fn destroy(&mut self) -> Result<()> {
            self.0.lock().unwrap().push("destroy".into());
            Ok(())
        }

        fn create_base_directory(&mut self, _name: &str, _caption: &str) -> Result<()> {
            Ok(())
        }

        fn get_absolute_path(&self, relative: &Path) -> Result<String> {
            Ok(relative.display().to_string())
        }

        fn upload_file_stream(
            &mut self,
            relative: &Path,
            stream: &mut dyn Read,
            _on_progress: Option<ProgressFn>,
        ) -> Result<u64> {
            let written = std::io::copy(stream, &mut std::io::sink())?;
            self.0.lock().unwrap().push(relative.display().to_string());
            Ok(written)
        }

        fn open_in_viewer(&self) -> Result<()> {
            Err(Error::Unsupported {
                sink: "fake",
                operation: "open in viewer",
            })
        }
    }

    fn options(temp: &Path) -> PipelineOptions {
        PipelineOptions {
            split: SplitMode::Chapters,
            ext: Extension::Aac,
            bitrate: Bitrate::default(),
            format: FormatQuery::default(),
            subtitles: false,
            info: false,
            in_memory: false,
            temp_dir: temp.to_path_buf(),
            media_cache: None,
        }
    }

    fn run_batch(
        inputs: &[&str],
        sink: &FakeSink,
        history: Option<&Sqlite>,
        batch: BatchOptions,
    ) -> Vec<ItemReport> {
        let temp = tempfile::tempdir().unwrap();
        let options = options(temp.path());
        let mut actor = PipelineActor::new(
            &FakeProvider,
            &FakeTranscoder,
            &options,
            Box::new(sink.clone()),
            history,
            "/music".to_string(),
            batch,
        );

        let (input, receive) = unbounded();
        let (send, output) = unbounded();
        actor.set_receive_channel(receive);
        actor.set_send_channel(send);

        for text in inputs {
            input.send(WorkItem(text.to_string())).unwrap();
        }
        drop(input);

        actor.run().unwrap();
        output.iter().collect()
    }

    fn ids(reports: &[ItemReport]) -> Vec<&str> {
        reports.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn playlist_items_are_reported_in_order() {
        let sink = FakeSink::default();
        let reports = run_batch(&[PLAYLIST, "not an id"], &sink, None, BatchOptions::default());

        assert_eq!(
            ids(&reports),
            vec!["aaaaaaaaaaa", "xxxxxxxxxxx", "bbbbbbbbbbb", "not an id"]
        );
        assert!(matches!(reports[0].outcome, Outcome::Completed { artifacts: 1, bytes: 5 }));
        assert!(matches!(
            reports[1].outcome,
            Outcome::Failed {
                stage: Stage::Resolving,
                kind: FailureKind::Resolution,
                ..
            }
        ));
        assert!(matches!(reports[3].outcome, Outcome::Failed { .. }));

        let events = sink.events();
        assert_eq!(events.first().map(String::as_str), Some("initialize"));
        assert_eq!(events.last().map(String::as_str), Some("destroy"));
    }

    #[test]
    fn delivered_items_are_skipped_unless_forced() {
        let history = Sqlite::in_memory().unwrap();
        let sink = FakeSink::default();

        run_batch(&["aaaaaaaaaaa"], &sink, Some(&history), BatchOptions::default());
        let reports = run_batch(&["aaaaaaaaaaa"], &sink, Some(&history), BatchOptions::default());
        assert_eq!(reports[0].outcome, Outcome::Skipped);

        let forced = BatchOptions {
            force: true,
            ..BatchOptions::default()
        };
        let reports = run_batch(&["aaaaaaaaaaa"], &sink, Some(&history), forced);
        assert!(matches!(reports[0].outcome, Outcome::Completed { .. }));
    }

    #[test]
    fn stops_after_the_first_failure_when_asked() {
        let sink = FakeSink::default();
        let batch = BatchOptions {
            stop_on_error: true,
            open: true,
            ..BatchOptions::default()
        };
        let reports = run_batch(&["xxxxxxxxxxx", "aaaaaaaaaaa"], &sink, None, batch);

        assert_eq!(ids(&reports), vec!["xxxxxxxxxxx"]);
        assert_eq!(sink.events(), vec!["initialize", "destroy"]);
    }
}
