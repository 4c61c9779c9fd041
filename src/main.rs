mod actors;
mod cli;
mod config;
mod database;
mod logging;
mod my_regex;
mod outside;
mod pipeline;
mod progress;
mod result;
mod sink;
mod subtitles;
mod types;
mod utils;

use std::thread;

use clap::Parser;
use crossbeam_channel::unbounded;
use miette::{miette, IntoDiagnostic, WrapErr};
use owo_colors::OwoColorize;
use tracing::{debug, error, info};

use crate::{
    actors::{Actor, BatchOptions, ItemReport, Outcome, PipelineActor, Summary, WorkItem},
    cli::Args,
    config::Settings,
    database::{CacheDb, ProcessedState, Sqlite},
    my_regex::get_default_re_list,
    outside::{split_ids, Ffmpeg, StreamTransformer, Ytdl},
    pipeline::PipelineOptions,
    sink::{build_sink, Destination},
    types::FormatQuery,
};

fn main() -> miette::Result<()> {
    let args = Args::parse();
    logging::init_logging(args.log_level)?;

    let settings = Settings::load(args.config.as_deref())?;
    let destination = args
        .destination
        .clone()
        .or_else(|| settings.destination.clone())
        .ok_or_else(|| miette!("No destination: use --destination or the settings file"))?;
    let destination = Destination::parse(&destination)?;

    let (provider, transcoder) = load_external_components(&args, &settings)?;
    let sink = build_sink(&destination, settings.telegram.as_ref())?;

    let history = match args.history.as_ref().or(settings.history.as_ref()) {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .into_diagnostic()
                    .wrap_err("Could not create the history parent directories")?;
            }
            let db = Sqlite::read_or_create(path)?;
            info!(
                "{} items already delivered",
                db.count_items(Some(ProcessedState::Completed))?
            );
            Some(db)
        }
        None => None,
    };

    let options = PipelineOptions {
        split: args.split,
        ext: args.ext,
        bitrate: args.bitrate,
        format: FormatQuery {
            rule: args.quality,
            ..FormatQuery::default()
        },
        subtitles: args.subtitles,
        info: args.info,
        in_memory: args.in_memory,
        temp_dir: args
            .temp_dir
            .clone()
            .or_else(|| settings.temp_dir.clone())
            .unwrap_or_else(|| std::env::temp_dir().join("clipcast")),
        media_cache: args
            .dev_cache
            .clone()
            .or_else(|| settings.media_cache_dir.clone()),
    };
    let batch = BatchOptions {
        force: args.force,
        stop_on_error: args.stop_on_error,
        open: args.open,
    };

    let inputs = split_ids(args.inputs.iter().map(String::as_str));
    debug!("{} inputs", inputs.len());

    let mut actor = PipelineActor::new(
        &provider,
        &transcoder,
        &options,
        sink,
        history.as_ref(),
        destination.to_string(),
        batch,
    );

    let (input, receive) = unbounded();
    let (send, output) = unbounded();
    actor.set_receive_channel(receive);
    actor.set_send_channel(send);

    let summary = thread::scope(|scope| -> miette::Result<Summary> {
        let handle = thread::Builder::new()
            .name("pipeline".to_string())
            .spawn_scoped(scope, move || actor.run())
            .into_diagnostic()
            .wrap_err("Could not start the pipeline thread")?;

        // Fill the input channel with all the tasks. Sending fails only when
        // the actor stopped early
        for text in inputs {
            if input.send(WorkItem(text)).is_err() {
                break;
            }
        }

        // Drop the input to indicate the end of the input data
        drop(input);

        let mut summary = Summary::default();
        for report in output {
            print_report(&report);
            summary.record(&report);
        }

        handle
            .join()
            .map_err(|_| miette!("The pipeline thread panicked"))??;
        Ok(summary)
    })?;

    print_summary(&summary);
    if summary.failed > 0 {
        return Err(miette!("{} items failed", summary.failed));
    }

    info!("All tasks completed");
    Ok(())
}

/// Load the external components and check that they work.
///
/// Both are checked concurrently as executing an external program is not
/// instantaneous.
fn load_external_components(args: &Args, settings: &Settings) -> miette::Result<(Ytdl, Ffmpeg)> {
    let clip_regex = args
        .clip_regex
        .clone()
        .unwrap_or_else(|| get_default_re_list().to_vec());

    thread::scope(|scope| {
        let ytdl_thread =
            scope.spawn(|| Ytdl::new(settings.provider.program.as_deref(), clip_regex));
        let ffmpeg_thread = scope.spawn(|| -> result::Result<Ffmpeg> {
            let ffmpeg = Ffmpeg::new(settings.transcoder.program.as_str());
            let version = ffmpeg.get_version()?;
            info!("Using ffmpeg {version}");
            Ok(ffmpeg)
        });

        let ytdl = ytdl_thread
            .join()
            .map_err(|_| miette!("The downloader check panicked"))??;
        let ffmpeg = ffmpeg_thread
            .join()
            .map_err(|_| miette!("The transcoder check panicked"))??;

        Ok((ytdl, ffmpeg))
    })
}

fn print_report(report: &ItemReport) {
    match &report.outcome {
        Outcome::Completed { artifacts, .. } => {
            info!("{} {}: {artifacts} files", "done".green(), report.id)
        }
        Outcome::Skipped => info!("{} {}", "skipped".blue(), report.id),
        Outcome::Failed {
            stage,
            kind,
            message,
        } => error!(
            "{} {} while {stage} ({kind} failure): {message}",
            "failed".red(),
            report.id
        ),
    }
}

fn print_summary(summary: &Summary) {
    info!(
        "{} completed, {} skipped, {} failed",
        summary.completed.green(),
        summary.skipped.blue(),
        if summary.failed > 0 {
            summary.failed.red().to_string()
        } else {
            summary.failed.to_string()
        }
    );
}
