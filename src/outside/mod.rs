mod command;
mod ffmpeg;
mod ytdl;

pub use command::{assert_success_command, Input};
pub use ffmpeg::{
    extract_audio_args, ffmetadata, remux_with_chapters_args, Ffmpeg, StreamTransformer,
    TimeWindow, TranscodeInput, FFMPEG,
};
pub use ytdl::{split_ids, SourceRef, VideoInfoProvider, Ytdl};
