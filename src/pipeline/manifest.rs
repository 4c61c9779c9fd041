use std::fmt::Write;

use serde::Serialize;

use crate::types::{format_hms, format_hms_short, Chapter, MediaDescriptor};

/// The `info.json` document describing a delivered item
#[derive(Debug, Serialize)]
pub struct Manifest {
    pub id: String,
    pub link: String,
    pub author: String,
    pub title: String,
    pub duration: String,
    pub chapters: Vec<String>,
}

impl Manifest {
    pub fn new(descriptor: &MediaDescriptor, chapters: &[Chapter]) -> Self {
        Self {
            id: descriptor.id.clone(),
            link: descriptor.link(),
            author: descriptor.author.clone(),
            title: descriptor.title.clone(),
            duration: format_hms(descriptor.duration),
            chapters: chapters
                .iter()
                .map(|c| format!("{} - {}", format_hms(c.start), c.caption))
                .collect(),
        }
    }
}

/// Caption posted with an item in a chat: its author and title, then the
/// numbered list of its chapters
pub fn chat_caption(descriptor: &MediaDescriptor, chapters: &[Chapter]) -> String {
    let mut caption = format!("{} {}", descriptor.author, descriptor.title);
    if chapters.len() > 1 {
        caption.push('\n');
        for (i, chapter) in chapters.iter().enumerate() {
            let _ = write!(
                caption,
                "\n{}. {} ({})",
                i + 1,
                chapter.caption,
                format_hms_short(chapter.start)
            );
        }
    }
    caption
}
