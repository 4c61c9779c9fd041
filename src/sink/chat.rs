use std::{io::Read, path::Path};

use reqwest::blocking::{multipart, Client};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{ensure_relative, UploadSink};
use crate::{
    config::TelegramSettings,
    progress::{ProgressFn, ProgressReader},
    result::{Error, Result},
    types::Extension,
};

/// Longest text message accepted by the chat
pub const MAX_MESSAGE_LENGTH: usize = 4096;
/// Longest caption that can go along a file
pub const MAX_CAPTION_LENGTH: usize = 1024;

/// Path shown for every artifact, the chat has no directories
const CURRENT: &str = "current";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Audio,
    Document,
}

impl AttachmentKind {
    fn of(path: &Path) -> Self {
        if Extension::from_path(path).is_some() {
            AttachmentKind::Audio
        } else {
            AttachmentKind::Document
        }
    }
}

/// The messaging service performing the actual network calls
pub trait ChatMessenger: Send {
    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Send a text, split in as many messages as needed
    fn send_message(&mut self, text: &str) -> Result<()>;

    fn send_file(
        &mut self,
        file_name: &str,
        kind: AttachmentKind,
        data: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<()>;
}

/// Split `text` in pieces of at most `limit` characters
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Delivers the artifacts as files posted in a chat
pub struct ChatSink {
    messenger: Box<dyn ChatMessenger>,
    /// Caption of the current item, sent along its first artifact
    pending_caption: Option<String>,
}

impl ChatSink {
    pub fn new(messenger: Box<dyn ChatMessenger>) -> Self {
        Self {
            messenger,
            pending_caption: None,
        }
    }
}

impl UploadSink for ChatSink {
    fn name(&self) -> &'static str {
        "chat"
    }

    fn initialize(&mut self) -> Result<()> {
        self.messenger.start()
    }

    fn destroy(&mut self) -> Result<()> {
        self.messenger.stop()
    }

    fn create_base_directory(&mut self, _name: &str, caption: &str) -> Result<()> {
        self.pending_caption = Some(caption.to_string()).filter(|c| !c.trim().is_empty());
        Ok(())
    }

    fn get_absolute_path(&self, relative: &Path) -> Result<String> {
        ensure_relative(relative)?;
        Ok(CURRENT.to_string())
    }

    fn upload_file_stream(
        &mut self,
        relative: &Path,
        stream: &mut dyn Read,
        on_progress: Option<ProgressFn>,
    ) -> Result<u64> {
        ensure_relative(relative)?;

        let file_name = relative
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Error::upload(relative, "no file name"))?;

        let mut data = Vec::new();
        let mut reader = ProgressReader::new(stream, on_progress);
        reader
            .read_to_end(&mut data)
            .map_err(|err| Error::upload_io(relative, err))?;

        let caption = self.pending_caption.take();
        let caption = match caption {
            Some(caption) if caption.chars().count() > MAX_CAPTION_LENGTH => {
                debug!("Caption too long for a file, sending it as a message");
                self.messenger.send_message(&caption)?;
                None
            }
            caption => caption,
        };

        let size = data.len() as u64;
        self.messenger.send_file(
            &file_name,
            AttachmentKind::of(relative),
            data,
            caption.as_deref(),
        )?;

        Ok(reader.complete().max(size))
    }

    fn open_in_viewer(&self) -> Result<()> {
        Err(Error::Unsupported {
            sink: "chat",
            operation: "open in viewer",
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

/// [`ChatMessenger`] over the Telegram Bot API
#[derive(Debug)]
pub struct TelegramMessenger {
    client: Client,
    base_url: String,
    chat_id: String,
}

impl TelegramMessenger {
    pub fn new(settings: &TelegramSettings) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|err| Error::Config(format!("Could not build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/bot{}",
                settings.api_url.trim_end_matches('/'),
                settings.token
            ),
            chat_id: settings.chat_id.clone(),
        })
    }

    fn call(&self, method: &str, request: reqwest::blocking::RequestBuilder) -> Result<()> {
        let failed = |message: String| Error::upload(format!("telegram {method}"), message);

        let response: ApiResponse = request
            .send()
            .and_then(|res| res.json())
            .map_err(|err| failed(err.without_url().to_string()))?;

        if response.ok {
            Ok(())
        } else {
            Err(failed(
                response
                    .description
                    .unwrap_or_else(|| "request rejected".to_string()),
            ))
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }
}

impl ChatMessenger for TelegramMessenger {
    fn start(&mut self) -> Result<()> {
        self.call("getMe", self.client.get(self.url("getMe")))
            .map_err(|err| Error::Config(format!("The bot token was rejected: {}", err.chain_message())))?;
        info!("Chat bot ready");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        debug!("Chat bot stopped");
        Ok(())
    }

    fn send_message(&mut self, text: &str) -> Result<()> {
        for chunk in chunk_text(text, MAX_MESSAGE_LENGTH) {
            let body = json!({ "chat_id": self.chat_id, "text": chunk });
            self.call("sendMessage", self.client.post(self.url("sendMessage")).json(&body))?;
        }
        Ok(())
    }

    fn send_file(
        &mut self,
        file_name: &str,
        kind: AttachmentKind,
        data: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<()> {
        let (method, field) = match kind {
            AttachmentKind::Audio => ("sendAudio", "audio"),
            AttachmentKind::Document => ("sendDocument", "document"),
        };

        let part = multipart::Part::bytes(data).file_name(file_name.to_string());
        let mut form = multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .part(field, part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        debug!("Sending {file_name} with {method}");
        self.call(method, self.client.post(self.url(method)).multipart(form))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct FakeMessenger {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl ChatMessenger for FakeMessenger {
        fn start(&mut self) -> Result<()> {
            self.sent.lock().unwrap().push("start".into());
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.sent.lock().unwrap().push("stop".into());
            Ok(())
        }

        fn send_message(&mut self, text: &str) -> Result<()> {
            let count = chunk_text(text, MAX_MESSAGE_LENGTH).len();
            self.sent.lock().unwrap().push(format!("message x{count}"));
            Ok(())
        }

        fn send_file(
            &mut self,
            file_name: &str,
            kind: AttachmentKind,
            data: Vec<u8>,
            caption: Option<&str>,
        ) -> Result<()> {
            self.sent.lock().unwrap().push(format!(
                "{kind:?} {file_name} {} {}",
                data.len(),
                caption.unwrap_or("-")
            ));
            Ok(())
        }
    }

    #[test]
    fn caption_goes_with_the_first_file_only() {
        let messenger = FakeMessenger::default();
        let mut sink = ChatSink::new(Box::new(messenger.clone()));

        sink.initialize().unwrap();
        sink.create_base_directory("ignored", "Someone A talk").unwrap();
        sink.upload_file_stream(Path::new("001 - Intro.mp3"), &mut &b"abc"[..], None)
            .unwrap();
        sink.upload_file_stream(Path::new("talk.srt"), &mut &b"1"[..], None)
            .unwrap();
        sink.destroy().unwrap();

        assert_eq!(
            *messenger.sent.lock().unwrap(),
            vec![
                "start",
                "Audio 001 - Intro.mp3 3 Someone A talk",
                "Document talk.srt 1 -",
                "stop",
            ]
        );
    }

    #[test]
    fn long_caption_is_sent_as_messages_first() {
        let messenger = FakeMessenger::default();
        let mut sink = ChatSink::new(Box::new(messenger.clone()));
        sink.create_base_directory("x", &"chapter\n".repeat(600)).unwrap();
        sink.upload_file_stream(Path::new("a.aac"), &mut &b"ab"[..], None)
            .unwrap();

        assert_eq!(
            *messenger.sent.lock().unwrap(),
            vec!["message x2", "Audio a.aac 2 -"]
        );
    }

    #[test]
    fn has_no_directories() {
        let mut sink = ChatSink::new(Box::new(FakeMessenger::default()));
        assert_eq!(sink.get_absolute_path(Path::new("a/b.aac")).unwrap(), "current");
        assert!(matches!(sink.open_in_viewer(), Err(Error::Unsupported { .. })));
        assert!(matches!(
            sink.upload_file_stream(Path::new("/a.aac"), &mut &b""[..], None),
            Err(Error::AbsolutePath(_))
        ));
    }

    #[test]
    fn chunks_by_characters() {
        assert_eq!(chunk_text("abcdefg", 3), vec!["abc", "def", "g"]);
        assert_eq!(chunk_text("ééé", 2), vec!["éé", "é"]);
        assert!(chunk_text("", 10).is_empty());
    }
}
