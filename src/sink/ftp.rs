use std::{
    fmt::Display,
    io::{self, Read},
    path::Path,
    sync::{Arc, Mutex},
};

use suppaftp::{types::FileType, FtpError, FtpStream};
use tracing::{debug, info, warn};
use url::Url;

use super::{ensure_relative, open_with_platform_viewer, UploadSink};
use crate::{
    progress::ProgressFn,
    result::{Error, Result},
    utils::MutexUtils,
};

const DEFAULT_PORT: u16 = 21;
const ANONYMOUS: &str = "anonymous";

/// Server and base directory of an FTP destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Absolute remote directory, without trailing slash
    pub base_path: String,
}

impl FtpTarget {
    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Config(format!("no host in '{url}'")))?;

        let decode = |s: &str| {
            urlencoding::decode(s).map_or_else(|_| s.to_string(), |decoded| decoded.into_owned())
        };

        let user = match url.username() {
            "" => ANONYMOUS.to_string(),
            user => decode(user),
        };
        let password = url.password().map_or_else(|| ANONYMOUS.to_string(), decode);

        Ok(Self {
            host: host.to_string(),
            port: url.port().unwrap_or(DEFAULT_PORT),
            user,
            password,
            base_path: decode(url.path()).trim_end_matches('/').to_string(),
        })
    }

    /// Remote path of `relative` inside `directory`
    fn remote_path(&self, directory: &str, relative: &Path) -> String {
        let mut path = format!("{}/{directory}", self.base_path);
        for component in relative.iter() {
            path.push('/');
            path.push_str(&component.to_string_lossy());
        }
        path
    }
}

impl Display for FtpTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ftp://{}:{}{}", self.host, self.port, self.base_path)
    }
}

/// The control connection operations the FTP sink relies on
pub trait FtpSession: Send {
    /// Connect and log in
    fn open(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Create `dir` and all of its missing parents
    fn ensure_dir(&mut self, dir: &str) -> Result<()>;

    /// Store the whole reader at `path`
    fn put(&mut self, path: &str, reader: &mut dyn Read) -> Result<u64>;
}

/// Progress callback attached to the shared connection for one transfer at a time
#[derive(Clone, Default)]
pub struct TransferTracker {
    slot: Arc<Mutex<Option<ProgressFn>>>,
}

impl TransferTracker {
    /// Attach the callback until the returned guard is dropped
    pub fn track(&self, on_progress: Option<ProgressFn>) -> TrackingGuard<'_> {
        self.slot.with_lock(|mut slot| *slot = on_progress);
        TrackingGuard { tracker: self }
    }

    pub fn is_tracking(&self) -> bool {
        self.slot.with_lock(|slot| slot.is_some())
    }

    fn report(&self, transferred: u64) {
        self.slot.with_lock(|mut slot| {
            if let Some(on_progress) = slot.as_mut() {
                on_progress(transferred);
            }
        })
    }
}

/// Detaches the tracked callback, whatever way the transfer ended
pub struct TrackingGuard<'a> {
    tracker: &'a TransferTracker,
}

impl Drop for TrackingGuard<'_> {
    fn drop(&mut self) {
        self.tracker.slot.with_lock(|mut slot| *slot = None);
    }
}

/// Counts the bytes read for the transfer tracker
struct TrackedReader<'a, R> {
    inner: R,
    tracker: &'a TransferTracker,
    total: u64,
}

impl<R: Read> Read for TrackedReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.total += n as u64;
            self.tracker.report(self.total);
        }
        Ok(n)
    }
}

/// Uploads the artifacts to an FTP server over one connection per batch
pub struct FtpSink {
    target: FtpTarget,
    session: Box<dyn FtpSession>,
    tracker: TransferTracker,
    directory: String,
}

impl FtpSink {
    pub fn new(target: FtpTarget, session: Box<dyn FtpSession>) -> Self {
        Self {
            target,
            session,
            tracker: TransferTracker::default(),
            directory: String::new(),
        }
    }

    fn current_dir(&self) -> String {
        let mut dir = self.target.base_path.clone();
        if !self.directory.is_empty() {
            dir.push('/');
            dir.push_str(&self.directory);
        }
        if dir.is_empty() {
            dir.push('/');
        }
        dir
    }
}

impl UploadSink for FtpSink {
    fn name(&self) -> &'static str {
        "ftp"
    }

    fn initialize(&mut self) -> Result<()> {
        info!("Connecting to {}", self.target);
        self.session.open()
    }

    fn destroy(&mut self) -> Result<()> {
        debug!("Disconnecting from {}", self.target);
        self.session.close()
    }

    fn create_base_directory(&mut self, name: &str, _caption: &str) -> Result<()> {
        ensure_relative(Path::new(name))?;

        self.directory = name.to_string();
        let dir = self.current_dir();
        self.session.ensure_dir(&dir)
    }

    fn get_absolute_path(&self, relative: &Path) -> Result<String> {
        ensure_relative(relative)?;
        Ok(format!(
            "ftp://{}:{}{}",
            self.target.host,
            self.target.port,
            self.target.remote_path(&self.directory, relative)
        ))
    }

    fn upload_file_stream(
        &mut self,
        relative: &Path,
        stream: &mut dyn Read,
        on_progress: Option<ProgressFn>,
    ) -> Result<u64> {
        ensure_relative(relative)?;

        let remote = self.target.remote_path(&self.directory, relative);
        if let Some((parent, _)) = remote.rsplit_once('/').filter(|(p, _)| !p.is_empty()) {
            self.session.ensure_dir(parent)?;
        }

        let _tracking = self.tracker.track(on_progress);
        let mut reader = TrackedReader {
            inner: stream,
            tracker: &self.tracker,
            total: 0,
        };
        let written = self.session.put(&remote, &mut reader)?;
        self.tracker.report(reader.total);

        Ok(written)
    }

    fn open_in_viewer(&self) -> Result<()> {
        open_with_platform_viewer(&format!(
            "ftp://{}:{}{}",
            self.target.host,
            self.target.port,
            self.current_dir()
        ))
    }
}

/// [`FtpSession`] over a plain FTP control connection
pub struct SuppaFtpSession {
    target: FtpTarget,
    stream: Option<FtpStream>,
}

impl SuppaFtpSession {
    pub fn new(target: FtpTarget) -> Self {
        Self {
            target,
            stream: None,
        }
    }

    fn stream(&mut self) -> Result<&mut FtpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::Invariant("the FTP session is not open".to_string()))
    }

    fn failed(&self, path: &str, err: FtpError) -> Error {
        Error::upload(format!("{}{path}", self.target), err)
    }
}

impl FtpSession for SuppaFtpSession {
    fn open(&mut self) -> Result<()> {
        let target = &self.target;
        let mut stream = FtpStream::connect((target.host.as_str(), target.port))
            .map_err(|err| self.failed("", err))?;
        stream
            .login(&target.user, &target.password)
            .map_err(|err| self.failed("", err))?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(|err| self.failed("", err))?;

        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.quit() {
                warn!("Could not close the FTP session cleanly: {err}");
            }
        }
        Ok(())
    }

    fn ensure_dir(&mut self, dir: &str) -> Result<()> {
        let stream = self.stream()?;

        let mut current = String::new();
        for part in dir.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            // Fails when the directory exists, the upload reports real failures
            if let Err(err) = stream.mkdir(&current) {
                debug!("mkdir {current}: {err}");
            }
        }
        Ok(())
    }

    fn put(&mut self, path: &str, mut reader: &mut dyn Read) -> Result<u64> {
        let stream = self.stream()?;
        match stream.put_file(path, &mut reader) {
            Ok(written) => Ok(written),
            Err(err) => Err(self.failed(path, err)),
        }
    }
}
