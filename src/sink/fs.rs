use std::{
    fs::{self, File},
    io::{BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use tracing::debug;

use super::{ensure_relative, open_with_platform_viewer, UploadSink};
use crate::{
    progress::{ProgressFn, ProgressReader},
    result::{Error, Result, ResultExt},
};

/// Writes the artifacts under a local directory
#[derive(Debug)]
pub struct FilesystemSink {
    root: PathBuf,
    current: PathBuf,
}

impl FilesystemSink {
    pub fn new(root: PathBuf) -> Self {
        Self {
            current: root.clone(),
            root,
        }
    }
}

impl UploadSink for FilesystemSink {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn initialize(&mut self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Could not create {}", self.root.display()))
    }

    fn destroy(&mut self) -> Result<()> {
        Ok(())
    }

    fn create_base_directory(&mut self, name: &str, _caption: &str) -> Result<()> {
        ensure_relative(Path::new(name))?;

        self.current = self.root.join(name);
        debug!("Creating directory {}", self.current.display());
        fs::create_dir_all(&self.current).map_err(|err| Error::upload(&self.current, err))
    }

    fn get_absolute_path(&self, relative: &Path) -> Result<String> {
        ensure_relative(relative)?;
        Ok(self.current.join(relative).to_string_lossy().into_owned())
    }

    fn upload_file_stream(
        &mut self,
        relative: &Path,
        stream: &mut dyn Read,
        on_progress: Option<ProgressFn>,
    ) -> Result<u64> {
        ensure_relative(relative)?;

        let path = self.current.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::upload(&path, err))?;
        }

        let file = File::create(&path).map_err(|err| Error::upload(&path, err))?;
        let mut writer = BufWriter::new(file);
        let mut reader = ProgressReader::new(stream, on_progress);

        std::io::copy(&mut reader, &mut writer).map_err(|err| Error::upload_io(&path, err))?;
        writer
            .into_inner()
            .map_err(|err| Error::upload(&path, err.into_error()))?
            .sync_all()
            .map_err(|err| Error::upload(&path, err))?;

        Ok(reader.complete())
    }

    fn open_in_viewer(&self) -> Result<()> {
        open_with_platform_viewer(&self.current.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn writes_under_the_item_directory() {
        let root = tempfile::tempdir().unwrap();
        let mut sink = FilesystemSink::new(root.path().join("out"));
        sink.initialize().unwrap();
        sink.create_base_directory("Someone - A talk", "caption").unwrap();

        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = progress.clone();
        let written = sink
            .upload_file_stream(
                Path::new("sub/001 - Intro.aac"),
                &mut &b"audio bytes"[..],
                Some(Box::new(move |n| seen.lock().unwrap().push(n))),
            )
            .unwrap();

        let expected = root.path().join("out/Someone - A talk/sub/001 - Intro.aac");
        assert_eq!(written, 11);
        assert_eq!(fs::read(&expected).unwrap(), b"audio bytes");
        assert_eq!(progress.lock().unwrap().last(), Some(&11));
        assert_eq!(
            sink.get_absolute_path(Path::new("sub/001 - Intro.aac")).unwrap(),
            expected.to_string_lossy()
        );
    }

    #[test]
    fn rejects_absolute_paths() {
        let root = tempfile::tempdir().unwrap();
        let mut sink = FilesystemSink::new(root.path().to_path_buf());
        sink.initialize().unwrap();

        let err = sink
            .upload_file_stream(Path::new("/tmp/evil"), &mut &b""[..], None)
            .unwrap_err();
        assert!(matches!(err, Error::AbsolutePath(_)));
        assert!(sink.get_absolute_path(Path::new("/tmp/evil")).is_err());
    }
}
