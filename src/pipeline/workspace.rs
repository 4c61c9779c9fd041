use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use super::naming::sanitize;
use crate::result::{Result, ResultExt};

/// Scratch directory of one item, namespaced by its id.
///
/// Removed when dropped, whatever the outcome of the item.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Create `<temp_dir>/<id>`, clearing what a previous run may have left
    pub fn create(temp_dir: &Path, id: &str) -> Result<Self> {
        let path = temp_dir.join(sanitize(id));
        if path.exists() {
            debug!("Removing stale workspace {}", path.display());
            fs::remove_dir_all(&path)
                .with_context(|| format!("Could not clear {}", path.display()))?;
        }

        fs::create_dir_all(&path)
            .with_context(|| format!("Could not create workspace {}", path.display()))?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the workspace, reporting failures
    pub fn remove(mut self) -> Result<()> {
        self.removed = true;
        debug!("Removing workspace {}", self.path.display());
        fs::remove_dir_all(&self.path)
            .with_context(|| format!("Could not remove workspace {}", self.path.display()))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.path) {
            warn!("Could not remove workspace {}: {err}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_removed_on_every_path() {
        let temp = tempfile::tempdir().unwrap();

        let workspace = Workspace::create(temp.path(), "abc/../def").unwrap();
        let path = workspace.path().to_path_buf();
        assert!(path.starts_with(temp.path()));
        fs::write(workspace.file("source.m4a"), b"x").unwrap();
        drop(workspace);
        assert!(!path.exists());

        let workspace = Workspace::create(temp.path(), "dQw4w9WgXcQ").unwrap();
        let path = workspace.path().to_path_buf();
        workspace.remove().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn clears_leftovers() {
        let temp = tempfile::tempdir().unwrap();
        let stale = temp.path().join("id1");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("old"), b"x").unwrap();

        let workspace = Workspace::create(temp.path(), "id1").unwrap();
        assert!(!workspace.file("old").exists());
    }
}
