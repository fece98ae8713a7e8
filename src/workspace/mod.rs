//! Per-job scratch directories.
//!
//! Each compile (and each flash, for staging image files) gets a private
//! directory under the build root with a globally unique name. A compile
//! workspace is seeded with `<name>/<name>.ino`, which is the layout the
//! compiler expects for a sketch.
//!
//! Removal is best-effort and happens exactly once: either through
//! [`Workspace::destroy`] or, on any early return or panic, through `Drop`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Prefix for compile workspaces.
pub const SKETCH_PREFIX: &str = "sketch";

/// Prefix for flash staging workspaces.
pub const FLASH_PREFIX: &str = "flash";

/// Errors from workspace operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create build root {path}: {source}")]
    CreateRoot { path: PathBuf, source: io::Error },

    #[error("failed to create workspace {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Result type for workspace operations.
pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// An exclusively owned scratch directory.
#[derive(Debug)]
pub struct Workspace {
    name: String,
    dir: PathBuf,
    source_path: Option<PathBuf>,
    removed: bool,
}

impl Workspace {
    /// Create a compile workspace seeded with the sketch source.
    pub fn create(build_root: &Path, source_text: &str) -> WorkspaceResult<Self> {
        let mut workspace = Self::allocate(build_root, SKETCH_PREFIX)?;

        let source_path = workspace.dir.join(format!("{}.ino", workspace.name));
        if let Err(source) = fs::write(&source_path, source_text) {
            // Drop removes the half-built directory.
            return Err(WorkspaceError::Write {
                path: source_path,
                source,
            });
        }
        workspace.source_path = Some(source_path);

        Ok(workspace)
    }

    /// Create an empty workspace for staging files.
    pub fn create_empty(build_root: &Path, prefix: &str) -> WorkspaceResult<Self> {
        Self::allocate(build_root, prefix)
    }

    fn allocate(build_root: &Path, prefix: &str) -> WorkspaceResult<Self> {
        fs::create_dir_all(build_root).map_err(|source| WorkspaceError::CreateRoot {
            path: build_root.to_path_buf(),
            source,
        })?;

        let name = format!("{}_{}", prefix, ulid::Ulid::new().to_string().to_lowercase());
        let dir = build_root.join(&name);

        // create_dir (not create_dir_all): an existing directory means a
        // name collision and must not be shared.
        fs::create_dir(&dir).map_err(|source| WorkspaceError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        log::debug!("created workspace {}", dir.display());

        Ok(Self {
            name,
            dir,
            source_path: None,
            removed: false,
        })
    }

    /// Unique workspace name (also the sketch name and job id).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Workspace directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Path of the seeded source file, for compile workspaces.
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Write a file into the workspace and return its path.
    pub fn write_file(&self, file_name: &str, contents: &[u8]) -> WorkspaceResult<PathBuf> {
        let path = self.dir.join(file_name);
        fs::write(&path, contents).map_err(|source| WorkspaceError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Recursively remove the workspace. Failures are logged, never returned.
    pub fn destroy(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        match fs::remove_dir_all(&self.dir) {
            Ok(()) => log::debug!("removed workspace {}", self.dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("failed to remove workspace {}: {}", self.dir.display(), e),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.remove();
    }
}
