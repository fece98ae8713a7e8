//! Locate compiled images in a build output directory.

use std::fs;
use std::path::{Path, PathBuf};

use super::{Artifact, ArtifactError, ArtifactKind, ArtifactSet};
use crate::workspace::Workspace;

/// Reads the images a compile left behind for one sketch.
#[derive(Debug, Clone)]
pub struct ArtifactResolver {
    dir: PathBuf,
    sketch_name: String,
}

impl ArtifactResolver {
    pub fn new(dir: impl Into<PathBuf>, sketch_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            sketch_name: sketch_name.into(),
        }
    }

    /// Resolver for a build workspace; the compiler writes next to the sketch.
    pub fn for_workspace(workspace: &Workspace) -> Self {
        Self::new(workspace.path(), workspace.name())
    }

    /// Collect the artifacts.
    ///
    /// If the merged image exists it is the only artifact returned. Otherwise
    /// every split image present is returned, even a partial subset.
    pub fn resolve(&self) -> Result<ArtifactSet, ArtifactError> {
        let merged = self.path_for(ArtifactKind::Merged);
        if merged.is_file() {
            let artifact = Artifact::new(ArtifactKind::Merged, read(&merged)?);
            return ArtifactSet::from_artifacts(vec![artifact]);
        }

        let mut found = Vec::new();
        for kind in ArtifactKind::SPLIT {
            let path = self.path_for(kind);
            if path.is_file() {
                found.push(Artifact::new(kind, read(&path)?));
            }
        }

        if found.is_empty() {
            return Err(ArtifactError::NoArtifacts {
                dir: self.dir.clone(),
            });
        }
        ArtifactSet::from_artifacts(found)
    }

    fn path_for(&self, kind: ArtifactKind) -> PathBuf {
        self.dir.join(kind.file_name(&self.sketch_name))
    }
}

fn read(path: &Path) -> Result<Vec<u8>, ArtifactError> {
    fs::read(path).map_err(|source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })
}
