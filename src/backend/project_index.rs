//! Local project index (spec §4.7): scans a well-known directory for files
//! ending in the project extension, parses each, and exposes them keyed by
//! id as an observable set.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::constants::PROJECT_EXTENSION;
use crate::envelope::project::Project;
use crate::error::CrowdfundError;
use crate::observable::ObservableMap;

pub struct ProjectIndex {
    directory: PathBuf,
    projects: ObservableMap<String, Project>,
}

impl ProjectIndex {
    pub fn new(directory: PathBuf) -> Self {
        ProjectIndex { directory, projects: ObservableMap::new() }
    }

    /// Re-scan the directory, parsing any file ending in the project
    /// extension and indexing it by id. Files that fail to parse are
    /// logged and skipped rather than aborting the whole scan.
    pub async fn rescan(&mut self) -> Result<(), CrowdfundError> {
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PROJECT_EXTENSION) {
                continue;
            }
            match Self::load_one(&path).await {
                Ok(project) => found.push(project),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to parse project file"),
            }
        }
        for project in found {
            self.projects.insert(project.id_hex(), project);
        }
        Ok(())
    }

    async fn load_one(path: &Path) -> Result<Project, CrowdfundError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Project::parse(&bytes)?)
    }

    pub fn get(&self, id_hex: &str) -> Option<&Project> {
        self.projects.get(&id_hex.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Project> {
        self.projects.values()
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn mirror(&mut self) -> (Vec<(String, Project)>, tokio::sync::mpsc::UnboundedReceiver<crate::observable::Change<String, Project>>) {
        self.projects.mirror()
    }
}
