// SPDX-FileCopyrightText: 2026 Sonora Contributors
// SPDX-License-Identifier: MIT

//! Ownership of the project files of every open project.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::config::StoreConfig;
use crate::project::ProjectFile;

/// Handle to a project in a [`ProjectRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectId(u64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "project-{}", self.0)
    }
}

/// Maps project handles to the [`ProjectFile`] each one owns.
///
/// Whatever layer needs storage access is handed the registry (or a single
/// `ProjectFile`) explicitly.
#[derive(Debug, Default)]
pub struct ProjectRegistry {
    next_id: u64,
    projects: HashMap<ProjectId, ProjectFile>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh, unopened project file.
    pub fn create(&mut self, config: StoreConfig) -> ProjectId {
        self.insert(ProjectFile::new(config))
    }

    pub fn insert(&mut self, project: ProjectFile) -> ProjectId {
        self.next_id += 1;
        let id = ProjectId(self.next_id);
        self.projects.insert(id, project);
        debug!(%id, "Registered project");
        id
    }

    pub fn get(&self, id: ProjectId) -> Option<&ProjectFile> {
        self.projects.get(&id)
    }

    pub fn get_mut(&mut self, id: ProjectId) -> Option<&mut ProjectFile> {
        self.projects.get_mut(&id)
    }

    /// Remove a project, closing its file.
    pub fn close(&mut self, id: ProjectId) -> bool {
        match self.projects.remove(&id) {
            Some(mut project) => {
                project.close_project();
                debug!(%id, "Closed project");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ProjectId> + '_ {
        self.projects.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            temp_dir: dir.path().to_owned(),
            ..StoreConfig::default()
        };
        let mut registry = ProjectRegistry::new();
        let a = registry.create(config.clone());
        let b = registry.create(config);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        registry.get_mut(a).unwrap().open_project().unwrap();
        let scratch = registry.get(a).unwrap().file_path().unwrap().to_owned();
        assert!(scratch.exists());

        assert!(registry.close(a));
        assert!(!registry.close(a));
        assert!(!scratch.exists());
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec![b]);
    }
}
