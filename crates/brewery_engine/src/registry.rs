use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use brewery_core::ProgressSnapshot;

use crate::controller::JobController;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("a job named `{0}` is already registered")]
    DuplicateJob(String),
    #[error("no job named `{0}`")]
    UnknownJob(String),
    #[error("job `{0}` is still running or paused")]
    JobActive(String),
}

/// Named jobs owned by the caller, e.g. one per content source.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<BTreeMap<String, Arc<JobController>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        controller: JobController,
    ) -> Result<Arc<JobController>, RegistryError> {
        let name = name.into();
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&name) {
            return Err(RegistryError::DuplicateJob(name));
        }
        let controller = Arc::new(controller);
        jobs.insert(name, controller.clone());
        Ok(controller)
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobController>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Removes a job that is not running or paused.
    pub fn remove(&self, name: &str) -> Result<Arc<JobController>, RegistryError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let controller = jobs
            .get(name)
            .ok_or_else(|| RegistryError::UnknownJob(name.to_string()))?;
        if controller.state().is_active() {
            return Err(RegistryError::JobActive(name.to_string()));
        }
        jobs.remove(name)
            .ok_or_else(|| RegistryError::UnknownJob(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Snapshots of every job, by name. Does not consume completion flags.
    pub fn statuses(&self) -> BTreeMap<String, ProgressSnapshot> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, controller)| (name.clone(), controller.snapshot()))
            .collect()
    }
}
