//! Concurrency-safe job table.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use sclip_models::{Job, JobId, JobParams, VideoRef};

use crate::error::{QueueError, QueueResult};

/// Table of job records, the single source of truth for job state.
///
/// Each job sits behind its own lock so updates to one id are linearizable
/// while updates to different ids run in parallel. The outer map lock is
/// only held to look up or insert entries.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<Job>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate parameters and register a queued job.
    pub async fn create(&self, video: VideoRef, params: JobParams) -> QueueResult<JobId> {
        params.check(&video)?;
        let job = Job::new(video, params);
        let id = job.id.clone();

        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&id) {
            return Err(QueueError::rejected(format!("duplicate job id {}", id)));
        }
        info!(job_id = %id, video = %job.video, "Job created");
        jobs.insert(id.clone(), Arc::new(Mutex::new(job)));
        Ok(id)
    }

    async fn slot(&self, id: &JobId) -> QueueResult<Arc<Mutex<Job>>> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::job_not_found(id))
    }

    /// Snapshot of one job.
    pub async fn get(&self, id: &JobId) -> QueueResult<Job> {
        let slot = self.slot(id).await?;
        let job = slot.lock().await;
        Ok(job.clone())
    }

    /// Apply one atomic mutation to a job.
    ///
    /// The mutation runs on a copy that replaces the stored record only when
    /// it returns `Ok`, so a failed mutation leaves no trace.
    pub async fn update<T, F>(&self, id: &JobId, mutation: F) -> QueueResult<T>
    where
        F: FnOnce(&mut Job) -> QueueResult<T>,
    {
        let slot = self.slot(id).await?;
        let mut job = slot.lock().await;
        let mut draft = job.clone();
        let out = mutation(&mut draft)?;
        if draft.status != job.status {
            debug!(job_id = %id, from = %job.status, to = %draft.status, "Job status changed");
        }
        *job = draft;
        Ok(out)
    }

    /// All jobs ordered by creation time, then id.
    pub async fn list(&self) -> Vec<Job> {
        let slots: Vec<Arc<Mutex<Job>>> = self.jobs.read().await.values().cloned().collect();
        let mut jobs = Vec::with_capacity(slots.len());
        for slot in slots {
            jobs.push(slot.lock().await.clone());
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Remove a finished job. Active jobs cannot be removed.
    pub async fn remove(&self, id: &JobId) -> QueueResult<Job> {
        let mut jobs = self.jobs.write().await;
        let slot = jobs.get(id).cloned().ok_or_else(|| QueueError::job_not_found(id))?;
        let job = slot.lock().await.clone();
        if !job.is_terminal() {
            return Err(QueueError::JobActive(id.to_string()));
        }
        jobs.remove(id);
        info!(job_id = %id, "Job removed");
        Ok(job)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sclip_models::{ErrorKind, JobStatus, OutputProfile};

    fn params() -> JobParams {
        JobParams::new("cooking tutorial", vec!["knife skills".into()], OutputProfile::Social)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = JobRegistry::new();
        let id = registry.create(VideoRef::new("/v.mp4"), params()).await.unwrap();
        let job = registry.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.params.context, "cooking tutorial");
    }

    #[tokio::test]
    async fn test_get_unknown_fails() {
        let registry = JobRegistry::new();
        let err = registry.get(&JobId::from_string("missing")).await.unwrap_err();
        assert!(matches!(err, QueueError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_params_never_create() {
        let registry = JobRegistry::new();
        let bad = JobParams::new("", vec!["t".into()], OutputProfile::Social);
        let err = registry.create(VideoRef::new("/v.mp4"), bad).await.unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_no_partial_write() {
        let registry = JobRegistry::new();
        let id = registry.create(VideoRef::new("/v.mp4"), params()).await.unwrap();

        let result: QueueResult<()> = registry
            .update(&id, |job| {
                job.set_progress(0.5, "halfway");
                job.transition(JobStatus::Complete)?;
                job.transition(JobStatus::Transcribing)?;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(QueueError::Transition(_))));

        let job = registry.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0.0);
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_linearizable() {
        let registry = Arc::new(JobRegistry::new());
        let id = registry.create(VideoRef::new("/v.mp4"), params()).await.unwrap();

        let mut handles = Vec::new();
        for i in 1..=50u32 {
            let registry = registry.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .update(&id, |job| {
                        job.set_progress(f64::from(i) / 100.0, format!("step {}", i));
                        Ok(())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(registry.get(&id).await.unwrap().progress, 0.5);
    }

    #[tokio::test]
    async fn test_list_in_creation_order() {
        let registry = JobRegistry::new();
        let a = registry.create(VideoRef::new("/a.mp4"), params()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let b = registry.create(VideoRef::new("/b.mp4"), params()).await.unwrap();

        let ids: Vec<JobId> = registry.list().await.into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[tokio::test]
    async fn test_remove_only_terminal() {
        let registry = JobRegistry::new();
        let id = registry.create(VideoRef::new("/v.mp4"), params()).await.unwrap();
        assert!(matches!(registry.remove(&id).await, Err(QueueError::JobActive(_))));

        registry
            .update(&id, |job| Ok(job.fail(ErrorKind::Cancelled, "Cancelled")?))
            .await
            .unwrap();
        registry.remove(&id).await.unwrap();
        assert!(registry.get(&id).await.is_err());
    }
}
