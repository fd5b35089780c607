//! Pipeline executor.
//!
//! Drives each job through `queued → transcribing → analyzing → cutting →
//! complete`, publishing progress after every registry update. Stage
//! failures end the job in `error`; they are not returned as `Err`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use sclip_models::{
    AnalysisParams, CacheEntry, Clip, ClipFailure, ErrorKind, Job, JobFailure, JobId, JobParams, JobStatus,
    ProgressEvent, Stage, StageUpdate, Transcript, VideoRef,
};
use sclip_queue::{JobRegistry, ProgressBroadcaster, QueueError};
use sclip_storage::{hash_video_file, AnalysisCache, CacheKey};

use crate::collaborators::{
    cancel_pair, AnalyzeError, Analyzer, CancelHandle, CancelSignal, CutError, Cutter, TranscribeError, Transcriber,
};
use crate::config::WorkerConfig;
use crate::cutter::FfmpegCutter;
use crate::error::{WorkerError, WorkerResult};
use crate::eta::TimeEstimator;
use crate::logging::JobLogger;
use crate::metrics;
use crate::ollama::OllamaAnalyzer;
use crate::whisper::WhisperTranscriber;

/// The three stage implementations an executor drives.
#[derive(Clone)]
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub analyzer: Arc<dyn Analyzer>,
    pub cutter: Arc<dyn Cutter>,
}

impl Collaborators {
    /// Whisper, Ollama and FFmpeg adapters configured from `config`.
    pub fn from_config(config: &WorkerConfig) -> WorkerResult<Self> {
        Ok(Self {
            transcriber: Arc::new(WhisperTranscriber::from_config(config)),
            analyzer: Arc::new(OllamaAnalyzer::from_config(config)?),
            cutter: Arc::new(FfmpegCutter::from_config(config)),
        })
    }
}

/// Result of one collaborator's preflight check.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyStatus {
    pub name: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Runs jobs from the registry through the pipeline.
pub struct PipelineExecutor {
    registry: Arc<JobRegistry>,
    broadcaster: Arc<ProgressBroadcaster>,
    cache: AnalysisCache,
    collaborators: Collaborators,
    estimator: TimeEstimator,
    job_slots: Arc<Semaphore>,
    cut_slots: Arc<Semaphore>,
    cancels: std::sync::Mutex<HashMap<JobId, CancelHandle>>,
    job_timeout: Option<Duration>,
    running: AtomicUsize,
}

impl PipelineExecutor {
    pub fn new(
        config: &WorkerConfig,
        registry: Arc<JobRegistry>,
        broadcaster: Arc<ProgressBroadcaster>,
        cache: AnalysisCache,
        collaborators: Collaborators,
    ) -> Self {
        info!(
            "Creating pipeline executor with {} max concurrent jobs, {} cut processes",
            config.max_concurrent_jobs, config.max_cut_processes
        );
        Self {
            registry,
            broadcaster,
            cache,
            collaborators,
            estimator: TimeEstimator::new(config.stage_weights, config.baseline_total),
            job_slots: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            cut_slots: Arc::new(Semaphore::new(config.max_cut_processes.max(1))),
            cancels: std::sync::Mutex::new(HashMap::new()),
            job_timeout: config.job_timeout,
            running: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.broadcaster
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    /// Number of jobs holding a worker slot.
    pub fn running_jobs(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }

    fn cancels(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, CancelHandle>> {
        self.cancels.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---------------------------------------------------------------------
    // Entry points
    // ---------------------------------------------------------------------

    /// Check every collaborator, report all failures together.
    pub async fn preflight(&self) -> WorkerResult<()> {
        let failures: Vec<String> = self
            .dependency_report()
            .await
            .into_iter()
            .filter(|s| !s.ok)
            .map(|s| format!("{}: {}", s.name, s.detail.unwrap_or_default()))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(WorkerError::dependency(failures.join("; ")))
        }
    }

    /// Per-collaborator availability.
    pub async fn dependency_report(&self) -> Vec<DependencyStatus> {
        let (t, a, c) = tokio::join!(
            self.collaborators.transcriber.check(),
            self.collaborators.analyzer.check(),
            self.collaborators.cutter.check(),
        );
        [("transcriber", t), ("analyzer", a), ("cutter", c)]
            .into_iter()
            .map(|(name, result)| DependencyStatus {
                name,
                ok: result.is_ok(),
                detail: result.err(),
            })
            .collect()
    }

    /// Preflight, register, and submit a new job.
    pub async fn start_job(self: &Arc<Self>, video: VideoRef, params: JobParams) -> WorkerResult<JobId> {
        self.preflight().await?;
        let job_id = self.registry.create(video, params).await?;
        metrics::record_job_started(false);
        self.submit(&job_id).await?;
        Ok(job_id)
    }

    /// Run a queued job in the background.
    pub async fn submit(self: &Arc<Self>, job_id: &JobId) -> WorkerResult<JoinHandle<WorkerResult<Job>>> {
        let signal = self.prepare(job_id).await?;
        let this = Arc::clone(self);
        let job_id = job_id.clone();
        Ok(tokio::spawn(async move { this.execute(&job_id, signal, None).await }))
    }

    /// Run a queued job in the background, starting from an existing transcript.
    pub async fn submit_with_transcript(
        self: &Arc<Self>,
        job_id: &JobId,
        transcript: Transcript,
    ) -> WorkerResult<JoinHandle<WorkerResult<Job>>> {
        let signal = self.prepare(job_id).await?;
        let this = Arc::clone(self);
        let job_id = job_id.clone();
        Ok(tokio::spawn(async move { this.execute(&job_id, signal, Some(transcript)).await }))
    }

    /// Run a queued job to its terminal state.
    ///
    /// Returns the final job record, complete or failed. `Err` means the job
    /// could not be started at all.
    pub async fn run(&self, job_id: &JobId) -> WorkerResult<Job> {
        let signal = self.prepare(job_id).await?;
        self.execute(job_id, signal, None).await
    }

    /// Like [`run`](Self::run), skipping transcription.
    pub async fn run_with_transcript(&self, job_id: &JobId, transcript: Transcript) -> WorkerResult<Job> {
        let signal = self.prepare(job_id).await?;
        self.execute(job_id, signal, Some(transcript)).await
    }

    /// Re-run analysis and cutting for a finished job with new parameters.
    ///
    /// Creates a new job that reuses the stored transcript.
    pub async fn reanalyze(self: &Arc<Self>, job_id: &JobId, params: JobParams) -> WorkerResult<JobId> {
        let source = self.registry.get(job_id).await?;
        let transcript = source
            .transcript
            .ok_or_else(|| WorkerError::NoTranscript(job_id.to_string()))?;
        let new_id = self.registry.create(source.video, params).await?;
        info!(job_id = %new_id, source_job = %job_id, "Re-analyzing from stored transcript");
        metrics::record_job_started(true);
        self.submit_with_transcript(&new_id, transcript).await?;
        Ok(new_id)
    }

    /// Request cancellation.
    ///
    /// A submitted job stops at its next check. A queued job that was never
    /// submitted fails immediately and can no longer be run. Returns `false`
    /// for finished jobs.
    pub async fn cancel(&self, job_id: &JobId) -> WorkerResult<bool> {
        {
            let mut cancels = self.cancels();
            if let Some(handle) = cancels.get(job_id) {
                info!(job_id = %job_id, "Cancellation requested");
                handle.cancel();
                return Ok(true);
            }
            // A tripped handle keeps `prepare` out until the job is failed
            let (handle, _) = cancel_pair();
            handle.cancel();
            cancels.insert(job_id.clone(), handle);
        }

        let result = self.cancel_unsubmitted(job_id).await;
        self.cancels().remove(job_id);
        result
    }

    async fn cancel_unsubmitted(&self, job_id: &JobId) -> WorkerResult<bool> {
        let failure = JobFailure::new(ErrorKind::Cancelled, "Cancelled");
        let job = self
            .registry
            .update(job_id, |job| {
                if job.is_terminal() {
                    return Ok(None);
                }
                job.fail(failure.kind, failure.message.clone())?;
                Ok(Some(job.clone()))
            })
            .await?;

        let Some(job) = job else {
            return Ok(false);
        };
        info!(job_id = %job_id, "Cancelled job that was never submitted");
        self.record_failure(&job, failure.kind);
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Job lifecycle
    // ---------------------------------------------------------------------

    /// Register the job's cancellation flag, then check the job is runnable.
    async fn prepare(&self, job_id: &JobId) -> WorkerResult<CancelSignal> {
        let signal = {
            let mut cancels = self.cancels();
            match cancels.get(job_id) {
                Some(handle) if handle.is_cancelled() => {
                    return Err(WorkerError::Queue(QueueError::rejected(format!(
                        "job {} is being cancelled",
                        job_id
                    ))));
                }
                Some(_) => return Err(WorkerError::AlreadyRunning(job_id.to_string())),
                None => {}
            }
            let (handle, signal) = cancel_pair();
            cancels.insert(job_id.clone(), handle);
            signal
        };

        let status = self.registry.get(job_id).await.map(|job| job.status);
        match status {
            Ok(JobStatus::Queued) => Ok(signal),
            Ok(status) => {
                self.cancels().remove(job_id);
                Err(WorkerError::Queue(QueueError::rejected(format!(
                    "job {} is {}, not queued",
                    job_id, status
                ))))
            }
            Err(e) => {
                self.cancels().remove(job_id);
                Err(e.into())
            }
        }
    }

    async fn execute(&self, job_id: &JobId, signal: CancelSignal, transcript: Option<Transcript>) -> WorkerResult<Job> {
        let operation = if transcript.is_some() { "resume" } else { "pipeline" };
        let logger = JobLogger::new(job_id, operation);
        let span = logger.create_span();

        let result = self
            .execute_inner(job_id, &signal, transcript, &logger)
            .instrument(span)
            .await;
        self.cancels().remove(job_id);
        result
    }

    async fn execute_inner(
        &self,
        job_id: &JobId,
        signal: &CancelSignal,
        transcript: Option<Transcript>,
        logger: &JobLogger,
    ) -> WorkerResult<Job> {
        let Some(_permit) = self.acquire(&self.job_slots, signal).await else {
            logger.log_warning("cancelled while queued");
            return self.finish_failed(job_id, &JobFailure::new(ErrorKind::Cancelled, "Cancelled")).await;
        };
        metrics::set_jobs_running(self.running.fetch_add(1, Ordering::Relaxed) + 1);
        logger.log_start("worker slot acquired");

        let mut pending_save = None;
        let outcome = {
            let pipeline = self.pipeline(job_id, signal, transcript, logger, &mut pending_save);
            tokio::pin!(pipeline);
            match self.job_timeout {
                Some(limit) => tokio::select! {
                    r = &mut pipeline => r,
                    _ = tokio::time::sleep(limit) => {
                        logger.log_warning(&format!("timed out after {}s, cancelling", limit.as_secs()));
                        if let Some(handle) = self.cancels().get(job_id) {
                            handle.cancel();
                        }
                        pipeline.await
                    }
                },
                None => pipeline.await,
            }
        };

        // The cache write must land before subscribers see the end of the job
        if let Some(save) = pending_save {
            if let Err(e) = save.await {
                warn!(job_id = %job_id, "Cache save task failed: {}", e);
            }
        }

        let result = match outcome {
            Ok((results, warnings)) => self.finish_complete(job_id, results, warnings, logger).await,
            Err(WorkerError::JobFailed(failure)) => {
                logger.log_error(&failure.to_string());
                self.finish_failed(job_id, &failure).await
            }
            Err(e) => {
                // Infrastructure failure mid-stage: attribute it to that stage
                let stage = self.registry.get(job_id).await.ok().and_then(|j| j.current_stage());
                let kind = stage.map(stage_failure_kind).unwrap_or(ErrorKind::TranscriptionFailed);
                logger.log_error(&e.to_string());
                self.finish_failed(job_id, &JobFailure::new(kind, e.to_string())).await
            }
        };

        metrics::set_jobs_running(self.running.fetch_sub(1, Ordering::Relaxed).saturating_sub(1));
        result
    }

    /// The three stages. Returns cut clips and per-clip failures.
    async fn pipeline(
        &self,
        job_id: &JobId,
        signal: &CancelSignal,
        transcript: Option<Transcript>,
        logger: &JobLogger,
        pending_save: &mut Option<JoinHandle<()>>,
    ) -> WorkerResult<(Vec<Clip>, Vec<ClipFailure>)> {
        let job = self.registry.get(job_id).await?;
        let video = job.video.clone();
        let params = job.params.clone();

        let transcript = match transcript {
            Some(transcript) => {
                logger.log_progress("resuming from stored transcript");
                self.registry
                    .update(job_id, |job| {
                        store_transcript(job, &transcript);
                        Ok(())
                    })
                    .await?;
                transcript
            }
            None => self.transcribe(job_id, &video, signal, logger).await?,
        };

        let clips = self
            .analyze(job_id, &video, &params, &transcript, signal, logger, pending_save)
            .await?;

        self.cut(job_id, &video, &clips, signal, logger).await
    }

    async fn transcribe(
        &self,
        job_id: &JobId,
        video: &VideoRef,
        signal: &CancelSignal,
        logger: &JobLogger,
    ) -> WorkerResult<Transcript> {
        check_cancelled(signal)?;
        self.advance(job_id, Stage::Transcribing, StageUpdate::Transcribing, "Transcribing audio")
            .await?;
        logger.log_stage(Stage::Transcribing, &video.to_string());

        check_cancelled(signal)?;
        let transcript = self
            .collaborators
            .transcriber
            .transcribe(video, signal.clone())
            .await
            .map_err(|e| match e {
                TranscribeError::Cancelled => cancelled(),
                other => WorkerError::job_failed(ErrorKind::TranscriptionFailed, other.to_string()),
            })?;

        if transcript.is_empty() {
            return Err(WorkerError::job_failed(
                ErrorKind::TranscriptionFailed,
                "Transcript is empty",
            ));
        }

        let message = format!("Transcribed {} characters", transcript.char_len());
        self.registry
            .update(job_id, |job| {
                store_transcript(job, &transcript);
                Ok(())
            })
            .await?;
        self.report(job_id, StageUpdate::Transcribing, Stage::Transcribing, 1.0, message)
            .await?;
        Ok(transcript)
    }

    #[allow(clippy::too_many_arguments)]
    async fn analyze(
        &self,
        job_id: &JobId,
        video: &VideoRef,
        params: &JobParams,
        transcript: &Transcript,
        signal: &CancelSignal,
        logger: &JobLogger,
        pending_save: &mut Option<JoinHandle<()>>,
    ) -> WorkerResult<Vec<Clip>> {
        check_cancelled(signal)?;
        self.advance(
            job_id,
            Stage::Analyzing,
            StageUpdate::Analyzing { cache_hit: false },
            "Analyzing transcript",
        )
        .await?;
        logger.log_stage(Stage::Analyzing, &format!("profile {}", params.profile));

        let transcript_len = transcript.char_len();
        let key = match hash_video_file(video.path()).await {
            Ok(hash) => Some(AnalysisCache::key(
                &hash,
                &params.context,
                params.topics.as_slice(),
                params.profile,
                transcript_len,
            )),
            Err(e) => {
                logger.log_warning(&format!("cannot hash video, bypassing analysis cache: {}", e));
                None
            }
        };

        if let Some(key) = &key {
            if let Some(entry) = self.cache.load(key).await {
                let clips = normalize_clips(entry.clips, &params.topics, logger);
                if !clips.is_empty() {
                    metrics::record_cache_lookup(true);
                    self.registry
                        .update(job_id, |job| {
                            job.cache_hit = true;
                            Ok(())
                        })
                        .await?;
                    self.report(
                        job_id,
                        StageUpdate::Analyzing { cache_hit: true },
                        Stage::Analyzing,
                        1.0,
                        format!("Using cached analysis ({} clips)", clips.len()),
                    )
                    .await?;
                    return Ok(clips);
                }
            }
            metrics::record_cache_lookup(false);
        }

        check_cancelled(signal)?;
        let raw = self
            .collaborators
            .analyzer
            .analyze(transcript, params, signal.clone())
            .await
            .map_err(|e| match e {
                AnalyzeError::Cancelled => cancelled(),
                other => WorkerError::job_failed(ErrorKind::AnalysisFailed, other.to_string()),
            })?;

        let clips = normalize_clips(raw, &params.topics, logger);
        if clips.is_empty() {
            return Err(WorkerError::job_failed(ErrorKind::AnalysisFailed, "No relevant clips found"));
        }

        if let Some(key) = key {
            *pending_save = Some(self.spawn_cache_save(key, job_id, video, params, transcript_len, &clips));
        }

        self.report(
            job_id,
            StageUpdate::Analyzing { cache_hit: false },
            Stage::Analyzing,
            1.0,
            format!("Found {} clips", clips.len()),
        )
        .await?;
        Ok(clips)
    }

    fn spawn_cache_save(
        &self,
        key: CacheKey,
        job_id: &JobId,
        video: &VideoRef,
        params: &JobParams,
        transcript_len: usize,
        clips: &[Clip],
    ) -> JoinHandle<()> {
        let cache = self.cache.clone();
        let entry = CacheEntry::new(
            key.as_str(),
            job_id.clone(),
            video.clone(),
            AnalysisParams::from(params),
            transcript_len,
            clips.to_vec(),
        );
        let job_id = job_id.clone();
        tokio::spawn(async move {
            match cache.save(&entry).await {
                Ok(()) => debug!(job_id = %job_id, cache_key = %key, "Analysis cached"),
                Err(e) => warn!(job_id = %job_id, cache_key = %key, "Failed to cache analysis: {}", e),
            }
        })
    }

    async fn cut(
        &self,
        job_id: &JobId,
        video: &VideoRef,
        clips: &[Clip],
        signal: &CancelSignal,
        logger: &JobLogger,
    ) -> WorkerResult<(Vec<Clip>, Vec<ClipFailure>)> {
        let total = clips.len() as u32;
        check_cancelled(signal)?;
        self.advance(
            job_id,
            Stage::Cutting,
            StageUpdate::Cutting {
                clips_done: 0,
                clips_total: total,
            },
            format!("Cutting {} clips", total),
        )
        .await?;
        logger.log_stage(Stage::Cutting, &format!("{} clips", total));

        let mut results = Vec::with_capacity(clips.len());
        let mut warnings = Vec::new();

        for (done, clip) in (0u32..).zip(clips) {
            check_cancelled(signal)?;
            let Some(_permit) = self.acquire(&self.cut_slots, signal).await else {
                return Err(cancelled());
            };

            self.report(
                job_id,
                StageUpdate::Cutting {
                    clips_done: done,
                    clips_total: total,
                },
                Stage::Cutting,
                f64::from(done) / f64::from(total),
                format!("Cutting clip {}/{}: {}", done + 1, total, clip.title),
            )
            .await?;

            check_cancelled(signal)?;
            match self.collaborators.cutter.cut(job_id, video, clip, signal.clone()).await {
                Ok(output) => {
                    results.push(clip.with_output(output.file_path.to_string_lossy(), output.file_size));
                }
                Err(CutError::Cancelled) => return Err(cancelled()),
                Err(e) => {
                    metrics::record_clip_failed();
                    logger.log_warning(&format!("clip {} failed: {}", clip.segment_id, e));
                    warnings.push(ClipFailure {
                        segment_id: clip.segment_id,
                        title: clip.title.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if results.is_empty() {
            return Err(WorkerError::job_failed(
                ErrorKind::CuttingFailed,
                format!("All {} clips failed to cut", total),
            ));
        }

        self.report(
            job_id,
            StageUpdate::Cutting {
                clips_done: total,
                clips_total: total,
            },
            Stage::Cutting,
            1.0,
            format!("Cut {} of {} clips", results.len(), total),
        )
        .await?;
        Ok((results, warnings))
    }

    // ---------------------------------------------------------------------
    // Progress reporting
    // ---------------------------------------------------------------------

    /// Move the job into `stage` and publish the transition.
    async fn advance(
        &self,
        job_id: &JobId,
        stage: Stage,
        update: StageUpdate,
        message: impl Into<String>,
    ) -> WorkerResult<()> {
        let message = message.into();
        let progress = self.estimator.overall_progress(stage, 0.0);
        let job = self
            .registry
            .update(job_id, |job| {
                job.transition(stage.status())?;
                job.set_progress(progress, message.clone());
                track_clip_counts(job, &update);
                Ok(job.clone())
            })
            .await?;
        self.publish(&job, update, Some(stage), 0.0);
        Ok(())
    }

    /// Record progress within `stage` and publish it.
    async fn report(
        &self,
        job_id: &JobId,
        update: StageUpdate,
        stage: Stage,
        stage_progress: f64,
        message: impl Into<String>,
    ) -> WorkerResult<()> {
        let message = message.into();
        let progress = self.estimator.overall_progress(stage, stage_progress);
        let job = self
            .registry
            .update(job_id, |job| {
                job.set_progress(progress, message.clone());
                track_clip_counts(job, &update);
                Ok(job.clone())
            })
            .await?;
        self.publish(&job, update, Some(stage), stage_progress);
        Ok(())
    }

    fn publish(&self, job: &Job, update: StageUpdate, stage: Option<Stage>, stage_progress: f64) {
        let time_info = self.estimator.estimate(&job.timings, stage, stage_progress, Utc::now());
        let event = ProgressEvent::new(job.id.clone(), update, job.progress, job.message.clone())
            .with_time_info(time_info)
            .at(job.updated_at);
        self.broadcaster.publish(&job.id, event);
    }

    async fn finish_complete(
        &self,
        job_id: &JobId,
        results: Vec<Clip>,
        warnings: Vec<ClipFailure>,
        logger: &JobLogger,
    ) -> WorkerResult<Job> {
        let total = results.len() + warnings.len();
        let message = if warnings.is_empty() {
            format!("Complete: {} clips", results.len())
        } else {
            format!("Complete: {} of {} clips ({} failed)", results.len(), total, warnings.len())
        };

        let job = self
            .registry
            .update(job_id, |job| {
                job.complete(results.clone(), warnings.clone())?;
                job.message = message.clone();
                Ok(job.clone())
            })
            .await?;

        record_stage_metrics(&job);
        metrics::record_job_completed(results.len());
        logger.log_completion(&message);

        self.publish(&job, StageUpdate::Complete { results, warnings }, None, 1.0);
        Ok(job)
    }

    async fn finish_failed(&self, job_id: &JobId, failure: &JobFailure) -> WorkerResult<Job> {
        let job = self
            .registry
            .update(job_id, |job| {
                job.fail(failure.kind, failure.message.clone())?;
                Ok(job.clone())
            })
            .await?;

        self.record_failure(&job, failure.kind);
        Ok(job)
    }

    fn record_failure(&self, job: &Job, kind: ErrorKind) {
        record_stage_metrics(job);
        metrics::record_job_failed(kind);
        self.publish(job, StageUpdate::Error { kind }, None, 0.0);
    }

    /// Wait for a permit unless the job is cancelled first.
    async fn acquire(&self, slots: &Arc<Semaphore>, signal: &CancelSignal) -> Option<OwnedSemaphorePermit> {
        if signal.is_cancelled() {
            return None;
        }
        tokio::select! {
            permit = Arc::clone(slots).acquire_owned() => permit.ok(),
            _ = signal.cancelled() => None,
        }
    }
}

fn cancelled() -> WorkerError {
    WorkerError::job_failed(ErrorKind::Cancelled, "Cancelled")
}

fn check_cancelled(signal: &CancelSignal) -> WorkerResult<()> {
    if signal.is_cancelled() {
        Err(cancelled())
    } else {
        Ok(())
    }
}

fn track_clip_counts(job: &mut Job, update: &StageUpdate) {
    if let StageUpdate::Cutting {
        clips_done,
        clips_total,
    } = update
    {
        job.set_clip_counts(*clips_done, *clips_total);
    }
}

/// Finished jobs keep whatever transcript they ended with.
fn store_transcript(job: &mut Job, transcript: &Transcript) {
    if !job.is_terminal() {
        job.transcript = Some(transcript.clone());
    }
}

fn stage_failure_kind(stage: Stage) -> ErrorKind {
    match stage {
        Stage::Transcribing => ErrorKind::TranscriptionFailed,
        Stage::Analyzing => ErrorKind::AnalysisFailed,
        Stage::Cutting => ErrorKind::CuttingFailed,
    }
}

/// Drop invalid clips, clear file fields, and renumber from 1.
///
/// Clip topics are narrowed to the job's topics, matched without regard to
/// case or surrounding whitespace and spelled as the job spells them.
fn normalize_clips(clips: Vec<Clip>, job_topics: &[String], logger: &JobLogger) -> Vec<Clip> {
    clips
        .into_iter()
        .filter(|clip| match clip.validate() {
            Ok(()) => true,
            Err(e) => {
                logger.log_warning(&format!("dropping clip '{}': {}", clip.title, e));
                false
            }
        })
        .zip(1u32..)
        .map(|(clip, segment_id)| Clip {
            segment_id,
            duration: clip.end_time - clip.start_time,
            topics: job_topics_of(&clip.topics, job_topics),
            file_path: None,
            file_size: None,
            ..clip
        })
        .collect()
}

fn job_topics_of(clip_topics: &[String], job_topics: &[String]) -> Vec<String> {
    let mut matched: Vec<String> = Vec::new();
    for topic in clip_topics {
        let wanted = topic.trim();
        let found = job_topics.iter().find(|t| t.trim().eq_ignore_ascii_case(wanted));
        if let Some(found) = found.map(|t| t.trim()) {
            if !matched.iter().any(|m| m == found) {
                matched.push(found.to_string());
            }
        }
    }
    matched
}

fn record_stage_metrics(job: &Job) {
    for stage in Stage::ALL {
        let span = job.timings.get(stage);
        if let (false, Some(secs)) = (span.skipped, span.duration_secs()) {
            metrics::record_stage_duration(stage, secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CutOutput, MockAnalyzer, MockCutter, MockTranscriber};
    use sclip_models::{OutputProfile, TranscriptSegment};
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        video: VideoRef,
        registry: Arc<JobRegistry>,
        broadcaster: Arc<ProgressBroadcaster>,
        cache: AnalysisCache,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let video_path = dir.path().join("cooking.mp4");
        tokio::fs::write(&video_path, b"fake video bytes").await.unwrap();
        let cache = AnalysisCache::open(dir.path().join("cache")).await.unwrap();
        Harness {
            video: VideoRef::new(video_path),
            _dir: dir,
            registry: Arc::new(JobRegistry::new()),
            broadcaster: Arc::new(ProgressBroadcaster::default()),
            cache,
        }
    }

    fn params() -> JobParams {
        JobParams::new("cooking tutorial", vec!["knife skills".into()], OutputProfile::Social)
    }

    fn transcript() -> Transcript {
        Transcript::new(
            "Hold the knife like this and rock the blade.",
            vec![TranscriptSegment {
                start: 0.0,
                end: 4.0,
                text: "Hold the knife like this and rock the blade.".into(),
            }],
        )
    }

    fn clips(n: u32) -> Vec<Clip> {
        (0..n)
            .map(|i| {
                let start = f64::from(i) * 30.0;
                Clip::new(0, format!("Clip {}", i + 1), "", start, start + 20.0, 0.9, vec![]).unwrap()
            })
            .collect()
    }

    fn ok_transcriber() -> MockTranscriber {
        let mut t = MockTranscriber::new();
        t.expect_transcribe().returning(|_, _| Ok(transcript()));
        t.expect_check().returning(|| Ok(()));
        t
    }

    fn ok_analyzer(n: u32) -> MockAnalyzer {
        let mut a = MockAnalyzer::new();
        a.expect_analyze().returning(move |_, _, _| Ok(clips(n)));
        a.expect_check().returning(|| Ok(()));
        a
    }

    fn cutter_failing(segments: &'static [u32]) -> MockCutter {
        let mut c = MockCutter::new();
        c.expect_cut().returning(move |_, _, clip, _| {
            if segments.contains(&clip.segment_id) {
                Err(CutError::Encoding("exit status 1".into()))
            } else {
                Ok(CutOutput {
                    file_path: PathBuf::from(format!("/out/clip_{:03}.mp4", clip.segment_id)),
                    file_size: 1024,
                })
            }
        });
        c.expect_check().returning(|| Ok(()));
        c
    }

    fn executor(h: &Harness, t: MockTranscriber, a: MockAnalyzer, c: MockCutter) -> Arc<PipelineExecutor> {
        Arc::new(PipelineExecutor::new(
            &WorkerConfig::default(),
            h.registry.clone(),
            h.broadcaster.clone(),
            h.cache.clone(),
            Collaborators {
                transcriber: Arc::new(t),
                analyzer: Arc::new(a),
                cutter: Arc::new(c),
            },
        ))
    }

    #[tokio::test]
    async fn test_full_run_completes() {
        let h = harness().await;
        let exec = executor(&h, ok_transcriber(), ok_analyzer(3), cutter_failing(&[]));
        let id = h.registry.create(h.video.clone(), params()).await.unwrap();

        let job = exec.run(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.progress, 1.0);
        let results = job.results.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(
            results.iter().map(|c| c.segment_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(results.iter().all(|c| c.is_cut()));
        assert!(job.transcript.is_some());
        assert_eq!((job.clips_done, job.clips_total), (3, 3));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_analyzer() {
        let h = harness().await;
        let first = executor(&h, ok_transcriber(), ok_analyzer(3), cutter_failing(&[]));
        let id = h.registry.create(h.video.clone(), params()).await.unwrap();
        first.run(&id).await.unwrap();

        let mut analyzer = MockAnalyzer::new();
        analyzer.expect_analyze().times(0);
        let second = executor(&h, ok_transcriber(), analyzer, cutter_failing(&[]));
        let id = h.registry.create(h.video.clone(), params()).await.unwrap();

        let job = second.run(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert!(job.cache_hit);
        assert_eq!(job.results.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_partial_cut_failure_completes_with_warnings() {
        let h = harness().await;
        let exec = executor(&h, ok_transcriber(), ok_analyzer(5), cutter_failing(&[2, 4]));
        let id = h.registry.create(h.video.clone(), params()).await.unwrap();

        let job = exec.run(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        let ids: Vec<u32> = job.results.unwrap().iter().map(|c| c.segment_id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
        assert_eq!(job.warnings.len(), 2);
        assert_eq!(job.warnings[0].segment_id, 2);
    }

    #[tokio::test]
    async fn test_all_cuts_failing_is_cutting_failed() {
        let h = harness().await;
        let exec = executor(&h, ok_transcriber(), ok_analyzer(5), cutter_failing(&[1, 2, 3, 4, 5]));
        let id = h.registry.create(h.video.clone(), params()).await.unwrap();

        let job = exec.run(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.unwrap().kind, ErrorKind::CuttingFailed);
        assert!(job.results.is_none());
    }

    #[tokio::test]
    async fn test_transcription_failure() {
        let h = harness().await;
        let mut t = MockTranscriber::new();
        t.expect_transcribe()
            .returning(|_, _| Err(TranscribeError::ModelNotFound("medium".into())));
        let mut a = MockAnalyzer::new();
        a.expect_analyze().times(0);
        let exec = executor(&h, t, a, cutter_failing(&[]));
        let id = h.registry.create(h.video.clone(), params()).await.unwrap();

        let job = exec.run(&id).await.unwrap();
        assert_eq!(job.error.unwrap().kind, ErrorKind::TranscriptionFailed);
    }

    #[tokio::test]
    async fn test_empty_analysis_is_not_cached() {
        let h = harness().await;
        let exec = executor(&h, ok_transcriber(), ok_analyzer(0), cutter_failing(&[]));
        let id = h.registry.create(h.video.clone(), params()).await.unwrap();

        let job = exec.run(&id).await.unwrap();
        let failure = job.error.unwrap();
        assert_eq!(failure.kind, ErrorKind::AnalysisFailed);
        assert!(failure.message.contains("No relevant clips"));
        assert!(h.cache.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_transcription_stops_pipeline() {
        let h = harness().await;
        let mut t = MockTranscriber::new();
        t.expect_transcribe().returning(|_, _| Err(TranscribeError::Cancelled));
        let mut a = MockAnalyzer::new();
        a.expect_analyze().times(0);
        let mut c = MockCutter::new();
        c.expect_cut().times(0);
        let exec = executor(&h, t, a, c);
        let id = h.registry.create(h.video.clone(), params()).await.unwrap();

        let job = exec.run(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_unsubmitted_job() {
        let h = harness().await;
        let exec = executor(&h, MockTranscriber::new(), MockAnalyzer::new(), MockCutter::new());
        let id = h.registry.create(h.video.clone(), params()).await.unwrap();

        assert!(exec.cancel(&id).await.unwrap());
        let job = h.registry.get(&id).await.unwrap();
        assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);
        assert!(!exec.cancel(&id).await.unwrap());
        assert!(exec.run(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_resume_skips_transcription() {
        let h = harness().await;
        let mut t = MockTranscriber::new();
        t.expect_transcribe().times(0);
        let exec = executor(&h, t, ok_analyzer(2), cutter_failing(&[]));
        let id = h.registry.create(h.video.clone(), params()).await.unwrap();

        let job = exec.run_with_transcript(&id, transcript()).await.unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert!(job.timings.transcribing.skipped);
        assert_eq!(job.results.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_terminal() {
        let h = harness().await;
        let exec = executor(&h, ok_transcriber(), ok_analyzer(5), cutter_failing(&[3]));
        let id = h.registry.create(h.video.clone(), params()).await.unwrap();
        let mut sub = h.broadcaster.subscribe(&id);

        exec.run(&id).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = sub.recv().await {
            events.push(event);
        }
        assert!(events.windows(2).all(|w| w[1].progress >= w[0].progress));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        let last = events.last().unwrap();
        assert_eq!(last.status(), JobStatus::Complete);
        assert!(matches!(&last.update, StageUpdate::Complete { warnings, .. } if warnings.len() == 1));
        assert!(events.iter().all(|e| e.time_info.as_ref().map_or(false, |t| t.remaining >= 0.0)));
    }

    #[tokio::test]
    async fn test_preflight_reports_missing_dependencies() {
        let h = harness().await;
        let mut t = MockTranscriber::new();
        t.expect_check().returning(|| Err("whisper not found".into()));
        let mut a = MockAnalyzer::new();
        a.expect_check().returning(|| Ok(()));
        let mut c = MockCutter::new();
        c.expect_check().returning(|| Err("ffmpeg not found".into()));
        let exec = executor(&h, t, a, c);

        let err = exec.preflight().await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("whisper not found"));
        assert!(message.contains("ffmpeg not found"));

        let result = exec.start_job(h.video.clone(), params()).await;
        assert!(matches!(result, Err(WorkerError::Dependency(_))));
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_reanalyze_requires_transcript() {
        let h = harness().await;
        let exec = executor(&h, MockTranscriber::new(), MockAnalyzer::new(), MockCutter::new());
        let id = h.registry.create(h.video.clone(), params()).await.unwrap();
        let err = exec.reanalyze(&id, params()).await.unwrap_err();
        assert!(matches!(err, WorkerError::NoTranscript(_)));
    }

    #[test]
    fn test_normalize_drops_invalid_and_renumbers() {
        let logger = JobLogger::new(&JobId::new(), "test");
        let mut input = clips(3);
        input[1].end_time = input[1].start_time;
        let out = normalize_clips(input, &[], &logger);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].segment_id, 1);
        assert_eq!(out[1].segment_id, 2);
        assert_eq!(out[1].title, "Clip 3");
    }

    #[test]
    fn test_normalize_keeps_only_job_topics() {
        let logger = JobLogger::new(&JobId::new(), "test");
        let mut input = clips(2);
        input[0].topics = vec![" knife SKILLS ".into(), "Baking".into(), "Knife Skills".into()];
        input[1].topics = vec!["plating".into()];
        let job_topics = vec!["Knife Skills".to_string(), "Plating".to_string()];

        let out = normalize_clips(input, &job_topics, &logger);
        assert_eq!(out[0].topics, vec!["Knife Skills"]);
        assert_eq!(out[1].topics, vec!["Plating"]);
    }

    #[tokio::test]
    async fn test_results_never_carry_foreign_topics() {
        let h = harness().await;
        let mut a = MockAnalyzer::new();
        a.expect_analyze().returning(|_, _, _| {
            let mut out = clips(2);
            out[0].topics = vec!["knife skills".into(), "Baking".into()];
            out[1].topics = vec!["Sourdough".into()];
            Ok(out)
        });
        a.expect_check().returning(|| Ok(()));
        let exec = executor(&h, ok_transcriber(), a, cutter_failing(&[]));
        let params = JobParams::new("cooking tutorial", vec!["Knife Skills".into()], OutputProfile::Social);
        let id = h.registry.create(h.video.clone(), params).await.unwrap();

        let job = exec.run(&id).await.unwrap();
        let results = job.results.unwrap();
        assert_eq!(results[0].topics, vec!["Knife Skills"]);
        assert!(results[1].topics.is_empty());
        let cached = h.cache.list().await.unwrap();
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_run_keeps_job_from_starting() {
        let h = harness().await;
        let mut t = MockTranscriber::new();
        t.expect_transcribe().times(0);
        let exec = executor(&h, t, MockAnalyzer::new(), MockCutter::new());
        let id = h.registry.create(h.video.clone(), params()).await.unwrap();

        let (cancelled, run) = tokio::join!(exec.cancel(&id), exec.run(&id));
        assert!(cancelled.unwrap());
        assert!(matches!(run, Err(WorkerError::Queue(_))));

        let job = h.registry.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);
        assert!(job.transcript.is_none());
        assert!(exec.cancels().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_racing_a_started_run_ends_cancelled() {
        let h = harness().await;
        let exec = executor(&h, ok_transcriber(), ok_analyzer(3), cutter_failing(&[]));
        let id = h.registry.create(h.video.clone(), params()).await.unwrap();

        let (run, cancelled) = tokio::join!(exec.run(&id), exec.cancel(&id));
        assert!(cancelled.unwrap());
        let job = run.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);
        assert!(job.results.is_none());
        assert!(exec.cancels().is_empty());
    }
}
