//! End-to-end pipeline tests with in-process collaborators.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tempfile::TempDir;
use tokio::sync::Notify;

use sclip_models::{
    Clip, ErrorKind, JobId, JobParams, JobStatus, OutputProfile, ProgressEvent, StageUpdate, Transcript,
    TranscriptSegment, VideoRef,
};
use sclip_queue::{JobRegistry, ProgressBroadcaster};
use sclip_storage::AnalysisCache;
use sclip_worker::{
    AnalyzeError, Analyzer, CancelSignal, Collaborators, CutError, CutOutput, Cutter, PipelineExecutor,
    TranscribeError, Transcriber, WorkerConfig,
};

/// Transcriber that returns a fixed transcript, optionally blocking until cancelled.
#[derive(Default)]
struct FakeTranscriber {
    calls: AtomicUsize,
    block: bool,
    started: Notify,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _video: &VideoRef, cancel: CancelSignal) -> Result<Transcript, TranscribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.block {
            self.started.notify_one();
            cancel.cancelled().await;
            return Err(TranscribeError::Cancelled);
        }
        Ok(Transcript::new(
            "Today we practice knife skills. Hold the knife firmly. Rock the blade.",
            vec![
                TranscriptSegment {
                    start: 0.0,
                    end: 40.0,
                    text: "Today we practice knife skills.".into(),
                },
                TranscriptSegment {
                    start: 40.0,
                    end: 90.0,
                    text: "Hold the knife firmly. Rock the blade.".into(),
                },
            ],
        ))
    }

    async fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Analyzer returning `clip_count` clips.
struct FakeAnalyzer {
    calls: AtomicUsize,
    clip_count: u32,
}

impl FakeAnalyzer {
    fn new(clip_count: u32) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            clip_count,
        }
    }
}

#[async_trait]
impl Analyzer for FakeAnalyzer {
    async fn analyze(
        &self,
        _transcript: &Transcript,
        params: &JobParams,
        _cancel: CancelSignal,
    ) -> Result<Vec<Clip>, AnalyzeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..self.clip_count)
            .map(|i| {
                let start = f64::from(i) * 25.0;
                Clip::new(
                    i + 1,
                    format!("Knife tip {}", i + 1),
                    "A useful moment",
                    start,
                    start + 20.0,
                    0.9 - f64::from(i) * 0.1,
                    params.topics.clone(),
                )
                .unwrap()
            })
            .collect())
    }

    async fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Cutter writing nothing; optionally blocks on its first call until cancelled.
#[derive(Default)]
struct FakeCutter {
    calls: AtomicUsize,
    block: bool,
    started: Notify,
}

#[async_trait]
impl Cutter for FakeCutter {
    async fn cut(
        &self,
        job_id: &JobId,
        _video: &VideoRef,
        clip: &Clip,
        cancel: CancelSignal,
    ) -> Result<CutOutput, CutError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.block {
            self.started.notify_one();
            cancel.cancelled().await;
            return Err(CutError::Cancelled);
        }
        Ok(CutOutput {
            file_path: PathBuf::from(format!("/out/{}/clip_{:03}.mp4", job_id, clip.segment_id)),
            file_size: 4096,
        })
    }

    async fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

struct Fixture {
    _dir: TempDir,
    video: VideoRef,
    registry: Arc<JobRegistry>,
    broadcaster: Arc<ProgressBroadcaster>,
    cache: AnalysisCache,
}

impl Fixture {
    async fn add_video(&self, name: &str, bytes: &[u8]) -> VideoRef {
        let path = self._dir.path().join(name);
        tokio::fs::write(&path, bytes).await.unwrap();
        VideoRef::new(path)
    }
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("cooking.mp4");
    tokio::fs::write(&video, vec![7u8; 4096]).await.unwrap();
    let cache = AnalysisCache::open(dir.path().join("cache")).await.unwrap();
    Fixture {
        video: VideoRef::new(video),
        _dir: dir,
        registry: Arc::new(JobRegistry::new()),
        broadcaster: Arc::new(ProgressBroadcaster::default()),
        cache,
    }
}

fn executor(
    fx: &Fixture,
    config: WorkerConfig,
    transcriber: Arc<FakeTranscriber>,
    analyzer: Arc<FakeAnalyzer>,
    cutter: Arc<FakeCutter>,
) -> Arc<PipelineExecutor> {
    Arc::new(PipelineExecutor::new(
        &config,
        fx.registry.clone(),
        fx.broadcaster.clone(),
        fx.cache.clone(),
        Collaborators {
            transcriber,
            analyzer,
            cutter,
        },
    ))
}

fn params(topics: &[&str]) -> JobParams {
    JobParams::new(
        "cooking tutorial",
        topics.iter().map(|t| t.to_string()).collect(),
        OutputProfile::Social,
    )
}

async fn collect(stream: impl futures_util::Stream<Item = ProgressEvent>) -> Vec<ProgressEvent> {
    tokio::time::timeout(Duration::from_secs(5), stream.collect())
        .await
        .expect("event stream did not end")
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let fx = fixture().await;
    let transcriber = Arc::new(FakeTranscriber::default());
    let analyzer = Arc::new(FakeAnalyzer::new(3));
    let cutter = Arc::new(FakeCutter::default());
    let exec = executor(&fx, WorkerConfig::default(), transcriber.clone(), analyzer.clone(), cutter.clone());

    let first_id = fx.registry.create(fx.video.clone(), params(&["knife skills"])).await.unwrap();
    let first = exec.run(&first_id).await.unwrap();
    assert_eq!(first.status, JobStatus::Complete);
    assert!(!first.cache_hit);
    let before = fx.cache.list().await.unwrap();
    assert_eq!(before.len(), 1);

    // Same request with different topic casing and spacing
    let second_id = fx.registry.create(fx.video.clone(), params(&[" Knife Skills"])).await.unwrap();
    let events = fx.broadcaster.subscribe(&second_id).into_stream();
    let second = exec.run(&second_id).await.unwrap();
    let events = collect(events).await;

    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 2);
    assert!(second.cache_hit);
    assert!(events
        .iter()
        .any(|e| e.update == StageUpdate::Analyzing { cache_hit: true }));

    let first_clips = first.results.unwrap();
    let second_clips = second.results.unwrap();
    assert_eq!(second_clips.len(), 3);
    for (a, b) in first_clips.iter().zip(&second_clips) {
        assert_eq!(a.title, b.title);
        assert_eq!(a.start_time, b.start_time);
        assert_eq!(a.end_time, b.end_time);
        assert_ne!(a.file_path, b.file_path);
        assert_eq!(b.topics, vec!["Knife Skills"]);
    }

    // A hit leaves the stored entry untouched
    let after = fx.cache.list().await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].job_id, first_id);
    assert_eq!(after[0].timestamp, before[0].timestamp);
    assert_eq!(after[0].cache_key, before[0].cache_key);
}

#[tokio::test]
async fn test_concurrent_jobs_have_isolated_streams() {
    let fx = fixture().await;
    let exec = executor(
        &fx,
        WorkerConfig::default(),
        Arc::new(FakeTranscriber::default()),
        Arc::new(FakeAnalyzer::new(2)),
        Arc::new(FakeCutter::default()),
    );

    let other_video = fx.add_video("plating.mp4", &[9u8; 2048]).await;
    let a = fx.registry.create(fx.video.clone(), params(&["knife skills"])).await.unwrap();
    let b = fx.registry.create(other_video.clone(), params(&["plating"])).await.unwrap();
    let stream_a = fx.broadcaster.subscribe(&a).into_stream();
    let stream_b = fx.broadcaster.subscribe(&b).into_stream();

    let handle_a = exec.submit(&a).await.unwrap();
    let handle_b = exec.submit(&b).await.unwrap();
    let (events_a, events_b) = tokio::join!(collect(stream_a), collect(stream_b));
    handle_a.await.unwrap().unwrap();
    handle_b.await.unwrap().unwrap();

    let job_a = fx.registry.get(&a).await.unwrap();
    let job_b = fx.registry.get(&b).await.unwrap();
    assert_eq!(job_a.video, fx.video);
    assert_eq!(job_b.video, other_video);
    assert!(!job_a.cache_hit && !job_b.cache_hit);

    // One entry per video, each owned by its own job
    let mut owners: Vec<JobId> = fx.cache.list().await.unwrap().into_iter().map(|m| m.job_id).collect();
    owners.sort();
    let mut expected = vec![a.clone(), b.clone()];
    expected.sort();
    assert_eq!(owners, expected);

    for (id, events) in [(&a, &events_a), (&b, &events_b)] {
        assert!(events.iter().all(|e| &e.job_id == id));
        assert!(events.windows(2).all(|w| w[1].progress >= w[0].progress));
        let last = events.last().unwrap();
        assert_eq!(last.status(), JobStatus::Complete);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }
}

#[tokio::test]
async fn test_cancel_during_cut_stops_further_calls() {
    let fx = fixture().await;
    let cutter = Arc::new(FakeCutter {
        block: true,
        ..Default::default()
    });
    let exec = executor(
        &fx,
        WorkerConfig::default(),
        Arc::new(FakeTranscriber::default()),
        Arc::new(FakeAnalyzer::new(3)),
        cutter.clone(),
    );

    let id = fx.registry.create(fx.video.clone(), params(&["knife skills"])).await.unwrap();
    let handle = exec.submit(&id).await.unwrap();
    cutter.started.notified().await;
    assert!(exec.cancel(&id).await.unwrap());

    let job = handle.await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(cutter.calls.load(Ordering::SeqCst), 1);
    assert!(job.results.is_none());
}

#[tokio::test]
async fn test_cancel_while_waiting_for_worker_slot() {
    let fx = fixture().await;
    let transcriber = Arc::new(FakeTranscriber {
        block: true,
        ..Default::default()
    });
    let config = WorkerConfig {
        max_concurrent_jobs: 1,
        ..WorkerConfig::default()
    };
    let exec = executor(
        &fx,
        config,
        transcriber.clone(),
        Arc::new(FakeAnalyzer::new(1)),
        Arc::new(FakeCutter::default()),
    );

    let running = fx.registry.create(fx.video.clone(), params(&["a"])).await.unwrap();
    let waiting = fx.registry.create(fx.video.clone(), params(&["b"])).await.unwrap();
    let running_handle = exec.submit(&running).await.unwrap();
    transcriber.started.notified().await;
    let waiting_handle = exec.submit(&waiting).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fx.registry.get(&waiting).await.unwrap().status, JobStatus::Queued);

    exec.cancel(&waiting).await.unwrap();
    let waited = waiting_handle.await.unwrap().unwrap();
    assert_eq!(waited.error.unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);

    exec.cancel(&running).await.unwrap();
    let ran = running_handle.await.unwrap().unwrap();
    assert_eq!(ran.error.unwrap().kind, ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_job_timeout_cancels() {
    let fx = fixture().await;
    let config = WorkerConfig {
        job_timeout: Some(Duration::from_millis(50)),
        ..WorkerConfig::default()
    };
    let exec = executor(
        &fx,
        config,
        Arc::new(FakeTranscriber {
            block: true,
            ..Default::default()
        }),
        Arc::new(FakeAnalyzer::new(1)),
        Arc::new(FakeCutter::default()),
    );

    let id = fx.registry.create(fx.video.clone(), params(&["a"])).await.unwrap();
    let job = tokio::time::timeout(Duration::from_secs(5), exec.run(&id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_reanalyze_reuses_transcript() {
    let fx = fixture().await;
    let transcriber = Arc::new(FakeTranscriber::default());
    let analyzer = Arc::new(FakeAnalyzer::new(2));
    let exec = executor(
        &fx,
        WorkerConfig::default(),
        transcriber.clone(),
        analyzer.clone(),
        Arc::new(FakeCutter::default()),
    );

    let id = fx.registry.create(fx.video.clone(), params(&["knife skills"])).await.unwrap();
    exec.run(&id).await.unwrap();

    let new_id = exec.reanalyze(&id, params(&["plating"])).await.unwrap();
    assert_ne!(new_id, id);
    let events = collect(fx.broadcaster.subscribe(&new_id).into_stream()).await;

    let job = fx.registry.get(&new_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert!(job.timings.transcribing.skipped);
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
    assert!(events.iter().all(|e| e.status() != JobStatus::Transcribing));
}
