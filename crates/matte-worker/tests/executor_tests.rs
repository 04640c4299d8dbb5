//! Executor behaviour against the in-memory job store.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use matte_media::{FfmpegRunner, MediaError};
use matte_models::{
    Job, JobStatus, JobType, KeyingPayload, NewJob, ResultRef, ResultVariant, StitchPayload,
};
use matte_storage::LocalResultStore;
use matte_store::{JobStore, MemoryJobStore};
use matte_worker::{
    HandlerRegistry, JobContext, JobExecutor, JobHandler, JobOutcome, KeyingHandler, PipelineConfig,
    StitchHandler, WorkerConfig, WorkerError, WorkerResult,
};

enum Behaviour {
    Succeed,
    MediaTimeout,
    Panic,
    Hang,
}

struct FakeHandler {
    behaviour: Behaviour,
    seen_dir: Mutex<Option<PathBuf>>,
}

impl FakeHandler {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            seen_dir: Mutex::new(None),
        })
    }

    fn seen_dir(&self) -> PathBuf {
        self.seen_dir.lock().unwrap().clone().expect("handler never ran")
    }
}

#[async_trait]
impl JobHandler for FakeHandler {
    fn job_type(&self) -> JobType {
        JobType::Animation
    }

    async fn handle(&self, ctx: &JobContext) -> WorkerResult<Vec<ResultRef>> {
        *self.seen_dir.lock().unwrap() = Some(ctx.work_dir.path().to_path_buf());
        tokio::fs::write(ctx.work_dir.output_dir().join("frame.png"), b"png").await?;

        match self.behaviour {
            Behaviour::Succeed => Ok(vec![ResultRef::new(
                ResultVariant::TransparentVideo,
                format!("mem://{}", ctx.job.id),
            )]),
            Behaviour::MediaTimeout => Err(WorkerError::Media(MediaError::Timeout {
                program: "ffmpeg".into(),
                timeout: Duration::from_secs(1),
            })),
            Behaviour::Panic => panic!("stage blew up"),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            }
        }
    }
}

fn test_config(root: &TempDir) -> WorkerConfig {
    WorkerConfig {
        worker_id: "test-worker".to_string(),
        max_concurrent_jobs: 2,
        job_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(5),
        work_dir: root.path().to_path_buf(),
        poll_interval: Duration::from_millis(20),
        heartbeat_interval: Duration::from_millis(50),
        sweep_interval: Duration::from_secs(60),
        stale_threshold: Duration::from_secs(300),
    }
}

async fn claimed_job(store: &MemoryJobStore, worker: &str, job_type: JobType) -> Job {
    let job = store.submit(NewJob::new(job_type, json!({}))).await.unwrap();
    store.claim(&job.id, worker).await.unwrap().into_job().unwrap()
}

#[tokio::test]
async fn test_success_completes_with_results() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let handler = FakeHandler::new(Behaviour::Succeed);
    let executor = JobExecutor::new(
        test_config(&root),
        store.clone(),
        HandlerRegistry::new().register(handler.clone()),
    );

    let job = claimed_job(&store, "test-worker", JobType::Animation).await;
    let outcome = executor.execute(job.clone()).await;

    assert!(matches!(outcome, JobOutcome::Completed(ref r) if r.len() == 1));
    let stored = store.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.results.len(), 1);
    assert!(stored.completed_at.is_some());
    assert!(!handler.seen_dir().exists());
}

#[tokio::test]
async fn test_media_timeout_fails_job() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let handler = FakeHandler::new(Behaviour::MediaTimeout);
    let executor = JobExecutor::new(
        test_config(&root),
        store.clone(),
        HandlerRegistry::new().register(handler.clone()),
    );

    let job = claimed_job(&store, "test-worker", JobType::Animation).await;
    let outcome = executor.execute(job.clone()).await;

    match outcome {
        JobOutcome::Failed { category, message } => {
            assert_eq!(category, "timeout");
            assert!(message.contains("timed out"));
        }
        other => panic!("unexpected {other:?}"),
    }
    let stored = store.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error_message.unwrap().contains("ffmpeg"));
    assert!(!handler.seen_dir().exists());
}

#[tokio::test]
async fn test_panic_fails_job() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let handler = FakeHandler::new(Behaviour::Panic);
    let executor = JobExecutor::new(
        test_config(&root),
        store.clone(),
        HandlerRegistry::new().register(handler.clone()),
    );

    let job = claimed_job(&store, "test-worker", JobType::Animation).await;
    let outcome = executor.execute(job.clone()).await;

    assert!(matches!(outcome, JobOutcome::Failed { category: "panic", .. }));
    let stored = store.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error_message.unwrap().contains("stage blew up"));
    assert!(!handler.seen_dir().exists());
}

#[tokio::test]
async fn test_job_timeout_fails_job() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let handler = FakeHandler::new(Behaviour::Hang);
    let mut config = test_config(&root);
    config.job_timeout = Duration::from_millis(200);
    let executor = JobExecutor::new(config, store.clone(), HandlerRegistry::new().register(handler.clone()));

    let job = claimed_job(&store, "test-worker", JobType::Animation).await;
    let outcome = executor.execute(job.clone()).await;

    assert!(matches!(outcome, JobOutcome::Failed { category: "timeout", .. }));
    assert_eq!(store.get(&job.id).await.unwrap().status, JobStatus::Failed);
    assert!(!handler.seen_dir().exists());
}

#[tokio::test]
async fn test_missing_handler_fails_job() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let executor = JobExecutor::new(
        test_config(&root),
        store.clone(),
        HandlerRegistry::new().register(FakeHandler::new(Behaviour::Succeed)),
    );

    let job = claimed_job(&store, "test-worker", JobType::ImageGeneration).await;
    let outcome = executor.execute(job.clone()).await;

    assert!(matches!(outcome, JobOutcome::Failed { category: "unsupported", .. }));
    assert_eq!(store.get(&job.id).await.unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_run_loop_claims_and_shuts_down() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let executor = Arc::new(JobExecutor::new(
        test_config(&root),
        store.clone(),
        HandlerRegistry::new().register(FakeHandler::new(Behaviour::Succeed)),
    ));

    let first = store.submit(NewJob::new(JobType::Animation, json!({}))).await.unwrap();
    let second = store.submit(NewJob::new(JobType::Animation, json!({}))).await.unwrap();
    // Not accepted by this worker; must stay queued.
    let other = store.submit(NewJob::new(JobType::ImageGeneration, json!({}))).await.unwrap();

    let runner = Arc::clone(&executor);
    let run = tokio::spawn(async move { runner.run().await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let a = store.get(&first.id).await.unwrap().status;
        let b = store.get(&second.id).await.unwrap().status;
        if a == JobStatus::Completed && b == JobStatus::Completed {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "jobs did not complete");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Slots come back once each job task has written its final status.
    while executor.jobs_in_flight() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "job slots were not released");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    executor.shutdown();
    run.await.unwrap().unwrap();
    assert_eq!(store.get(&other.id).await.unwrap().status, JobStatus::Queued);
}

#[tokio::test]
async fn test_finished_child_moves_parent_on() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let executor = JobExecutor::new(
        test_config(&root),
        store.clone(),
        HandlerRegistry::new().register(FakeHandler::new(Behaviour::Succeed)),
    );

    let parent = store
        .submit(NewJob::new(JobType::BoomerangAutomation, json!({})))
        .await
        .unwrap();
    let mut clips = Vec::new();
    for _ in 0..2 {
        let clip = store
            .submit(NewJob::new(JobType::Animation, json!({})).with_parent(parent.id.clone()))
            .await
            .unwrap();
        clips.push(store.claim(&clip.id, "test-worker").await.unwrap().into_job().unwrap());
    }

    executor.execute(clips[0].clone()).await;
    assert_eq!(store.children(&parent.id).await.unwrap().len(), 2);

    executor.execute(clips[1].clone()).await;
    let children = store.children(&parent.id).await.unwrap();
    let stitch = children
        .iter()
        .find(|c| c.job_type == JobType::VideoStitching)
        .expect("stitching child queued");
    let expected: Vec<String> = clips.iter().map(|c| format!("mem://{}", c.id)).collect();
    assert_eq!(stitch.stitch_payload().unwrap().sources, expected);
    assert_eq!(store.get(&parent.id).await.unwrap().status, JobStatus::Queued);
}

#[tokio::test]
async fn test_failed_child_fails_parent() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let executor = JobExecutor::new(
        test_config(&root),
        store.clone(),
        HandlerRegistry::new().register(FakeHandler::new(Behaviour::MediaTimeout)),
    );

    let parent = store
        .submit(NewJob::new(JobType::BoomerangAutomation, json!({})))
        .await
        .unwrap();
    let clip = store
        .submit(NewJob::new(JobType::Animation, json!({})).with_parent(parent.id.clone()))
        .await
        .unwrap();
    let clip = store.claim(&clip.id, "test-worker").await.unwrap().into_job().unwrap();

    executor.execute(clip.clone()).await;

    let parent = store.get(&parent.id).await.unwrap();
    assert_eq!(parent.status, JobStatus::Failed);
    assert!(parent.error_message.unwrap().contains(clip.id.as_str()));
}

#[tokio::test]
async fn test_run_without_handlers_is_config_error() {
    let root = tempfile::tempdir().unwrap();
    let executor = JobExecutor::new(test_config(&root), Arc::new(MemoryJobStore::new()), HandlerRegistry::new());
    assert!(matches!(executor.run().await, Err(WorkerError::ConfigError(_))));
}

/// Keys a synthetic green-screen clip end to end.
#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_keying_job_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let results_dir = tempfile::tempdir().unwrap();

    let source = inputs.path().join("green.mp4");
    let status = tokio::process::Command::new("ffmpeg")
        .args([
            "-y",
            "-f",
            "lavfi",
            "-i",
            "color=c=0x00ff00:s=64x48:d=1:r=10,drawbox=x=16:y=12:w=32:h=24:color=red:t=fill",
            "-pix_fmt",
            "yuv420p",
        ])
        .arg(&source)
        .status()
        .await
        .unwrap();
    assert!(status.success());

    let mut payload = KeyingPayload::new(source.to_string_lossy());
    payload.outputs.still_archive = true;
    payload.outputs.palette_animation = true;

    let store = Arc::new(MemoryJobStore::new());
    let results = Arc::new(LocalResultStore::new(results_dir.path()).await.unwrap());
    let handler = Arc::new(KeyingHandler::new(PipelineConfig::default(), results));
    let executor = JobExecutor::new(test_config(&root), store.clone(), HandlerRegistry::new().register(handler));

    let job = store
        .submit(NewJob::keying(&payload).unwrap())
        .await
        .unwrap();
    let job = store.claim(&job.id, "test-worker").await.unwrap().into_job().unwrap();
    let outcome = executor.execute(job.clone()).await;

    let JobOutcome::Completed(refs) = outcome else {
        panic!("keying failed: {outcome:?}");
    };
    assert_eq!(refs.len(), 3);
    assert_eq!(refs[0].variant, ResultVariant::TransparentVideo);
    for r in &refs {
        assert!(PathBuf::from(&r.location).exists(), "missing {}", r.location);
    }
    assert_eq!(store.get(&job.id).await.unwrap().status, JobStatus::Completed);
}

/// A keying job whose ffmpeg calls cannot finish ends failed, not stuck.
#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_keying_job_ffmpeg_timeout_fails_job() {
    let root = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let results_dir = tempfile::tempdir().unwrap();

    let source = inputs.path().join("green.mp4");
    let status = tokio::process::Command::new("ffmpeg")
        .args(["-y", "-f", "lavfi", "-i", "color=c=0x00ff00:s=64x48:d=2:r=24", "-pix_fmt", "yuv420p"])
        .arg(&source)
        .status()
        .await
        .unwrap();
    assert!(status.success());

    let store = Arc::new(MemoryJobStore::new());
    let results = Arc::new(LocalResultStore::new(results_dir.path()).await.unwrap());
    let handler = KeyingHandler::new(PipelineConfig::default(), results)
        .with_runner(FfmpegRunner::new().with_timeout(Duration::from_millis(1)));
    let executor = JobExecutor::new(
        test_config(&root),
        store.clone(),
        HandlerRegistry::new().register(Arc::new(handler)),
    );

    let job = store
        .submit(NewJob::keying(&KeyingPayload::new(source.to_string_lossy())).unwrap())
        .await
        .unwrap();
    let job = store.claim(&job.id, "test-worker").await.unwrap().into_job().unwrap();
    let outcome = executor.execute(job.clone()).await;

    let JobOutcome::Failed { category, message } = outcome else {
        panic!("expected a timeout, got {outcome:?}");
    };
    assert_eq!(category, "timeout");
    assert!(message.contains("timed out"), "unexpected error text: {message}");

    let stored = store.get(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.claimed_by.is_none());
    assert!(!root.path().join(job.id.as_str()).exists());
}

/// Joins two synthetic clips through the stitching handler.
#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_stitching_job_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let results_dir = tempfile::tempdir().unwrap();

    let mut sources = Vec::new();
    for (name, color) in [("a.mp4", "red"), ("b.mp4", "blue")] {
        let path = inputs.path().join(name);
        let status = tokio::process::Command::new("ffmpeg")
            .args(["-y", "-f", "lavfi", "-i"])
            .arg(format!("color=c={color}:s=64x48:d=1:r=24"))
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p"])
            .arg(&path)
            .status()
            .await
            .unwrap();
        assert!(status.success());
        sources.push(path.to_string_lossy().to_string());
    }

    let store = Arc::new(MemoryJobStore::new());
    let results = Arc::new(LocalResultStore::new(results_dir.path()).await.unwrap());
    let handler = Arc::new(StitchHandler::new(PipelineConfig::default(), results));
    let executor = JobExecutor::new(test_config(&root), store.clone(), HandlerRegistry::new().register(handler));

    let payload = StitchPayload::new(sources).to_value().unwrap();
    let job = store
        .submit(NewJob::new(JobType::VideoStitching, payload))
        .await
        .unwrap();
    let job = store.claim(&job.id, "test-worker").await.unwrap().into_job().unwrap();

    let JobOutcome::Completed(refs) = executor.execute(job.clone()).await else {
        panic!("stitching failed");
    };
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].variant, ResultVariant::StitchedVideo);
    assert!(PathBuf::from(&refs[0].location).exists());
}
