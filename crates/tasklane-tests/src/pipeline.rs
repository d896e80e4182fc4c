//! End-to-end pipeline runs against in-process collaborators.
//!
//! Exercises tasklane-core identity and frame types, tasklane-media's
//! extractor seam and every tasklane-ai stage together.

use crate::support::{
    extractor, failing_extractor, FailingSpeech, FakeExtractor, Harness, RecordingSynthesizer,
    ScriptedVision, SOP_TEXT,
};
use std::collections::HashSet;
use std::sync::Arc;
use tasklane_ai::{
    KeepArtifacts, ModelCache, NullSnapshotStore, PipelineConfig, PipelineOrchestrator,
    PipelineStage, TombstonePolicy,
};
use tasklane_core::{compute_identity, FailureReason, TaskLaneError};

fn small_batches() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.analysis.batch_size = 3;
    config.analysis.max_concurrency = 2;
    config
}

// ── Happy path ─────────────────────────────────────────────────

#[tokio::test]
async fn run_writes_every_artifact() {
    let h = Harness::with_defaults();
    let video = h.video("Demo Tutorial.mp4", b"fake video bytes");
    let orchestrator = h.orchestrator(extractor(7), small_batches());

    let run = orchestrator.run(&video).await.unwrap();

    assert_eq!(run.identity.stem, "Demo_Tutorial");
    assert_eq!(run.frames.len(), 7);
    assert_eq!(run.analysis.success_count(), 7);
    assert_eq!(run.sop_text, SOP_TEXT);
    assert_eq!(run.steps.len(), 2);
    assert_eq!(run.steps[1].description, "Click Save changes");

    assert_eq!(run.artifacts.sop, h.store.sop_path(&run.identity));
    assert_eq!(std::fs::read_to_string(&run.artifacts.sop).unwrap(), SOP_TEXT);
    assert!(run.artifacts.transcript.as_ref().unwrap().is_file());
    assert!(run.artifacts.analysis.as_ref().unwrap().is_file());
    assert!(run.artifacts.summary.as_ref().unwrap().is_file());

    let transcript = h.store.load_transcript(&run.identity).unwrap();
    assert_eq!(transcript.plain_text(), "Open the settings menu then press save");

    let summary = h.store.load_summary(&run.identity).unwrap();
    assert_eq!(summary.run_id, run.run_id);
    assert_eq!(summary.video_name, "Demo Tutorial.mp4");
    assert_eq!(summary.frames_extracted, 7);
    assert_eq!(summary.frames_failed, 0);
    assert_eq!(summary.visual_summary.object_counts.get("button"), Some(&7));
    assert_eq!(summary.visual_summary.detected_text, vec!["Save changes"]);
    assert_eq!(summary.steps, run.steps);
}

#[tokio::test]
async fn analysis_preserves_frame_order_and_timestamps() {
    let h = Harness::with_defaults();
    let video = h.video("order.mp4", b"order");
    let mut config = small_batches();
    config.sampling_rate_hz = 2.0;
    let orchestrator = h.orchestrator(extractor(8), config);

    let run = orchestrator.run(&video).await.unwrap();

    let indices: Vec<usize> = run.analysis.outcomes().iter().map(|o| o.index()).collect();
    assert_eq!(indices, (0..8).collect::<Vec<_>>());
    let stamps: Vec<f64> = run.analysis.successes().map(|a| a.timestamp_secs).collect();
    assert_eq!(stamps, vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5]);
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_done() {
    let h = Harness::with_defaults();
    let video = h.video("progress.mp4", b"progress");
    let orchestrator = h.orchestrator(extractor(10), small_batches());

    let mut seen = Vec::new();
    orchestrator
        .run_with_progress(&video, |p| seen.push(p))
        .await
        .unwrap();

    let overall: Vec<f32> = seen.iter().map(|p| p.overall_progress).collect();
    assert!(overall.windows(2).all(|w| w[0] <= w[1]), "{overall:?}");
    let last = seen.last().unwrap();
    assert_eq!(last.stage, PipelineStage::Done);
    assert!((last.overall_progress - 1.0).abs() < 1e-6);

    // One report on entering analysis, then one per batch of 3.
    let analysis_reports = seen
        .iter()
        .filter(|p| p.stage == PipelineStage::Analyzed)
        .count();
    assert_eq!(analysis_reports, 1 + 4);

    let stages: Vec<PipelineStage> = seen.iter().map(|p| p.stage).collect();
    let mut distinct = stages.clone();
    distinct.dedup();
    assert_eq!(
        distinct,
        vec![
            PipelineStage::Init,
            PipelineStage::IdentityComputed,
            PipelineStage::ModelsReady,
            PipelineStage::Transcribed,
            PipelineStage::FramesExtracted,
            PipelineStage::Analyzed,
            PipelineStage::Synthesized,
            PipelineStage::Persisted,
            PipelineStage::Done,
        ]
    );
}

#[tokio::test]
async fn video_without_frames_still_produces_sop() {
    let h = Harness::with_defaults();
    let video = h.video("audio_only.mp4", b"audio only");
    let orchestrator = h.orchestrator(extractor(0), PipelineConfig::default());

    let run = orchestrator.run(&video).await.unwrap();
    assert!(run.analysis.is_empty());
    assert!(run.artifacts.sop.is_file());
    let prompt = h.synthesizer.prompts.lock()[0].clone();
    assert!(prompt.contains("No significant visual elements detected"), "{prompt}");
}

// ── Content addressing ─────────────────────────────────────────

#[tokio::test]
async fn rerun_on_same_bytes_overwrites_same_artifacts() {
    let h = Harness::with_defaults();
    let video = h.video("repeat.mp4", b"identical bytes");
    let orchestrator = h.orchestrator(extractor(4), PipelineConfig::default());

    let first = orchestrator.run(&video).await.unwrap();
    let second = orchestrator.run(&video).await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.identity, second.identity);
    assert_eq!(first.artifacts, second.artifacts);

    let sops = std::fs::read_dir(h.store.sops_dir()).unwrap().count();
    assert_eq!(sops, 1);
    let frames = std::fs::read_dir(h.store.frames_dir()).unwrap().count();
    assert_eq!(frames, 4);
}

#[tokio::test]
async fn different_bytes_same_name_do_not_collide() {
    let h = Harness::with_defaults();
    let orchestrator = h.orchestrator(extractor(2), PipelineConfig::default());

    let a = h.video("clip.mp4", b"first take");
    let first = orchestrator.run(&a).await.unwrap();
    let b = h.video("clip.mp4", b"second take");
    let second = orchestrator.run(&b).await.unwrap();

    assert_eq!(first.identity.stem, second.identity.stem);
    assert_ne!(first.identity.key(), second.identity.key());
    assert_ne!(first.artifacts.sop, second.artifacts.sop);
    assert!(first.artifacts.sop.is_file());
    assert!(second.artifacts.sop.is_file());
}

#[tokio::test]
async fn identity_matches_standalone_computation() {
    let h = Harness::with_defaults();
    let video = h.video("standalone.mov", b"hash me");
    let orchestrator = h.orchestrator(extractor(1), PipelineConfig::default());

    let run = orchestrator.run(&video).await.unwrap();
    assert_eq!(run.identity, compute_identity(&video).unwrap());
    assert!(run.frames[0]
        .name()
        .starts_with(&format!("{}_frame_", run.identity.key())));
}

// ── Frame failures ─────────────────────────────────────────────

fn failing_harness(failing: &[usize]) -> Harness {
    Harness::new(
        ScriptedVision {
            failing: failing.iter().copied().collect(),
        },
        RecordingSynthesizer::replying(SOP_TEXT),
    )
}

#[tokio::test]
async fn failed_frames_are_tombstoned_and_dropped_from_synthesis() {
    let h = failing_harness(&[1, 4]);
    let video = h.video("flaky.mp4", b"flaky");
    let orchestrator = h.orchestrator(
        FakeExtractor {
            frames: 6,
            missing: HashSet::from([5]),
            failure: None,
        },
        small_batches(),
    );

    let run = orchestrator.run(&video).await.unwrap();

    assert_eq!(run.analysis.len(), 6);
    assert_eq!(run.analysis.failure_count(), 3);
    let reasons: Vec<(usize, bool)> = run
        .analysis
        .failures()
        .map(|f| (f.index, matches!(f.reason, FailureReason::MissingFrame(_))))
        .collect();
    assert_eq!(reasons, vec![(1, false), (4, false), (5, true)]);

    let seen = h.synthesizer.seen.lock();
    assert_eq!(seen[0].len(), 3);
    assert_eq!(seen[0].failure_count(), 0);

    let stored = h.store.load_analysis(&run.identity).unwrap();
    assert_eq!(stored.frames_failed, 3);
    assert_eq!(stored.result, run.analysis);
}

#[tokio::test]
async fn keep_policy_tells_synthesis_about_gaps() {
    let h = failing_harness(&[2]);
    let video = h.video("gaps.mp4", b"gaps");
    let mut config = small_batches();
    config.tombstone_policy = TombstonePolicy::Keep;
    let orchestrator = h.orchestrator(extractor(4), config);

    orchestrator.run(&video).await.unwrap();

    let seen = h.synthesizer.seen.lock();
    assert_eq!(seen[0].len(), 4);
    assert_eq!(seen[0].failure_count(), 1);
    let prompt = &h.synthesizer.prompts.lock()[0];
    assert!(prompt.contains("FRAMES WITHOUT VISUAL DATA"), "{prompt}");
    assert!(prompt.contains("- Frame 2 ("), "{prompt}");
}

#[tokio::test]
async fn every_frame_failing_is_not_fatal() {
    let h = failing_harness(&[0, 1, 2]);
    let video = h.video("dark.mp4", b"dark");
    let orchestrator = h.orchestrator(extractor(3), PipelineConfig::default());

    let run = orchestrator.run(&video).await.unwrap();
    assert_eq!(run.analysis.success_count(), 0);
    assert_eq!(run.analysis.failure_count(), 3);
    assert!(run.artifacts.sop.is_file());
}

// ── Fatal failures ─────────────────────────────────────────────

#[tokio::test]
async fn missing_source_fails_at_identity() {
    let h = Harness::with_defaults();
    let orchestrator = h.orchestrator(extractor(1), PipelineConfig::default());

    let err = orchestrator
        .run(&h.tmp.path().join("nope.mp4"))
        .await
        .unwrap_err();
    assert_eq!(err.stage, PipelineStage::IdentityComputed);
    assert!(matches!(err.source, TaskLaneError::SourceUnreadable { .. }));
    assert_eq!(h.speech.constructs(), 0);
}

#[tokio::test]
async fn synthesis_failure_keeps_earlier_artifacts() {
    let h = Harness::new(ScriptedVision::default(), RecordingSynthesizer::failing());
    let video = h.video("offline.mp4", b"offline");
    let orchestrator = h.orchestrator(extractor(3), PipelineConfig::default());

    let err = orchestrator.run(&video).await.unwrap_err();
    assert_eq!(err.stage, PipelineStage::Synthesized);
    assert!(matches!(err.source, TaskLaneError::SynthesisFailed(_)));
    assert!(err.to_string().contains("synthesis"));

    let identity = compute_identity(&video).unwrap();
    assert!(h.store.transcript_path(&identity).is_file());
    assert!(h.store.analysis_path(&identity).is_file());
    assert!(!h.store.has_sop(&identity));
    assert!(!h.store.summary_path(&identity).exists());
}

#[tokio::test]
async fn extraction_failure_stops_before_analysis() {
    let h = Harness::with_defaults();
    let video = h.video("corrupt.mp4", b"corrupt");
    let orchestrator = h.orchestrator(
        failing_extractor("ffmpeg exited with status 1"),
        PipelineConfig::default(),
    );

    let mut stages = Vec::new();
    let err = orchestrator
        .run_with_progress(&video, |p| stages.push(p.stage))
        .await
        .unwrap_err();
    assert_eq!(err.stage, PipelineStage::FramesExtracted);
    assert!(matches!(err.source, TaskLaneError::ExtractionFailed(_)));
    assert!(err.to_string().contains("frame extraction"), "{err}");
    assert!(!stages.contains(&PipelineStage::Analyzed));

    let identity = compute_identity(&video).unwrap();
    assert!(h.store.transcript_path(&identity).is_file());
    assert!(!h.store.analysis_path(&identity).exists());
    assert!(!h.store.has_sop(&identity));
    assert!(!h.store.summary_path(&identity).exists());
    assert!(h.synthesizer.seen.lock().is_empty());
}

#[tokio::test]
async fn transcription_failure_stops_before_extraction() {
    let h = Harness::with_speech(
        Arc::new(FailingSpeech),
        ScriptedVision::default(),
        RecordingSynthesizer::replying(SOP_TEXT),
    );
    let video = h.video("muted.mp4", b"muted");
    let orchestrator = h.orchestrator(extractor(3), PipelineConfig::default());

    let err = orchestrator.run(&video).await.unwrap_err();
    assert_eq!(err.stage, PipelineStage::Transcribed);
    assert!(matches!(err.source, TaskLaneError::TranscriptionFailed(_)));
    assert!(err.to_string().contains("transcription"), "{err}");

    let identity = compute_identity(&video).unwrap();
    assert!(!h.store.transcript_path(&identity).exists());
    assert!(!h.store.has_sop(&identity));
    assert!(!h.store.summary_path(&identity).exists());
    let frames = std::fs::read_dir(h.store.frames_dir()).unwrap().count();
    assert_eq!(frames, 0);
    assert!(h.synthesizer.seen.lock().is_empty());
}

#[tokio::test]
async fn missing_model_provider_fails_at_model_loading() {
    let h = Harness::with_defaults();
    let cache =
        Arc::new(ModelCache::new(Arc::new(NullSnapshotStore)).with_provider(h.speech.clone()));
    let orchestrator = PipelineOrchestrator::new(
        cache,
        Arc::new(extractor(1)),
        h.synthesizer.clone(),
        h.store.clone(),
        PipelineConfig::default(),
    )
    .unwrap();
    let video = h.video("novision.mp4", b"no vision");

    let err = orchestrator.run(&video).await.unwrap_err();
    assert_eq!(err.stage, PipelineStage::ModelsReady);
    assert!(matches!(err.source, TaskLaneError::ModelUnavailable { .. }));
    assert!(h.synthesizer.seen.lock().is_empty());
}

#[tokio::test]
async fn invalid_sampling_rate_is_rejected_up_front() {
    let h = Harness::with_defaults();
    let config = PipelineConfig {
        sampling_rate_hz: 0.0,
        ..PipelineConfig::default()
    };
    let result = PipelineOrchestrator::new(
        Arc::clone(&h.cache),
        Arc::new(extractor(1)),
        h.synthesizer.clone(),
        h.store.clone(),
        config,
    );
    assert!(matches!(result, Err(TaskLaneError::InvalidParameter(_))));
}

// ── Keep options ───────────────────────────────────────────────

#[tokio::test]
async fn discarded_artifacts_are_not_left_behind() {
    let h = Harness::with_defaults();
    let video = h.video("lean.mp4", b"lean");

    let keep_all = h.orchestrator(extractor(3), PipelineConfig::default());
    let first = keep_all.run(&video).await.unwrap();
    assert!(first.artifacts.transcript.as_ref().unwrap().is_file());

    let lean = h.orchestrator(
        extractor(3),
        PipelineConfig {
            keep: KeepArtifacts {
                transcript: false,
                frames: false,
                analysis: false,
                summary: false,
            },
            ..PipelineConfig::default()
        },
    );
    let run = lean.run(&video).await.unwrap();

    assert!(run.artifacts.sop.is_file());
    assert_eq!(run.artifacts.transcript, None);
    assert_eq!(run.artifacts.analysis, None);
    assert_eq!(run.artifacts.summary, None);
    assert_eq!(run.artifacts.frames_dir, None);
    assert!(!h.store.transcript_path(&run.identity).exists());
    assert!(!h.store.analysis_path(&run.identity).exists());
    assert!(!h.store.summary_path(&run.identity).exists());
    assert!(run.frames.iter().all(|f| !f.location.exists()));
}

// ── Model reuse ────────────────────────────────────────────────

#[tokio::test]
async fn models_are_built_once_across_runs() {
    let h = Harness::with_defaults();
    let orchestrator = h.orchestrator(extractor(2), PipelineConfig::default());

    for i in 0..3 {
        let video = h.video(&format!("v{i}.mp4"), format!("video {i}").as_bytes());
        orchestrator.run(&video).await.unwrap();
    }

    assert_eq!(h.speech.constructs(), 1);
    assert_eq!(h.vision.constructs(), 1);
}
