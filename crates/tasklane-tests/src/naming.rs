//! Artifact naming across crates.
//!
//! The identity key computed in tasklane-core must be the namespace used by
//! tasklane-media for frame files and by tasklane-ai for stored artifacts.

use tasklane_ai::ArtifactStore;
use tasklane_core::compute_identity;
use tasklane_media::ExtractionJob;

#[test]
fn frames_and_artifacts_share_the_identity_key() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let video = tmp.path().join("How to (export) a report!.mp4");
    std::fs::write(&video, b"report video").unwrap();

    let identity = compute_identity(&video).unwrap();
    let key = identity.key();
    assert!(key.starts_with("How_to_export_a_report_"), "{key}");
    assert_eq!(identity.digest_prefix().len(), 16);

    let store = ArtifactStore::new(tmp.path().join("output"));
    let job = ExtractionJob::new(&video, store.frames_dir(), &key, 1.0);
    assert!(job
        .output_pattern()
        .starts_with(store.frames_dir()));
    assert!(job
        .output_pattern()
        .to_string_lossy()
        .ends_with(&format!("{key}_frame_%04d.png")));
    assert!(store
        .sop_path(&identity)
        .to_string_lossy()
        .ends_with(&format!("{key}_sop.txt")));
}

#[test]
fn stale_frames_of_other_videos_survive() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let store = ArtifactStore::new(tmp.path());
    store.ensure_dirs().unwrap();

    let a = tmp.path().join("a.mp4");
    let b = tmp.path().join("b.mp4");
    std::fs::write(&a, b"video a").unwrap();
    std::fs::write(&b, b"video b").unwrap();
    let key_a = compute_identity(&a).unwrap().key();
    let key_b = compute_identity(&b).unwrap().key();

    for key in [&key_a, &key_b] {
        for n in 1..=3 {
            std::fs::write(store.frames_dir().join(format!("{key}_frame_{n:04}.png")), b"png")
                .unwrap();
        }
    }

    let job_a = ExtractionJob::new(&a, store.frames_dir(), &key_a, 1.0);
    assert_eq!(job_a.clear_stale_frames().unwrap(), 3);

    let job_b = ExtractionJob::new(&b, store.frames_dir(), &key_b, 1.0);
    let frames = job_b.collect_frames().unwrap();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[2].timestamp_secs, 2.0);
}
