//! Model snapshots shared between cache instances.
//!
//! Each `ModelCache` stands in for a separate process pointed at the same
//! snapshot directory.

use crate::support::{FakeProvider, ScriptedSpeech, ScriptedVision};
use std::sync::Arc;
use tasklane_ai::{FsSnapshotStore, ModelCache, ModelHandle, SnapshotStore};
use tasklane_core::ModelRole;

fn providers() -> (Arc<FakeProvider>, Arc<FakeProvider>) {
    (
        FakeProvider::new(ModelHandle::Speech(Arc::new(ScriptedSpeech))),
        FakeProvider::new(ModelHandle::Vision(Arc::new(ScriptedVision::default()))),
    )
}

fn cache(
    store: &FsSnapshotStore,
    speech: &Arc<FakeProvider>,
    vision: &Arc<FakeProvider>,
) -> ModelCache {
    ModelCache::new(Arc::new(store.clone()))
        .with_provider(speech.clone())
        .with_provider(vision.clone())
}

#[tokio::test]
async fn second_process_starts_warm() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let store = FsSnapshotStore::new(tmp.path());

    let (speech, vision) = providers();
    let cold = cache(&store, &speech, &vision);
    let (s, v) = tokio::try_join!(
        cold.get(ModelRole::Transcription),
        cold.get(ModelRole::Vision)
    )
    .unwrap();
    assert_eq!(s.role(), ModelRole::Transcription);
    assert_eq!(v.role(), ModelRole::Vision);
    assert_eq!((speech.constructs(), vision.constructs()), (1, 1));
    assert!(store.path_for(ModelRole::Transcription).is_file());
    assert!(store.path_for(ModelRole::Vision).is_file());

    let (speech2, vision2) = providers();
    let warm = cache(&store, &speech2, &vision2);
    warm.get(ModelRole::Transcription).await.unwrap();
    warm.get(ModelRole::Vision).await.unwrap();
    assert_eq!((speech2.constructs(), vision2.constructs()), (0, 0));
    assert_eq!((speech2.decodes(), vision2.decodes()), (1, 1));
}

#[tokio::test]
async fn corrupted_snapshot_is_rebuilt_and_replaced() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let store = FsSnapshotStore::new(tmp.path());
    store.write(ModelRole::Vision, b"\x00garbage").unwrap();

    let (speech, vision) = providers();
    let cache = cache(&store, &speech, &vision);
    cache.get(ModelRole::Vision).await.unwrap();

    assert_eq!(vision.constructs(), 1);
    assert_eq!(
        store.read(ModelRole::Vision).unwrap().as_deref(),
        Some(ModelRole::Vision.tag().as_bytes())
    );
}

#[tokio::test]
async fn invalidate_removes_snapshot_for_next_process() {
    let tmp = tempfile::tempdir().expect("failed to create tempdir");
    let store = FsSnapshotStore::new(tmp.path());

    let (speech, vision) = providers();
    let first = cache(&store, &speech, &vision);
    first.get(ModelRole::Transcription).await.unwrap();
    first.invalidate(ModelRole::Transcription).unwrap();
    assert!(!store.path_for(ModelRole::Transcription).exists());

    let (speech2, vision2) = providers();
    let second = cache(&store, &speech2, &vision2);
    second.get(ModelRole::Transcription).await.unwrap();
    assert_eq!(speech2.constructs(), 1);
    assert_eq!(speech2.decodes(), 0);
}
