use chrono::{Duration, Utc};
use docpipe::models::{
    AcquireMap, ClassifyMap, DocumentRecord, ObjectLocator, OrderStamp, OutputMap,
    StageMapUpdate, StateTransition,
};
use docpipe::state_machine::{Stage, StageState};
use docpipe::tracking::{InMemoryTrackingStore, ProgressCursor, TrackingError, TrackingStore};
use proptest::prelude::*;

fn record(id: &str, state: StageState, stamp_micros: i64) -> DocumentRecord {
    let mut record = DocumentRecord::new(id, AcquireMap::default());
    record.stage_state = state;
    record.order_stamp = OrderStamp::from_micros(stamp_micros);
    record
}

fn state_strategy() -> impl Strategy<Value = StageState> {
    prop_oneof![
        Just(StageState::Classify),
        Just(StageState::Extract),
        Just(StageState::Augment),
        Just(StageState::Failed),
    ]
}

fn update_strategy() -> impl Strategy<Value = StageMapUpdate> {
    let text = "[a-z]{1,12}";
    prop_oneof![
        (text, text, any::<bool>()).prop_map(|(document_type, language, financial)| {
            StageMapUpdate::Classify(ClassifyMap {
                is_financial_document: Some(financial),
                document_type: Some(document_type),
                language: Some(language),
                ..Default::default()
            })
        }),
        text.prop_map(|key| StageMapUpdate::Extract(OutputMap {
            stage_output: Some(ObjectLocator::new("bucket", format!("extract/{key}.json"))),
        })),
    ]
}

proptest! {
    /// Merging the same payload twice leaves the record exactly as one merge did
    #[test]
    fn merge_is_idempotent(updates in prop::collection::vec(update_strategy(), 1..6)) {
        tokio_test::block_on(async {
            let store = InMemoryTrackingStore::new();

            for update in &updates {
                // One document per stage, sitting in the stage the update belongs to
                let stage = update.stage();
                store
                    .create(&record(stage.as_str(), StageState::from(stage), 1))
                    .await
                    .unwrap();

                let once = store.merge_stage_map(stage.as_str(), update).await.unwrap();
                let twice = store.merge_stage_map(stage.as_str(), update).await.unwrap();
                assert_eq!(once, twice);
            }
        });
    }

    /// The progress index returns only records in the asked state, in stamp order
    #[test]
    fn query_by_state_is_ordered_and_exact(
        entries in prop::collection::vec((state_strategy(), 0i64..1_000), 1..40),
        ascending in any::<bool>(),
    ) {
        tokio_test::block_on(async {
            let store = InMemoryTrackingStore::new();
            for (index, (state, stamp)) in entries.iter().enumerate() {
                store.put(&record(&format!("doc-{index}"), *state, *stamp)).await.unwrap();
            }

            for state in [StageState::Classify, StageState::Extract, StageState::Augment] {
                let found = store.query_by_state(state, ascending, 100).await.unwrap();
                let expected = entries.iter().filter(|(s, _)| *s == state).count();
                assert_eq!(found.len(), expected);
                assert!(found.iter().all(|r| r.stage_state == state));

                let stamps: Vec<i64> = found.iter().map(|r| r.order_stamp.as_micros()).collect();
                let mut sorted = stamps.clone();
                sorted.sort_unstable();
                if !ascending {
                    sorted.reverse();
                }
                assert_eq!(stamps, sorted);
            }
        });
    }
}

#[tokio::test]
async fn test_transition_is_compare_and_set() {
    let store = InMemoryTrackingStore::new();
    store
        .create(&record("doc", StageState::Classify, 1))
        .await
        .unwrap();

    let moved = store
        .transition("doc", &StateTransition::begin(StageState::Classify, Stage::Extract))
        .await
        .unwrap();
    assert_eq!(moved.stage_state, StageState::Extract);

    let duplicate = store
        .transition("doc", &StateTransition::begin(StageState::Classify, Stage::Extract))
        .await;
    assert!(matches!(duplicate, Err(TrackingError::StaleState { .. })));
}

#[tokio::test]
async fn test_records_leave_the_index_when_their_state_changes() {
    let store = InMemoryTrackingStore::new();
    store
        .create(&record("doc", StageState::Classify, 1))
        .await
        .unwrap();
    store
        .transition("doc", &StateTransition::begin(StageState::Classify, Stage::Extract))
        .await
        .unwrap();

    assert!(store
        .query_by_state(StageState::Classify, true, 10)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        store
            .query_by_state(StageState::Extract, true, 10)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_cursor_pages_resume_after_ties() {
    let store = InMemoryTrackingStore::new();
    let stamp = OrderStamp::from_datetime(Utc::now() - Duration::hours(1)).as_micros();
    for id in ["a", "b", "c"] {
        store
            .put(&record(id, StageState::Operate, stamp))
            .await
            .unwrap();
    }

    let first = store
        .query_by_state(StageState::Operate, true, 2)
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    let cursor = ProgressCursor::from(first.last().unwrap());
    let rest = store
        .query_by_state_after(StageState::Operate, &cursor, 2)
        .await
        .unwrap();
    let ids: Vec<&str> = first
        .iter()
        .chain(rest.iter())
        .map(|r| r.document_id.as_str())
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_invalid_update_is_rejected_before_merge() {
    let store = InMemoryTrackingStore::new();
    store
        .create(&record("doc", StageState::Extract, 1))
        .await
        .unwrap();

    let bad = StageMapUpdate::Extract(OutputMap {
        stage_output: Some(ObjectLocator::new("", "extract/doc.json")),
    });
    let result = store.merge_stage_map("doc", &bad).await;
    assert!(matches!(result, Err(TrackingError::InvalidUpdate(_))));
    assert!(store.require("doc").await.unwrap().maps.extract.is_none());
}
