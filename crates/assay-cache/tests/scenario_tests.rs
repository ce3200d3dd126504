use assay_cache::{
    BulkLoader, CacheError, CacheEvent, ChangeKind, ItemBatch, Readiness, RowKey, SampleBatch,
    SampleId, SampleRecord, TestStatus, UpdateKind, ViewMode,
};
use assay_test_utils::{
    assert_consistent, item, item_id, loaded_cache, memory_source, reacting_item, record, sample,
    setup_cache,
};
use pretty_assertions::assert_eq;

fn row_events(events: &[CacheEvent]) -> Vec<(ChangeKind, ViewMode, usize, usize)> {
    events
        .iter()
        .filter_map(|event| match event {
            CacheEvent::Rows(r) => Some((r.kind, r.view, r.first, r.last)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_bulk_load_row_counts() {
    let (cache, _clock) = loaded_cache(3, 2);

    assert_eq!(cache.row_count(ViewMode::Sample), 3);
    assert_eq!(cache.row_count(ViewMode::TestItem), 6);
    assert_eq!(cache.sample_count(), 3);
    assert_eq!(cache.item_count(), 6);
    assert!(cache.is_ready());
    assert_consistent(&cache);
}

#[tokio::test]
async fn test_bulk_load_through_loader() {
    let (cache, _clock) = setup_cache();
    let source = memory_source(3, 2);

    BulkLoader::new(2).load_into(&cache, &source).await.unwrap();

    assert_eq!(cache.row_count(ViewMode::Sample), 3);
    assert_eq!(cache.row_count(ViewMode::TestItem), 6);
    assert_eq!(cache.readiness(), Readiness::Ready);
    assert_consistent(&cache);
}

#[test]
fn test_delete_second_sample_shifts_item_rows() {
    let (cache, clock) = loaded_cache(3, 2);
    // give the doomed sample's items live countdowns
    cache.apply_items(ItemBatch::new(
        UpdateKind::Modify,
        vec![reacting_item(2, 0, 60), reacting_item(2, 1, 90)],
    ));
    assert_eq!(cache.countdown_count(), 2);
    let first_of_third = item_id(3, 0);
    assert_eq!(cache.row_of(RowKey::Item(first_of_third)), Some(4));

    clock.advance_secs(1);
    let events = cache.apply_samples(SampleBatch::new(UpdateKind::Delete, vec![record(2, 0)]));

    assert_eq!(cache.row_count(ViewMode::Sample), 2);
    assert_eq!(cache.row_count(ViewMode::TestItem), 4);
    assert_eq!(cache.row_of(RowKey::Item(first_of_third)), Some(2));
    assert!(cache.get_test_item(item_id(2, 0)).is_none());
    assert!(cache.get_test_item(item_id(2, 1)).is_none());
    assert_eq!(cache.countdown_count(), 0);
    assert_eq!(cache.remaining(item_id(2, 0)), None);
    assert_eq!(
        row_events(&events),
        vec![(ChangeKind::Delete, ViewMode::Sample, 1, 1)]
    );
    assert_consistent(&cache);
}

#[test]
fn test_delete_in_item_view_reports_item_rows() {
    let (cache, _clock) = loaded_cache(3, 2);
    cache.switch_view(ViewMode::TestItem);

    let events = cache.apply_samples(SampleBatch::new(UpdateKind::Delete, vec![record(2, 0)]));

    assert_eq!(
        row_events(&events),
        vec![(ChangeKind::Delete, ViewMode::TestItem, 2, 3)]
    );
}

#[test]
fn test_modify_adds_reacting_item_and_counts_down() {
    let (cache, clock) = loaded_cache(3, 2);
    let mut items = vec![item(1, 0), item(1, 1)];
    items.push(reacting_item(1, 2, 120));

    cache.apply_samples(SampleBatch::new(
        UpdateKind::Modify,
        vec![SampleRecord::new(sample(1), items)],
    ));
    let fresh = item_id(1, 2);
    assert_eq!(cache.remaining(fresh), Some(120));

    for _ in 0..3 {
        clock.advance_secs(1);
        cache.tick();
    }

    assert_eq!(cache.remaining(fresh), Some(117));
    assert_eq!(cache.row_of(RowKey::Item(fresh)), Some(6));
    assert_consistent(&cache);
}

#[test]
fn test_select_all_items_leaves_samples_untouched() {
    let (cache, _clock) = loaded_cache(3, 2);
    cache.switch_view(ViewMode::TestItem);

    assert_eq!(cache.select_all(ViewMode::TestItem), 6);
    assert_eq!(cache.selected_ids(ViewMode::TestItem).len(), 6);

    cache.switch_view(ViewMode::Sample);

    assert!(cache.selected_ids(ViewMode::Sample).is_empty());
    assert!((0..3).all(|row| !cache.is_selected(ViewMode::Sample, row)));
    assert_eq!(cache.selected_ids(ViewMode::TestItem).len(), 6);
}

#[test]
fn test_selection_follows_record_not_row() {
    let (cache, _clock) = loaded_cache(3, 1);
    assert!(cache.select(ViewMode::Sample, 2, true));

    cache.apply_samples(SampleBatch::new(UpdateKind::Delete, vec![record(1, 0)]));

    assert_eq!(cache.selected_rows(ViewMode::Sample), vec![1]);
    assert!(cache
        .selected_ids(ViewMode::Sample)
        .contains(&RowKey::Sample(SampleId(3))));
}

#[test]
fn test_switch_view_keeps_cursor_on_same_sample() {
    let (cache, _clock) = loaded_cache(3, 2);
    cache.set_cursor(Some(1));

    // sample 2 maps to its first item, row 2
    assert_eq!(cache.switch_view(ViewMode::TestItem), Some(2));
    assert_eq!(cache.cursor_key(), Some(RowKey::Item(item_id(2, 0))));

    // the second item of sample 3 maps back to sample 3
    cache.set_cursor(Some(5));
    assert_eq!(cache.switch_view(ViewMode::Sample), Some(2));
}

#[test]
fn test_switch_view_without_counterpart_clears_cursor() {
    let (cache, _clock) = loaded_cache(2, 0);
    cache.set_cursor(Some(0));

    assert_eq!(cache.switch_view(ViewMode::TestItem), None);
    assert_eq!(cache.cursor_key(), None);
    assert_eq!(cache.active_view(), ViewMode::TestItem);
}

#[test]
fn test_stale_row_ref_is_rejected_after_structural_change() {
    let (cache, _clock) = loaded_cache(3, 1);
    let pinned = cache.row_ref(ViewMode::Sample, 2).unwrap();
    assert_eq!(cache.resolve(&pinned).unwrap(), RowKey::Sample(SampleId(3)));

    // field-only modify keeps rows valid
    cache.apply_samples(SampleBatch::new(UpdateKind::Modify, vec![record(3, 1)]));
    assert!(cache.resolve(&pinned).is_ok());

    cache.apply_samples(SampleBatch::new(UpdateKind::Delete, vec![record(1, 0)]));
    let err = cache.resolve(&pinned).unwrap_err();
    assert!(err.is_stale());
    assert!(matches!(err, CacheError::StaleRow { row: 2, .. }));
}

#[test]
fn test_item_status_change_repaints_owner_row() {
    let (cache, _clock) = loaded_cache(3, 2);
    let done = item(2, 1).with_status(TestStatus::Tested);

    let events = cache.apply_items(ItemBatch::new(UpdateKind::Modify, vec![done]));

    assert_eq!(
        row_events(&events),
        vec![(ChangeKind::Modify, ViewMode::Sample, 1, 1)]
    );
    assert_eq!(
        cache.get_test_item(item_id(2, 1)).map(|i| i.status),
        Some(TestStatus::Tested)
    );
}

#[test]
fn test_events_reach_subscribers_in_order() {
    let (cache, _clock) = loaded_cache(1, 1);
    let rx = cache.subscribe();

    cache.apply_samples(SampleBatch::new(UpdateKind::Add, vec![record(2, 1)]));
    cache.invalidate_display();

    let received: Vec<CacheEvent> = rx.try_iter().collect();
    assert!(matches!(
        received.first(),
        Some(CacheEvent::Rows(r)) if r.kind == ChangeKind::Add && r.first == 1
    ));
    assert!(matches!(
        received.last(),
        Some(CacheEvent::DisplayInvalidated { epoch: 1 })
    ));
}

#[test]
fn test_real_item_count_excludes_calculated() {
    use assay_cache::AssayResult;

    let (cache, _clock) = loaded_cache(1, 2);
    let calculated = item(1, 2).with_result(AssayResult::Calculated {
        value: Some(1.2),
        formula: "ALB/GLB".into(),
    });
    cache.apply_items(ItemBatch::new(UpdateKind::Add, vec![calculated]));

    assert_eq!(cache.item_count(), 3);
    assert_eq!(cache.real_item_count(), 2);
}

#[test]
fn test_ineligible_testing_items_get_no_countdown() {
    let (cache, _clock) = loaded_cache(2, 1);
    let mut not_sampled = reacting_item(1, 1, 60);
    not_sampled.sampling_completed = false;
    let zero_duration = reacting_item(1, 2, 0);

    cache.apply_items(ItemBatch::new(
        UpdateKind::Add,
        vec![not_sampled.clone(), zero_duration.clone()],
    ));
    assert_eq!(cache.countdown_count(), 0);
    assert_eq!(cache.remaining(not_sampled.id), None);
    assert_eq!(cache.remaining(zero_duration.id), None);

    // same items arriving as the full membership of another sample
    let mut moved_not_sampled = reacting_item(2, 1, 60);
    moved_not_sampled.sampling_completed = false;
    let moved_zero = reacting_item(2, 2, 0);
    cache.apply_samples(SampleBatch::new(
        UpdateKind::Modify,
        vec![SampleRecord::new(
            sample(2),
            vec![item(2, 0), moved_not_sampled.clone(), moved_zero.clone()],
        )],
    ));

    assert_eq!(cache.countdown_count(), 0);
    assert_eq!(cache.remaining(moved_not_sampled.id), None);
    assert_eq!(cache.remaining(moved_zero.id), None);
    assert_eq!(cache.get_items_of_sample(SampleId(2)).map(|s| s.len()), Some(3));
    assert_consistent(&cache);
}

#[test]
fn test_modify_clearing_sampling_untracks_item() {
    let (cache, _clock) = loaded_cache(1, 1);
    let reacting = reacting_item(1, 1, 90);
    cache.apply_items(ItemBatch::new(UpdateKind::Add, vec![reacting.clone()]));
    assert_eq!(cache.remaining(reacting.id), Some(90));

    let mut resampled = reacting.clone();
    resampled.sampling_completed = false;
    cache.apply_items(ItemBatch::new(UpdateKind::Modify, vec![resampled]));

    assert_eq!(cache.countdown_count(), 0);
    assert_eq!(cache.remaining(reacting.id), None);
    assert_eq!(
        cache.get_test_item(reacting.id).map(|i| i.status),
        Some(TestStatus::Testing)
    );
}
