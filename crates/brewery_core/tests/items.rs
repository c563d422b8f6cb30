use brewery_core::{
    dedupe_items, identity_key, normalize_url_for_dedupe, split_into_batches, ItemStatus, WorkItem,
};
use pretty_assertions::assert_eq;

#[test]
fn url_variants_share_one_key() {
    let variants = [
        "https://example.com/news/",
        "HTTPS://EXAMPLE.COM/news",
        "  https://example.com:443/news#comments ",
    ];
    for raw in variants {
        assert_eq!(
            normalize_url_for_dedupe(raw).as_deref(),
            Some("https://example.com/news"),
            "{raw}"
        );
    }
    assert_eq!(
        normalize_url_for_dedupe("https://example.com/").as_deref(),
        Some("https://example.com")
    );
}

#[test]
fn non_url_payloads_use_trimmed_text() {
    assert_eq!(normalize_url_for_dedupe("ftp://example.com/file"), None);
    assert_eq!(identity_key("  newsletter 2024-05-01 \n"), "newsletter 2024-05-01");
}

#[test]
fn query_strings_are_kept_in_the_key() {
    assert_eq!(
        identity_key("https://example.com/watch?v=abc"),
        "https://example.com/watch?v=abc"
    );
}

#[test]
fn dedupe_keeps_first_and_renumbers() {
    let items = vec![
        WorkItem::new(0, "https://a.example.com/x"),
        WorkItem::new(1, "https://b.example.com/"),
        WorkItem::new(2, "https://A.example.com/x/"),
        WorkItem::new(3, "https://c.example.com"),
    ];
    let (kept, dropped) = dedupe_items(items);

    assert_eq!(dropped, 1);
    let summary: Vec<_> = kept
        .iter()
        .map(|item| (item.ordinal(), item.payload()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (0, "https://a.example.com/x"),
            (1, "https://b.example.com/"),
            (2, "https://c.example.com"),
        ]
    );
}

#[test]
fn batches_preserve_order_and_bound_size() {
    let items: Vec<_> = (0..10)
        .map(|i| WorkItem::new(i, format!("item-{i}")))
        .collect();
    let batches = split_into_batches(items, 4);

    assert_eq!(batches.len(), 3);
    assert_eq!(
        batches.iter().map(|b| b.len()).collect::<Vec<_>>(),
        vec![4, 4, 2]
    );
    assert_eq!(
        batches.iter().map(|b| b.index()).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(batches[2].items()[1].ordinal(), 9);
    assert!(split_into_batches(Vec::new(), 4).is_empty());
}

#[test]
fn batch_sort_restores_ordinal_order() {
    let mut batch = brewery_core::Batch::new(
        0,
        vec![
            WorkItem::new(2, "c"),
            WorkItem::new(0, "a"),
            WorkItem::new(1, "b"),
        ],
    );
    batch.sort_by_ordinal();
    assert_eq!(batch.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
}

#[test]
fn item_input_follows_latest_stage_output() {
    let mut item = WorkItem::new(0, "https://example.com/a");
    assert_eq!(item.input(), "https://example.com/a");
    assert_eq!(item.status(), ItemStatus::Pending);

    item.advance("<html/>".into(), ItemStatus::Fetched);
    assert_eq!(item.input(), "<html/>");
    item.advance("rewritten".into(), ItemStatus::Transformed);
    assert_eq!(item.content(), Some("rewritten"));
    assert_eq!(item.status(), ItemStatus::Transformed);

    assert!(item.mark_persisted());
    assert_eq!(item.status(), ItemStatus::Persisted);
}

#[test]
fn item_status_never_moves_backwards() {
    let mut item = WorkItem::new(0, "https://example.com/a");
    assert!(item.advance("<html/>".into(), ItemStatus::Transformed));

    assert!(!item.advance("stale".into(), ItemStatus::Fetched));
    assert_eq!(item.status(), ItemStatus::Transformed);
    assert_eq!(item.content(), Some("<html/>"));

    // A second transform stage keeps the item transformed.
    assert!(item.advance("shorter".into(), ItemStatus::Transformed));
    assert!(item.mark_persisted());
    assert!(!item.mark_failed());
    assert_eq!(item.status(), ItemStatus::Persisted);
}

#[test]
fn failed_items_stay_failed() {
    let mut item = WorkItem::new(0, "https://example.com/b");
    assert!(item.mark_failed());

    assert!(!item.advance("late".into(), ItemStatus::Fetched));
    assert!(!item.mark_persisted());
    assert_eq!(item.status(), ItemStatus::Failed);
    assert_eq!(item.content(), None);
}
