//! Partitioned store behavior on disk

use std::collections::BTreeMap;
use std::time::Duration;

use featurestore::frame::{Column, DataType};
use featurestore::store::{WriteMode, UNPARTITIONED_FILE};
use featurestore::{
    FeatureLocation, FeatureStoreRoot, Frame, KeyPredicate, PartitionedStore, Schema, StoreError,
    Value,
};

fn schema() -> Schema {
    Schema::new(vec![
        Column::new("id", DataType::Int64),
        Column::new("score", DataType::Float64),
        Column::new("label", DataType::Utf8),
    ])
    .unwrap()
}

fn frame(rows: &[(i64, f64, &str)]) -> Frame {
    Frame::from_rows(
        schema(),
        rows.iter()
            .map(|(id, score, label)| {
                vec![
                    Value::Int64(*id),
                    Value::Float64(*score),
                    Value::Utf8(label.to_string()),
                ]
            })
            .collect(),
    )
    .unwrap()
}

fn store(root: &FeatureStoreRoot, size: u64) -> PartitionedStore {
    root.open(
        FeatureLocation::new("Homes", "Price Ratio", "v1")
            .with_primary_key("id")
            .with_partition_size(size),
    )
}

fn by_key(frame: &Frame) -> BTreeMap<i64, Vec<Value>> {
    frame
        .rows()
        .iter()
        .map(|row| (row[0].as_key().unwrap(), row.clone()))
        .collect()
}

#[test_log::test(tokio::test)]
async fn keys_land_in_their_partition_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = FeatureStoreRoot::new(dir.path());
    let store = store(&root, 10);

    let summary = store
        .write(&frame(&[(5, 0.5, "a"), (15, 1.5, "b")]))
        .await
        .unwrap();

    assert_eq!(summary.mode, WriteMode::Partitioned);
    assert_eq!(summary.partitions_written, vec![0, 1]);
    let version_dir = dir.path().join("homes/features/price_ratio/v1");
    assert!(version_dir.join("partition0.parquet").exists());
    assert!(version_dir.join("partition1.parquet").exists());
    assert!(!version_dir.join(UNPARTITIONED_FILE).exists());
}

#[test_log::test(tokio::test)]
async fn rewriting_a_key_leaves_other_partitions_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let root = FeatureStoreRoot::new(dir.path());
    let store = store(&root, 10);
    store
        .write(&frame(&[(5, 0.5, "a"), (15, 1.5, "b")]))
        .await
        .unwrap();

    let p1 = store.dir().join("partition1.parquet");
    let before_mtime = std::fs::metadata(&p1).unwrap().modified().unwrap();
    let before_bytes = std::fs::read(&p1).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let summary = store.write(&frame(&[(5, 9.0, "z")])).await.unwrap();

    assert_eq!(summary.partitions_written, vec![0]);
    assert_eq!(
        std::fs::metadata(&p1).unwrap().modified().unwrap(),
        before_mtime
    );
    assert_eq!(std::fs::read(&p1).unwrap(), before_bytes);

    let rows = by_key(&store.query(&KeyPredicate::All).await.unwrap());
    assert_eq!(rows[&5][1], Value::Float64(9.0));
    assert_eq!(rows[&15][1], Value::Float64(1.5));
}

#[test_log::test(tokio::test)]
async fn upsert_merges_by_key() {
    let dir = tempfile::tempdir().unwrap();
    let root = FeatureStoreRoot::new(dir.path());
    let store = store(&root, 10);

    store
        .write(&frame(&[(1, 1.0, "one"), (2, 2.0, "two")]))
        .await
        .unwrap();
    store
        .write(&frame(&[(2, 20.0, "TWO"), (3, 3.0, "three")]))
        .await
        .unwrap();

    let rows = by_key(&store.query(&KeyPredicate::All).await.unwrap());
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[&1][2], Value::Utf8("one".into()));
    assert_eq!(rows[&2][2], Value::Utf8("TWO".into()));
    assert_eq!(rows[&3][2], Value::Utf8("three".into()));
}

#[test_log::test(tokio::test)]
async fn rewriting_the_same_rows_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let root = FeatureStoreRoot::new(dir.path());
    let store = store(&root, 10);
    let input = frame(&[(3, 0.3, "x"), (13, 1.3, "y"), (-4, -0.4, "neg")]);

    store.write(&input).await.unwrap();
    let first = store.query(&KeyPredicate::All).await.unwrap();
    store.write(&input).await.unwrap();
    let second = store.query(&KeyPredicate::All).await.unwrap();

    assert_eq!(by_key(&first), by_key(&second));
    assert_eq!(second.len(), 3);
    // -4 floors into partition -1
    let indices: Vec<i64> = store
        .list_partitions()
        .await
        .unwrap()
        .iter()
        .map(|p| p.index)
        .collect();
    assert_eq!(indices, vec![-1, 0, 1]);
}

#[test_log::test(tokio::test)]
async fn range_read_opens_only_covering_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let root = FeatureStoreRoot::new(dir.path());
    let store = store(&root, 10);
    store
        .write(&frame(&[(5, 0.5, "a"), (15, 1.5, "b")]))
        .await
        .unwrap();

    let result = store.read(&KeyPredicate::range(10, 19)).await.unwrap();

    assert_eq!(result.partitions_read, vec![1]);
    assert!(!result.unpartitioned_read);
    assert_eq!(result.frame.len(), 1);
    assert_eq!(result.frame.rows()[0][0], Value::Int64(15));
}

#[test_log::test(tokio::test)]
async fn reading_an_absent_key_returns_typed_empty_frame() {
    let dir = tempfile::tempdir().unwrap();
    let root = FeatureStoreRoot::new(dir.path());
    let store = store(&root, 10);
    store
        .write(&frame(&[(5, 0.5, "a"), (15, 1.5, "b")]))
        .await
        .unwrap();

    let result = store.read(&KeyPredicate::eq(100)).await.unwrap();

    assert!(result.frame.is_empty());
    assert!(result.partitions_read.is_empty());
    assert_eq!(result.frame.schema(), &schema());
}

#[test_log::test(tokio::test)]
async fn concurrent_writes_to_one_partition_keep_every_row() {
    let dir = tempfile::tempdir().unwrap();
    let root = FeatureStoreRoot::new(dir.path());

    let writes = (0..16).map(|key| {
        // separate handles share the root's lock table
        let store = store(&root, 100);
        async move {
            store
                .write(&frame(&[(key, key as f64, "k")]))
                .await
                .unwrap()
        }
    });
    futures::future::join_all(writes).await;

    let store = store(&root, 100);
    let rows = by_key(&store.query(&KeyPredicate::All).await.unwrap());
    assert_eq!(rows.len(), 16);
    assert_eq!(store.list_partitions().await.unwrap().len(), 1);
}

#[test_log::test(tokio::test)]
async fn nulls_and_types_survive_the_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let root = FeatureStoreRoot::new(dir.path());
    let store = store(&root, 10);
    let input = Frame::from_rows(
        schema(),
        vec![
            vec![Value::Int64(1), Value::Null, Value::Utf8("a".into())],
            vec![Value::Int64(2), Value::Float64(2.5), Value::Null],
        ],
    )
    .unwrap();

    store.write(&input).await.unwrap();
    let output = store.query(&KeyPredicate::All).await.unwrap();

    assert_eq!(output.schema(), input.schema());
    assert_eq!(by_key(&output), by_key(&input));
}

#[test_log::test(tokio::test)]
async fn frames_without_castable_keys_go_unpartitioned() {
    let dir = tempfile::tempdir().unwrap();
    let root = FeatureStoreRoot::new(dir.path());
    let store = root.open(FeatureLocation::new("homes", "summary", "v1"));

    let summary = store
        .write(&frame(&[(1, 1.0, "a"), (2, 2.0, "b")]))
        .await
        .unwrap();
    assert_eq!(summary.mode, WriteMode::Unpartitioned);
    assert!(store.has_unpartitioned().await.unwrap());

    store.write(&frame(&[(3, 3.0, "c")])).await.unwrap();
    let result = store.read(&KeyPredicate::All).await.unwrap();
    assert!(result.unpartitioned_read);
    assert_eq!(result.frame.len(), 1);
}

#[test_log::test(tokio::test)]
async fn null_key_after_partitioned_write_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let root = FeatureStoreRoot::new(dir.path());
    let store = store(&root, 10);
    store.write(&frame(&[(5, 1.0, "A")])).await.unwrap();

    let with_null_key = Frame::from_rows(
        schema(),
        vec![
            vec![Value::Int64(5), Value::Float64(2.0), Value::Utf8("B".into())],
            vec![Value::Null, Value::Float64(3.0), Value::Utf8("C".into())],
        ],
    )
    .unwrap();
    let err = store.write(&with_null_key).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::LayoutConflict {
            existing: WriteMode::Partitioned,
            attempted: WriteMode::Unpartitioned,
            ..
        }
    ));

    assert!(!store.has_unpartitioned().await.unwrap());
    let hit = store.read(&KeyPredicate::eq(5)).await.unwrap();
    assert!(!hit.unpartitioned_read);
    assert_eq!(hit.frame.len(), 1);
    assert_eq!(hit.frame.rows()[0][2], Value::Utf8("A".into()));
}
