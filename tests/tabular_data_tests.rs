use std::sync::Arc;

use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use tabula::{
    FileSystemStorageEngine, RowCount, StorageEngine, StorageError, TabularData, TabularError,
};
use tempfile::TempDir;

fn engine_with_chunk_size(chunk_size: usize) -> (TempDir, Arc<dyn StorageEngine>) {
    let dir = tempfile::tempdir().unwrap();
    let engine = FileSystemStorageEngine::builder()
        .high_water_mark(chunk_size)
        .write_high_water_mark(64)
        .open(dir.path());
    (dir, Arc::new(engine))
}

fn sample_rows(rows: usize, columns: usize) -> Vec<Vec<f64>> {
    (0..rows)
        .map(|r| (0..columns).map(|c| (r * columns + c) as f64 * 0.5 - 3.25).collect())
        .collect()
}

async fn write_rows(engine: &dyn StorageEngine, path: &str, rows: &[Vec<f64>]) {
    let mut writer = TabularData::create_write_stream(engine, path, None);
    for row in rows {
        writer.send(row).await.unwrap();
    }
    writer.finish().await.unwrap();
}

#[tokio::test]
async fn test_write_then_read_round_trip() {
    let (_dir, engine) = engine_with_chunk_size(64 * 1024);
    let rows = sample_rows(250, 3);
    write_rows(engine.as_ref(), "t.bin", &rows).await;

    let table = TabularData::open(Arc::clone(&engine), "t.bin", 3).await.unwrap();
    assert_eq!(table.row_count(), RowCount::Rows(250));
    assert_eq!(table.num_rows().unwrap(), 250);

    let streamed: Vec<_> = table.stream().try_collect().await.unwrap();
    assert_eq!(streamed, rows);
    assert_eq!(table.read_all().await.unwrap(), rows);
    assert_eq!(table.rows(10, 13).await.unwrap(), rows[10..13].to_vec());
    assert_eq!(table.row(249).await.unwrap(), rows[249]);
}

#[tokio::test]
async fn test_rows_decode_across_misaligned_chunks() {
    // 12 byte chunks never line up with 24 byte rows
    let (_dir, engine) = engine_with_chunk_size(12);
    let rows = sample_rows(17, 3);
    write_rows(engine.as_ref(), "t.bin", &rows).await;

    let decoded: Vec<_> = TabularData::create_read_stream(engine.as_ref(), "t.bin", 3)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(decoded, rows);

    // Odd chunk sizes as well
    let (_dir, engine) = engine_with_chunk_size(5);
    write_rows(engine.as_ref(), "t.bin", &rows).await;
    let decoded: Vec<_> = TabularData::create_read_stream(engine.as_ref(), "t.bin", 3)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(decoded, rows);
}

#[tokio::test]
async fn test_stream_is_restartable() {
    let (_dir, engine) = engine_with_chunk_size(16);
    let rows = sample_rows(5, 2);
    write_rows(engine.as_ref(), "t.bin", &rows).await;
    let table = TabularData::open(engine, "t.bin", 2).await.unwrap();

    let first: Vec<_> = table.stream().try_collect().await.unwrap();
    let second: Vec<_> = table.stream().try_collect().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 5);
}

#[tokio::test]
async fn test_reading_same_range_twice_is_identical() {
    let (_dir, engine) = engine_with_chunk_size(1024);
    write_rows(engine.as_ref(), "t.bin", &sample_rows(20, 4)).await;
    let table = TabularData::open(engine, "t.bin", 4).await.unwrap();

    let a = table.rows(3, 9).await.unwrap();
    let b = table.rows(3, 9).await.unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_missing_file() {
    let (_dir, engine) = engine_with_chunk_size(1024);
    let table = TabularData::open(Arc::clone(&engine), "missing.bin", 2).await.unwrap();

    assert_eq!(table.row_count(), RowCount::Missing);
    assert_eq!(table.num_rows().unwrap(), -1);
    assert!(table.rows(0, 1).await.unwrap_err().is_not_found());
    assert!(table.row(0).await.unwrap_err().is_not_found());

    let err = table.stream().try_collect::<Vec<_>>().await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_corrupted_file() {
    let (_dir, engine) = engine_with_chunk_size(1024);
    engine.write("bad.bin", Bytes::from(vec![0u8; 20])).await.unwrap();
    let table = TabularData::open(Arc::clone(&engine), "bad.bin", 1).await.unwrap();

    assert_eq!(
        table.row_count(),
        RowCount::Corrupted {
            file_size: 20,
            row_width: 8
        }
    );
    assert!(matches!(
        table.num_rows(),
        Err(TabularError::CorruptedFile { .. })
    ));
    assert!(matches!(
        table.rows(0, 1).await,
        Err(TabularError::CorruptedFile { .. })
    ));

    // Streaming decodes the two complete rows, then reports the trailing bytes
    let items: Vec<_> = table.stream().collect().await;
    assert_eq!(items.len(), 3);
    assert!(items[0].is_ok() && items[1].is_ok());
    assert!(matches!(items[2], Err(TabularError::CorruptedFile { .. })));
}

#[tokio::test]
async fn test_out_of_bounds() {
    let (_dir, engine) = engine_with_chunk_size(1024);
    write_rows(engine.as_ref(), "t.bin", &sample_rows(4, 2)).await;
    let table = TabularData::open(engine, "t.bin", 2).await.unwrap();

    assert!(matches!(
        table.rows(2, 2).await,
        Err(TabularError::OutOfBounds { start: 2, end: 2, num_rows: 4 })
    ));
    assert!(matches!(
        table.rows(3, 5).await,
        Err(TabularError::OutOfBounds { .. })
    ));
    assert!(matches!(table.row(4).await, Err(TabularError::OutOfBounds { .. })));
    assert!(matches!(
        table.row(u64::MAX).await,
        Err(TabularError::OutOfBounds { start: u64::MAX, num_rows: 4, .. })
    ));
}

#[tokio::test]
async fn test_empty_table() {
    let (_dir, engine) = engine_with_chunk_size(1024);
    engine.write("empty.bin", Bytes::new()).await.unwrap();
    let table = TabularData::open(Arc::clone(&engine), "empty.bin", 3).await.unwrap();

    assert_eq!(table.num_rows().unwrap(), 0);
    assert!(table.rows(0, 10).await.unwrap().is_empty());
    assert!(table.read_all().await.unwrap().is_empty());

    let zero_columns = TabularData::open(engine, "empty.bin", 0).await.unwrap();
    assert_eq!(zero_columns.num_rows().unwrap(), 0);
    let rows: Vec<_> = zero_columns.stream().try_collect().await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_column_mismatch_destroys_writer() {
    let (_dir, engine) = engine_with_chunk_size(1024);
    let mut writer = TabularData::create_write_stream(engine.as_ref(), "t.bin", None);

    writer.send(&[1.0, 2.0, 3.0]).await.unwrap();
    assert_eq!(writer.num_columns(), Some(3));

    let err = writer.send(&[1.0, 2.0]).await.unwrap_err();
    assert!(matches!(
        err,
        TabularError::ColumnMismatch {
            expected: 3,
            actual: 2
        }
    ));
    assert!(writer.is_destroyed());
    assert!(matches!(writer.write(&[4.0, 5.0, 6.0]), Err(TabularError::Destroyed)));
    assert!(matches!(writer.finish().await, Err(TabularError::Destroyed)));
}

#[tokio::test]
async fn test_explicit_column_count_and_empty_rows() {
    let (_dir, engine) = engine_with_chunk_size(1024);

    let mut writer = TabularData::create_write_stream(engine.as_ref(), "a.bin", Some(2));
    assert!(matches!(
        writer.write(&[1.0, 2.0, 3.0]),
        Err(TabularError::ColumnMismatch {
            expected: 2,
            actual: 3
        })
    ));

    let mut writer = TabularData::create_write_stream(engine.as_ref(), "b.bin", None);
    assert!(matches!(writer.write(&[]), Err(TabularError::EmptyRow)));
}

#[tokio::test]
async fn test_writer_reports_backpressure() {
    let (_dir, engine) = engine_with_chunk_size(1024);
    let mut writer = TabularData::create_write_stream(engine.as_ref(), "t.bin", Some(4));

    // Each row is 32 bytes and the write high water mark is 64
    let mut saw_backpressure = false;
    for row in sample_rows(10, 4) {
        if !writer.write(&row).unwrap() {
            saw_backpressure = true;
            writer.ready().await;
        }
    }
    writer.finish().await.unwrap();
    assert!(saw_backpressure);

    let table = TabularData::open(engine, "t.bin", 4).await.unwrap();
    assert_eq!(table.num_rows().unwrap(), 10);
}

#[tokio::test]
async fn test_writer_into_missing_directory_fails_on_finish() {
    let (_dir, engine) = engine_with_chunk_size(1024);
    let mut writer = TabularData::create_write_stream(engine.as_ref(), "no/such/dir.bin", None);
    let _ = writer.write(&[1.0]);
    let err = writer.finish().await.unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(err, TabularError::Storage(StorageError::FileNotFound(_))));
}

#[tokio::test]
async fn test_instance_writer_replaces_contents() {
    let (_dir, engine) = engine_with_chunk_size(1024);
    write_rows(engine.as_ref(), "t.bin", &sample_rows(8, 2)).await;
    let table = TabularData::open(Arc::clone(&engine), "t.bin", 2).await.unwrap();

    let mut writer = table.writer();
    writer.send(&[1.0, 1.0]).await.unwrap();
    writer.finish().await.unwrap();

    let reopened = TabularData::open(engine, "t.bin", 2).await.unwrap();
    assert_eq!(reopened.read_all().await.unwrap(), vec![vec![1.0, 1.0]]);
}
