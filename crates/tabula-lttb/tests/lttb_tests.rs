use std::convert::Infallible;
use std::sync::Arc;

use futures_util::{Stream, StreamExt, TryStreamExt, stream};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tabula::{FileSystemStorageEngine, Row, StorageEngine, TabularData, tee};
use tabula_lttb::{
    ColumnPair, LttbError, Point, decimate, decimate_pair, decimate_row_stream, decimate_table,
    lttb_stream, stream_table,
};

/// Textbook LTTB over a point series.
fn reference_lttb(data: &[Point], threshold: usize) -> Vec<Point> {
    let n = data.len();
    if threshold >= n || threshold == 0 {
        return data.to_vec();
    }

    let every = (n - 2) as f64 / (threshold - 2) as f64;
    let mut sampled = vec![data[0]];
    let mut a = 0;

    for i in 0..threshold - 2 {
        let avg_start = ((i + 1) as f64 * every).floor() as usize + 1;
        let avg_end = (((i + 2) as f64 * every).floor() as usize + 1).min(n);
        let avg_len = (avg_end - avg_start) as f64;
        let mut avg_x = 0.0;
        let mut avg_y = 0.0;
        for point in &data[avg_start..avg_end] {
            avg_x += point[0];
            avg_y += point[1];
        }
        avg_x /= avg_len;
        avg_y /= avg_len;

        let range_start = (i as f64 * every).floor() as usize + 1;
        let range_end = ((i + 1) as f64 * every).floor() as usize + 1;

        let [ax, ay] = data[a];
        let mut max_area = -1.0;
        let mut next_a = range_start;
        for (j, point) in data.iter().enumerate().take(range_end).skip(range_start) {
            let area = ((ax - avg_x) * (point[1] - ay) - (ax - point[0]) * (avg_y - ay)).abs() * 0.5;
            if area > max_area {
                max_area = area;
                next_a = j;
            }
        }
        sampled.push(data[next_a]);
        a = next_a;
    }

    sampled.push(data[n - 1]);
    sampled
}

struct Series {
    x: Vec<f64>,
    sin: Vec<f64>,
    cos: Vec<f64>,
}

impl Series {
    fn new(len: usize) -> Self {
        let x: Vec<f64> = (0..len).map(|i| i as f64).collect();
        Self {
            sin: x.iter().map(|x| x.sin()).collect(),
            cos: x.iter().map(|x| x.cos()).collect(),
            x,
        }
    }

    fn points(&self, y: &[f64]) -> Vec<Point> {
        self.x.iter().zip(y).map(|(&x, &y)| [x, y]).collect()
    }

    fn rows(&self, columns: &[&[f64]]) -> Vec<Row> {
        (0..self.x.len())
            .map(|i| columns.iter().map(|c| c[i]).collect())
            .collect()
    }
}

fn row_stream(rows: Vec<Row>) -> impl Stream<Item = Result<Row, Infallible>> + Send + 'static {
    stream::iter(rows.into_iter().map(Ok))
}

#[tokio::test]
async fn test_matches_reference_implementation() {
    for (input, output) in [(25, 20), (50, 20), (500, 40)] {
        let series = Series::new(input);
        for y in [&series.sin, &series.cos] {
            let reference = reference_lttb(&series.points(y), output);
            let rows = series.rows(&[&series.x, y]);

            let batch = decimate_row_stream(row_stream(rows.clone()), input, output, &[ColumnPair::default()])
                .await
                .unwrap();
            assert_eq!(batch[0], reference, "batch {input} -> {output}");

            let streamed: Vec<Point> = lttb_stream(row_stream(rows), input, output, ColumnPair::default())
                .try_collect()
                .await
                .unwrap();
            assert_eq!(streamed, reference, "stream {input} -> {output}");
        }
    }
}

#[tokio::test]
async fn test_multiple_pairs_match_reference() {
    for (input, output) in [(25, 3), (25, 20), (50, 20), (500, 40)] {
        let series = Series::new(input);
        let rows = series.rows(&[&series.x, &series.sin, &series.x, &series.cos]);

        let result = decimate_row_stream(
            row_stream(rows),
            input,
            output,
            &[ColumnPair::new(0, 1), ColumnPair::new(2, 3)],
        )
        .await
        .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0], reference_lttb(&series.points(&series.sin), output));
        assert_eq!(result[1], reference_lttb(&series.points(&series.cos), output));
    }
}

#[test]
fn test_x_and_y_indices() {
    let series = Series::new(50);
    let rows = series.rows(&[&series.sin, &series.x, &series.cos]);

    let result = decimate_pair(&rows, 12, ColumnPair::new(1, 0)).unwrap();
    assert_eq!(result, reference_lttb(&series.points(&series.sin), 12));
}

#[test]
fn test_threshold_above_length_skips_decimation() {
    let series = Series::new(10);
    let rows = series.rows(&[&series.sin, &series.x, &series.cos]);

    let result = decimate(&rows, 20, &[ColumnPair::new(1, 0), ColumnPair::new(1, 2)]).unwrap();
    assert_eq!(result[0], series.points(&series.sin));
    assert_eq!(result[1], series.points(&series.cos));
}

#[tokio::test]
async fn test_batch_and_streaming_agree_on_random_data() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..50 {
        let len = rng.random_range(3..400);
        let threshold = rng.random_range(3..len + 10);
        let mut x = 0.0;
        let rows: Vec<Row> = (0..len)
            .map(|_| {
                x += rng.random_range(0.1..5.0);
                vec![x, rng.random_range(-100.0..100.0), rng.random_range(-1.0..1.0)]
            })
            .collect();

        let batch = decimate(&rows, threshold, &[ColumnPair::new(0, 1), ColumnPair::new(0, 2)]).unwrap();
        for (index, pair) in [ColumnPair::new(0, 1), ColumnPair::new(0, 2)].into_iter().enumerate() {
            let streamed: Vec<Point> = lttb_stream(row_stream(rows.clone()), len, threshold, pair)
                .try_collect()
                .await
                .unwrap();
            assert_eq!(batch[index], streamed, "len={len} threshold={threshold}");

            let expected_len = if threshold >= len { len } else { threshold };
            assert_eq!(streamed.len(), expected_len);
            assert_eq!(streamed[0], [rows[0][0], rows[0][pair.y]]);
            assert_eq!(streamed[expected_len - 1], [rows[len - 1][0], rows[len - 1][pair.y]]);
        }
    }
}

#[tokio::test]
async fn test_tee_into_multiple_streams() {
    let series = Series::new(50);
    let rows = series.rows(&[&series.x, &series.sin, &series.cos]);

    let mut branches = tee(row_stream(rows), 2, 8).into_iter();
    let (Some(first), Some(second)) = (branches.next(), branches.next()) else {
        panic!("expected two branches");
    };

    let (sin, cos) = tokio::join!(
        lttb_stream(first, 50, 12, ColumnPair::new(0, 1)).try_collect::<Vec<_>>(),
        lttb_stream(second, 50, 12, ColumnPair::new(0, 2)).try_collect::<Vec<_>>(),
    );
    assert_eq!(sin.unwrap(), reference_lttb(&series.points(&series.sin), 12));
    assert_eq!(cos.unwrap(), reference_lttb(&series.points(&series.cos), 12));
}

#[tokio::test]
async fn test_tabular_data_into_multiple_streams() {
    let dir = tempfile::tempdir().unwrap();
    let engine: Arc<dyn StorageEngine> = Arc::new(
        FileSystemStorageEngine::builder()
            .high_water_mark(100)
            .open(dir.path()),
    );
    let series = Series::new(50);

    let mut writer = TabularData::create_write_stream(engine.as_ref(), "data.rtd", None);
    for row in series.rows(&[&series.x, &series.sin, &series.cos]) {
        writer.send(&row).await.unwrap();
    }
    writer.finish().await.unwrap();

    let table = TabularData::open(engine, "data.rtd", 3).await.unwrap();
    let mut branches = tee(table.stream(), 2, 4).into_iter();
    let (Some(first), Some(second)) = (branches.next(), branches.next()) else {
        panic!("expected two branches");
    };

    let (sin, cos) = tokio::join!(
        lttb_stream(first, 50, 12, ColumnPair::new(0, 1)).try_collect::<Vec<_>>(),
        lttb_stream(second, 50, 12, ColumnPair::new(0, 2)).try_collect::<Vec<_>>(),
    );
    assert_eq!(sin.unwrap(), reference_lttb(&series.points(&series.sin), 12));
    assert_eq!(cos.unwrap(), reference_lttb(&series.points(&series.cos), 12));

    // The same table through the helpers
    let both = decimate_table(&table, 12, &[ColumnPair::new(0, 1), ColumnPair::new(0, 2)])
        .await
        .unwrap();
    assert_eq!(both[0], reference_lttb(&series.points(&series.sin), 12));

    let cos: Vec<Point> = stream_table(&table, 12, ColumnPair::new(0, 2))
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(cos, both[1]);
}

#[tokio::test]
async fn test_missing_table_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let engine: Arc<dyn StorageEngine> = Arc::new(FileSystemStorageEngine::new(dir.path()));
    let table = TabularData::open(engine, "missing.rtd", 2).await.unwrap();

    let err = decimate_table(&table, 5, &[ColumnPair::default()]).await.unwrap_err();
    assert!(matches!(err, LttbError::Source(_)));
    assert!(err.to_string().contains("missing.rtd"));
}

#[tokio::test]
async fn test_corrupted_table_row_stream_fails() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FileSystemStorageEngine::new(dir.path());
    engine
        .write("odd.rtd", bytes::Bytes::from(vec![0u8; 8 * 5 + 3]))
        .await
        .unwrap();

    // Five complete one-column rows followed by three stray bytes. Only five rows are pulled
    // in the first run, so the stray bytes are never decoded.
    let source = TabularData::create_read_stream(&engine, "odd.rtd", 1).map(|item| item.map(|row| vec![row[0], row[0]]));
    let points = lttb_stream(source, 5, 3, ColumnPair::default())
        .try_collect::<Vec<_>>()
        .await;
    assert_eq!(points.unwrap().len(), 3);

    let source = TabularData::create_read_stream(&engine, "odd.rtd", 1).map(|item| item.map(|row| vec![row[0], row[0]]));
    let err = lttb_stream(source, 6, 3, ColumnPair::default())
        .try_collect::<Vec<_>>()
        .await
        .unwrap_err();
    assert!(err.to_string().contains("trailing bytes"));
}
