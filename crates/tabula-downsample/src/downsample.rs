//! In-process execution of a downsampling task.

use log::info;
use tabula::{StorageEngine, TabularData};
use tabula_lttb::{Point, decimate_row_stream};

use crate::{DownsampleError, DownsamplingTaskArgs};

/// Decimates every dependent column of the task's input table.
///
/// Returns one series of `[x, y]` points per entry of `columns.y`, in that order. Every series
/// carries its own x values since decimation may pick different rows for each of them.
pub async fn downsample(
    engine: &dyn StorageEngine,
    args: &DownsamplingTaskArgs,
) -> Result<Vec<Vec<Point>>, DownsampleError> {
    args.validate()?;
    let input = &args.input;

    info!(
        "Downsampling input {} with {} data points to {} data points.",
        input.path, input.number_rows, args.threshold
    );

    let rows = TabularData::create_read_stream(engine, &input.path, input.number_columns);
    let series = decimate_row_stream(rows, input.number_rows, args.threshold, &input.columns.pairs()).await?;
    Ok(series)
}

/// Downsamples the task's input and writes the result as a new table at `output_path`.
///
/// The output has `2 * columns.y.len()` columns laid out as `x1, y1, x2, y2, ...` and one row per
/// decimated point. Returns the number of rows written, which is the length of the shortest
/// series.
pub async fn downsample_to_table(
    engine: &dyn StorageEngine,
    args: &DownsamplingTaskArgs,
    output_path: &str,
) -> Result<usize, DownsampleError> {
    let series = downsample(engine, args).await?;

    let mut writer = TabularData::create_write_stream(engine, output_path, Some(2 * series.len()));
    let mut columns: Vec<_> = series.iter().map(|points| points.iter()).collect();
    let mut row = Vec::with_capacity(2 * series.len());
    let mut num_rows = 0;
    'rows: loop {
        row.clear();
        for points in &mut columns {
            let Some(point) = points.next() else {
                break 'rows;
            };
            row.extend_from_slice(point);
        }
        if row.is_empty() {
            break;
        }
        writer.send(&row).await?;
        num_rows += 1;
    }
    writer.finish().await?;

    info!("Wrote {num_rows} downsampled rows to {output_path}");
    Ok(num_rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{TaskColumns, TaskInput};
    use std::sync::Arc;
    use tabula::FileSystemStorageEngine;

    fn args(path: &str, number_rows: usize, threshold: usize) -> DownsamplingTaskArgs {
        DownsamplingTaskArgs {
            input: TaskInput {
                prefix: "repo".to_string(),
                path: path.to_string(),
                number_rows,
                number_columns: 3,
                columns: TaskColumns { x: 0, y: vec![1, 2] },
            },
            threshold,
        }
    }

    async fn write_table(engine: &dyn StorageEngine, path: &str, rows: usize) {
        let mut writer = TabularData::create_write_stream(engine, path, None);
        for i in 0..rows {
            let x = i as f64;
            writer.send(&[x, x.sin(), x * 2.0]).await.unwrap();
        }
        writer.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_output_table_layout() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FileSystemStorageEngine::new(dir.path());
        write_table(&engine, "in.rtd", 100).await;

        let written = downsample_to_table(&engine, &args("in.rtd", 100, 10), "out.rtd")
            .await
            .unwrap();
        assert_eq!(written, 10);

        let table = TabularData::open(Arc::new(engine.clone()), "out.rtd", 4).await.unwrap();
        assert_eq!(table.num_rows().unwrap(), 10);

        let series = downsample(&engine, &args("in.rtd", 100, 10)).await.unwrap();
        let rows = table.read_all().await.unwrap();
        for (row, (first, second)) in rows.iter().zip(series[0].iter().zip(&series[1])) {
            assert_eq!(row[..], [first[0], first[1], second[0], second[1]]);
        }
        assert_eq!(rows[9], vec![99.0, 99f64.sin(), 99.0, 198.0]);
    }

    #[tokio::test]
    async fn test_nan_values_keep_table_complete() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FileSystemStorageEngine::new(dir.path());
        let mut writer = TabularData::create_write_stream(&engine, "nan.rtd", None);
        for i in 0..10 {
            let x = f64::from(i);
            let y2 = if i == 4 { f64::NAN } else { -x };
            writer.send(&[x, x * x, y2]).await.unwrap();
        }
        writer.finish().await.unwrap();

        let written = downsample_to_table(&engine, &args("nan.rtd", 10, 5), "out.rtd")
            .await
            .unwrap();
        assert_eq!(written, 5);

        let table = TabularData::open(Arc::new(engine.clone()), "out.rtd", 4).await.unwrap();
        let rows = table.read_all().await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0], vec![0.0, 0.0, 0.0, 0.0]);
        assert_eq!(rows[4], vec![9.0, 81.0, 9.0, -9.0]);
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FileSystemStorageEngine::new(dir.path());

        let err = downsample(&engine, &args("missing.rtd", 100, 10)).await.unwrap_err();
        assert!(err.to_string().contains("missing.rtd"));
    }
}
