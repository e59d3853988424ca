//! Incremental LTTB for a single column pair.
//!
//! [`lttb_stream`] turns a row stream into a lazy stream of decimated points. Rows are pulled
//! only when a bucket needs them: the decimator holds the current bucket and the one after it,
//! and never needs random access to the source.

use std::error::Error;

use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use tabula::Row;

use crate::LttbError;
use crate::bucket::{Buckets, ColumnPair, Plan, Point, select};
use crate::source::RowPuller;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    PassThrough,
    First,
    Bucket(usize),
    Last,
    Done,
}

struct Decimator<S> {
    rows: RowPuller<S>,
    pair: ColumnPair,
    buckets: Option<Buckets>,
    phase: Phase,
    previous: Point,
    next: Vec<Point>,
}

impl<S, E> Decimator<S>
where
    S: Stream<Item = Result<Row, E>>,
    E: Error + Send + Sync + 'static,
{
    async fn point(&mut self) -> Result<Point, LttbError> {
        let row = self.rows.next().await?;
        Ok(self.pair.point(&row))
    }

    async fn points(&mut self, count: usize) -> Result<Vec<Point>, LttbError> {
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            points.push(self.point().await?);
        }
        Ok(points)
    }

    /// Produces the next output point, or `None` at the end.
    async fn advance(&mut self) -> Result<Option<Point>, LttbError> {
        loop {
            match self.phase {
                Phase::PassThrough => {
                    if self.rows.exhausted() {
                        self.phase = Phase::Done;
                        return Ok(None);
                    }
                    return self.point().await.map(Some);
                }
                Phase::First => {
                    let first = self.point().await?;
                    self.previous = first;
                    self.phase = Phase::Bucket(0);
                    return Ok(Some(first));
                }
                Phase::Bucket(i) => {
                    let Some(buckets) = self.buckets else {
                        self.phase = Phase::Done;
                        continue;
                    };
                    let mut current = std::mem::take(&mut self.next);
                    if current.is_empty() {
                        current = self.points(buckets.len(i)).await?;
                    }
                    self.next = self.points(buckets.len(i + 1)).await?;

                    self.phase = if i + 1 < buckets.threshold() - 2 {
                        Phase::Bucket(i + 1)
                    } else {
                        Phase::Last
                    };

                    let average = mean(&self.next);
                    if let Some(point) = select(self.previous, average, current) {
                        self.previous = point;
                        return Ok(Some(point));
                    }
                }
                Phase::Last => {
                    self.phase = Phase::Done;
                    return Ok(self.next.last().copied());
                }
                Phase::Done => return Ok(None),
            }
        }
    }
}

fn mean(points: &[Point]) -> Point {
    let mut sum = [0.0, 0.0];
    for point in points {
        sum[0] += point[0];
        sum[1] += point[1];
    }
    let len = points.len() as f64;
    [sum[0] / len, sum[1] / len]
}

/// Decimates the first `data_length` rows of `source` to `threshold` points of `pair`.
///
/// The returned stream is lazy and can only be consumed once. The first error ends it. Invalid
/// thresholds are reported as the first item.
pub fn lttb_stream<S, E>(
    source: S,
    data_length: usize,
    threshold: usize,
    pair: ColumnPair,
) -> BoxStream<'static, Result<Point, LttbError>>
where
    S: Stream<Item = Result<Row, E>> + Send + 'static,
    E: Error + Send + Sync + 'static,
{
    let plan = match Plan::new(data_length, threshold) {
        Ok(plan) => plan,
        Err(e) => return stream::once(async move { Err(e) }).boxed(),
    };
    let (buckets, phase) = match plan {
        Plan::PassThrough => (None, Phase::PassThrough),
        Plan::Decimate(buckets) => (Some(buckets), Phase::First),
    };

    let decimator = Decimator {
        rows: RowPuller::new(source, data_length, vec![pair]),
        pair,
        buckets,
        phase,
        previous: [0.0, 0.0],
        next: Vec::new(),
    };

    stream::unfold(decimator, |mut decimator| async move {
        match decimator.advance().await {
            Ok(Some(point)) => Some((Ok(point), decimator)),
            Ok(None) => None,
            Err(e) => {
                decimator.phase = Phase::Done;
                Some((Err(e), decimator))
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use std::convert::Infallible;

    fn rows(n: usize) -> impl Stream<Item = Result<Row, Infallible>> + Send + 'static {
        stream::iter((0..n).map(|i| Ok(vec![i as f64, (i as f64).sin()])))
    }

    #[tokio::test]
    async fn test_output_length_and_endpoints() {
        let points: Vec<Point> = lttb_stream(rows(100), 100, 10, ColumnPair::default())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(points.len(), 10);
        assert_eq!(points[0], [0.0, 0.0]);
        assert_eq!(points[9], [99.0, 99f64.sin()]);
    }

    #[tokio::test]
    async fn test_nan_values_do_not_drop_points() {
        let source = stream::iter((0..100).map(|i| {
            let y = if i % 7 == 3 { f64::NAN } else { (i as f64).sin() };
            Ok::<_, Infallible>(vec![i as f64, y])
        }));
        let points: Vec<Point> = lttb_stream(source, 100, 10, ColumnPair::default())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(points.len(), 10);
        assert_eq!(points[9][0], 99.0);
    }

    #[tokio::test]
    async fn test_pass_through() {
        for threshold in [0, 5, 50] {
            let points: Vec<Point> = lttb_stream(rows(5), 5, threshold, ColumnPair::new(1, 0))
                .try_collect()
                .await
                .unwrap();
            assert_eq!(points.len(), 5);
            assert_eq!(points[3], [3f64.sin(), 3.0]);
        }
    }

    #[tokio::test]
    async fn test_invalid_threshold_is_first_item() {
        let items: Vec<_> = lttb_stream(rows(5), 5, 2, ColumnPair::default())
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(LttbError::InvalidThreshold { threshold: 2 })));
    }

    #[tokio::test]
    async fn test_unexpected_end_of_data() {
        let items: Vec<_> = lttb_stream(rows(20), 40, 10, ColumnPair::default())
            .collect()
            .await;
        let (last, emitted) = items.split_last().unwrap();
        assert!(emitted.iter().all(Result::is_ok));
        assert!(matches!(
            last,
            Err(LttbError::UnexpectedEndOfData {
                expected: 40,
                received: 20
            })
        ));
    }

    #[tokio::test]
    async fn test_source_error_is_wrapped() {
        #[derive(Debug)]
        struct Broken;
        impl std::fmt::Display for Broken {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "broken source")
            }
        }
        impl Error for Broken {}

        let source = stream::iter(vec![Ok(vec![0.0, 0.0]), Err(Broken)]);
        let err = lttb_stream(source, 10, 4, ColumnPair::default())
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert!(matches!(err, LttbError::Source(_)));
        assert!(err.to_string().contains("broken source"));
    }
}
