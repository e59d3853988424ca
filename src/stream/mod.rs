//! Typed stream plumbing.
//!
//! Pipelines are built from ordinary [`Stream`]s of `Result` items. A [`Stage`] is a stateful,
//! synchronous transform that may emit any number of outputs per input and flush more when the
//! input ends; [`through`] runs a stage over a stream. [`tee`] broadcasts one stream to several
//! consumers. Writable ends are [`ByteSink`]s.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

mod sink;

pub use sink::{ByteSink, ChunkWriter};

/// A stateful transform from `Input` items to `Output` items.
pub trait Stage: Send {
    type Input;
    type Output;
    type Error;

    /// Consumes one input, pushing any outputs it produces onto `out`.
    fn process(
        &mut self,
        item: Self::Input,
        out: &mut VecDeque<Self::Output>,
    ) -> Result<(), Self::Error>;

    /// Called once after the last input. May push remaining outputs onto `out`.
    fn finish(&mut self, _out: &mut VecDeque<Self::Output>) -> Result<(), Self::Error> {
        Ok(())
    }
}

struct Through<St, S: Stage> {
    source: Pin<Box<St>>,
    stage: S,
    queue: VecDeque<S::Output>,
    done: bool,
}

/// Runs `stage` over `source`.
///
/// The first error, from the source or from the stage, ends the output stream.
pub fn through<St, S, E>(source: St, stage: S) -> BoxStream<'static, Result<S::Output, S::Error>>
where
    St: Stream<Item = Result<S::Input, E>> + Send + 'static,
    S: Stage + 'static,
    S::Input: Send,
    S::Output: Send + 'static,
    S::Error: From<E> + Send + 'static,
    E: 'static,
{
    let state = Through {
        source: Box::pin(source),
        stage,
        queue: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queue.pop_front() {
                return Some((Ok(item), state));
            }
            if state.done {
                return None;
            }
            match state.source.next().await {
                Some(Ok(item)) => {
                    if let Err(e) = state.stage.process(item, &mut state.queue) {
                        return Some((Err(e), state.halt()));
                    }
                }
                Some(Err(e)) => return Some((Err(e.into()), state.halt())),
                None => {
                    state.done = true;
                    if let Err(e) = state.stage.finish(&mut state.queue) {
                        return Some((Err(e), state.halt()));
                    }
                }
            }
        }
    })
    .boxed()
}

impl<St, S: Stage> Through<St, S> {
    fn halt(mut self) -> Self {
        self.done = true;
        self.queue.clear();
        self
    }
}

/// Broadcasts `source` to `branches` independent streams.
///
/// Every branch sees every item. Errors are shared between the branches through an [`Arc`].
/// A background task pulls from the source as fast as the slowest branch allows, buffering at
/// most `capacity` items per branch, so branches must be consumed concurrently. A branch that
/// is dropped stops receiving items; when all are dropped the source is dropped too.
///
/// Must be called from within a Tokio runtime.
pub fn tee<T, E, St>(
    source: St,
    branches: usize,
    capacity: usize,
) -> Vec<BoxStream<'static, Result<T, Arc<E>>>>
where
    St: Stream<Item = Result<T, E>> + Send + 'static,
    T: Clone + Send + 'static,
    E: Send + Sync + 'static,
{
    let mut senders = Vec::with_capacity(branches);
    let mut outputs = Vec::with_capacity(branches);
    for _ in 0..branches {
        let (tx, rx) = mpsc::channel::<Result<T, Arc<E>>>(capacity.max(1));
        senders.push(tx);
        outputs.push(
            stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
                .boxed(),
        );
    }

    tokio::spawn(async move {
        let mut source = Box::pin(source);
        while !senders.is_empty() {
            let Some(item) = source.next().await else {
                break;
            };
            let failed = item.is_err();
            let item = item.map_err(Arc::new);

            let mut open = Vec::with_capacity(senders.len());
            for tx in senders {
                if tx.send(item.clone()).await.is_ok() {
                    open.push(tx);
                }
            }
            senders = open;
            if failed {
                break;
            }
        }
    });

    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use std::fmt;

    #[derive(Debug, PartialEq)]
    struct TestError(String);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    /// Groups consecutive numbers into pairs, failing on a dangling number.
    struct Pairs {
        held: Option<u32>,
    }

    impl Stage for Pairs {
        type Input = u32;
        type Output = (u32, u32);
        type Error = TestError;

        fn process(&mut self, item: u32, out: &mut VecDeque<(u32, u32)>) -> Result<(), TestError> {
            if item == 99 {
                return Err(TestError("bad input".into()));
            }
            match self.held.take() {
                Some(first) => out.push_back((first, item)),
                None => self.held = Some(item),
            }
            Ok(())
        }

        fn finish(&mut self, _out: &mut VecDeque<(u32, u32)>) -> Result<(), TestError> {
            match self.held {
                Some(n) => Err(TestError(format!("dangling {n}"))),
                None => Ok(()),
            }
        }
    }

    fn numbers(items: Vec<u32>) -> impl Stream<Item = Result<u32, TestError>> + Send + 'static {
        stream::iter(items.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn test_through_applies_stage() {
        let pairs: Vec<_> = through(numbers(vec![1, 2, 3, 4]), Pairs { held: None })
            .try_collect()
            .await
            .unwrap();
        assert_eq!(pairs, vec![(1, 2), (3, 4)]);
    }

    #[tokio::test]
    async fn test_through_reports_finish_error() {
        let items: Vec<_> = through(numbers(vec![1, 2, 3]), Pairs { held: None })
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok((1, 2)));
        assert_eq!(items[1], Err(TestError("dangling 3".into())));
    }

    #[tokio::test]
    async fn test_through_stops_after_error() {
        let items: Vec<_> = through(numbers(vec![1, 99, 2, 3]), Pairs { held: None })
            .collect()
            .await;
        assert_eq!(items, vec![Err(TestError("bad input".into()))]);
    }

    #[tokio::test]
    async fn test_tee_delivers_everything_to_every_branch() {
        let branches = tee(numbers((0..100).collect()), 3, 4);
        let results =
            futures_util::future::join_all(branches.into_iter().map(|b| b.try_collect::<Vec<_>>()))
                .await;

        for result in results {
            assert_eq!(result.unwrap(), (0..100).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_tee_shares_errors() {
        let source = stream::iter(vec![Ok(1u32), Err(TestError("boom".into())), Ok(2)]);
        let branches = tee(source, 2, 4);
        let results = futures_util::future::join_all(
            branches.into_iter().map(|b| b.collect::<Vec<_>>()),
        )
        .await;

        for items in results {
            assert_eq!(items.len(), 2);
            assert_eq!(*items[0].as_ref().unwrap(), 1);
            assert_eq!(items[1].as_ref().unwrap_err().0, "boom");
        }
    }

    #[tokio::test]
    async fn test_tee_survives_dropped_branch() {
        let mut branches = tee(numbers((0..50).collect()), 2, 2);
        let kept = branches.pop().unwrap();
        drop(branches);

        let items: Vec<_> = kept.try_collect().await.unwrap();
        assert_eq!(items.len(), 50);
    }
}
