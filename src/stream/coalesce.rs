//! Time-window batching for change streams

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep, sleep};

/// Extension trait to add coalescing to any Stream
pub trait CoalesceExt: Stream {
    /// Batch items that arrive within `window` of the first buffered item
    ///
    /// A batch is emitted once the window has elapsed since its first item,
    /// or when the inner stream ends. A zero window emits every item on its
    /// own.
    fn coalesce(self, window: Duration) -> Coalesce<Self>
    where
        Self: Sized,
    {
        Coalesce::new(self, window)
    }
}

impl<T: Stream> CoalesceExt for T {}

pin_project! {
    /// A stream combinator that merges bursts of items into batches
    pub struct Coalesce<S: Stream> {
        #[pin]
        stream: S,
        #[pin]
        deadline: Sleep,
        window: Duration,
        pending: Vec<S::Item>,
        armed: bool,
        done: bool,
    }
}

impl<S: Stream> Coalesce<S> {
    pub fn new(stream: S, window: Duration) -> Self {
        Self {
            stream,
            deadline: sleep(window),
            window,
            pending: Vec::new(),
            armed: false,
            done: false,
        }
    }

    /// Take whatever is buffered without waiting for the window
    pub fn flush(self: Pin<&mut Self>) -> Vec<S::Item> {
        let this = self.project();
        *this.armed = false;
        std::mem::take(this.pending)
    }

    /// Number of items waiting for the current window to close
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl<S: Stream> Stream for Coalesce<S> {
    type Item = Vec<S::Item>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // Drain everything that is ready right now
        while !*this.done {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    if this.window.is_zero() {
                        return Poll::Ready(Some(vec![item]));
                    }
                    if this.pending.is_empty() {
                        this.deadline.as_mut().reset(Instant::now() + *this.window);
                        *this.armed = true;
                    }
                    this.pending.push(item);
                }
                Poll::Ready(None) => *this.done = true,
                Poll::Pending => break,
            }
        }

        if *this.done {
            *this.armed = false;
            if this.pending.is_empty() {
                return Poll::Ready(None);
            }
            return Poll::Ready(Some(std::mem::take(this.pending)));
        }

        if *this.armed {
            ready!(this.deadline.as_mut().poll(cx));
            *this.armed = false;
            return Poll::Ready(Some(std::mem::take(this.pending)));
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    #[tokio::test(start_paused = true)]
    async fn burst_within_window_is_one_batch() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = Box::pin(UnboundedReceiverStream::new(rx).coalesce(Duration::from_millis(5)));

        tx.send(1).unwrap();
        tx.send(2).unwrap();
        tx.send(3).unwrap();

        assert_eq!(stream.next().await, Some(vec![1, 2, 3]));
    }

    #[tokio::test(start_paused = true)]
    async fn items_after_window_start_a_new_batch() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = Box::pin(UnboundedReceiverStream::new(rx).coalesce(Duration::from_millis(5)));

        tx.send("a").unwrap();
        assert_eq!(stream.next().await, Some(vec!["a"]));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send("b").unwrap();
        drop(tx);
        assert_eq!(stream.next().await, Some(vec!["b"]));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn zero_window_emits_each_item() {
        let stream = futures::stream::iter([1, 2, 3]).coalesce(Duration::ZERO);
        let batches: Vec<Vec<i32>> = stream.collect().await;
        assert_eq!(batches, vec![vec![1], vec![2], vec![3]]);
    }

    #[tokio::test(start_paused = true)]
    async fn end_of_stream_flushes_pending() {
        let stream = futures::stream::iter([7, 8]).coalesce(Duration::from_secs(60));
        let batches: Vec<Vec<i32>> = stream.collect().await;
        assert_eq!(batches, vec![vec![7, 8]]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_takes_buffered_items() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = Box::pin(UnboundedReceiverStream::new(rx).coalesce(Duration::from_secs(1)));

        tx.send(42).unwrap();
        let polled = tokio::time::timeout(Duration::from_millis(10), stream.next()).await;
        assert!(polled.is_err());
        assert_eq!(stream.pending_len(), 1);
        assert_eq!(stream.as_mut().flush(), vec![42]);
        assert_eq!(stream.pending_len(), 0);
    }
}
