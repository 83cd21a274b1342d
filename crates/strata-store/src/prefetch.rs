//! Background prefetch: move a slow upstream sequence onto a worker thread.
//!
//! The worker pushes items into a bounded queue; the consumer blocks only
//! when the queue is empty and the worker blocks only when it is full. The
//! stream ends with a terminal message that either marks normal exhaustion
//! or carries the upstream error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use strata_types::ObjectId;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::object::StoredObject;
use crate::traits::{ObjectStore, NOOP_LISTENER};

enum Message<T, E> {
    Item(T),
    End,
    Failed(E),
}

/// Iterator fed by a background producer through a bounded queue.
///
/// Dropping it before exhaustion cancels the producer and empties the
/// queue, so a producer blocked on a full queue wakes up and exits.
pub struct BackgroundIterator<T, E> {
    rx: Receiver<Message<T, E>>,
    cancelled: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    capacity: usize,
    finished: bool,
}

impl<T, E> BackgroundIterator<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Spawn a producer draining `upstream` into a queue of `capacity` items.
    ///
    /// The upstream iterator is dropped on the worker thread when it is
    /// exhausted, fails, or is cancelled, which releases whatever resource
    /// it holds.
    pub fn spawn<I>(upstream: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = Result<T, E>>,
        I::IntoIter: Send + 'static,
    {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        let drain = rx.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let upstream = upstream.into_iter();
        let worker = thread::Builder::new()
            .name("strata-prefetch".into())
            .spawn(move || produce(upstream, tx, drain, flag));

        match worker {
            Ok(handle) => Self {
                rx,
                cancelled,
                worker: Some(handle),
                capacity,
                finished: false,
            },
            // Without a worker the queue is never fed; report an empty,
            // finished stream rather than hanging the consumer.
            Err(e) => {
                warn!(error = %e, "failed to spawn prefetch worker");
                Self {
                    rx,
                    cancelled,
                    worker: None,
                    capacity,
                    finished: true,
                }
            }
        }
    }
}

impl<T, E> BackgroundIterator<T, E> {
    /// Items currently queued ahead of the consumer.
    pub fn buffered(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ask the producer to stop at its next item and discard queued items.
    pub fn cancel(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.cancelled.store(true, Ordering::Release);
        while self.rx.try_recv().is_ok() {}
    }
}

impl<T, E> Iterator for BackgroundIterator<T, E> {
    type Item = Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.rx.recv() {
            Ok(Message::Item(item)) => Some(Ok(item)),
            Ok(Message::Failed(err)) => {
                self.finished = true;
                Some(Err(err))
            }
            Ok(Message::End) => {
                self.finished = true;
                None
            }
            // Every sender is gone without a terminal message: the worker
            // panicked. Surface the panic on the consumer thread.
            Err(_) => {
                self.finished = true;
                if let Some(handle) = self.worker.take() {
                    if let Err(payload) = handle.join() {
                        std::panic::resume_unwind(payload);
                    }
                }
                None
            }
        }
    }
}

impl<T, E> Drop for BackgroundIterator<T, E> {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn produce<I, T, E>(
    upstream: I,
    tx: Sender<Message<T, E>>,
    drain: Receiver<Message<T, E>>,
    cancelled: Arc<AtomicBool>,
) where
    I: Iterator<Item = Result<T, E>>,
{
    let mut produced = 0u64;
    for next in upstream {
        if cancelled.load(Ordering::Acquire) {
            debug!(produced, "prefetch cancelled by consumer");
            return;
        }
        match next {
            Ok(item) => {
                if tx.send(Message::Item(item)).is_err() {
                    return;
                }
                produced += 1;
            }
            Err(err) => {
                warn!(produced, "prefetch upstream failed");
                // The error must not wait behind a full queue.
                match tx.try_send(Message::Failed(err)) {
                    Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                    Err(TrySendError::Full(msg)) => {
                        let discarded = drain.try_iter().count();
                        debug!(discarded, "drained prefetch queue to deliver error");
                        let _ = tx.send(msg);
                    }
                }
                return;
            }
        }
    }
    if !cancelled.load(Ordering::Acquire) {
        let _ = tx.send(Message::End);
    }
    debug!(produced, "prefetch upstream exhausted");
}

/// Fetch `ids` in chunks of `chunk_size` on a background worker.
///
/// Missing ids are skipped, as with [`ObjectStore::get_all`].
pub fn prefetch_all(
    store: Arc<dyn ObjectStore>,
    ids: Vec<ObjectId>,
    chunk_size: usize,
    capacity: usize,
) -> BackgroundIterator<(ObjectId, StoredObject), StoreError> {
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<Vec<ObjectId>> = ids.chunks(chunk_size).map(<[ObjectId]>::to_vec).collect();
    let upstream = chunks
        .into_iter()
        .map(move |chunk| store.get_all(&chunk, &NOOP_LISTENER))
        .flat_map(|batch| match batch {
            Ok(found) => found.into_iter().map(Ok).collect::<Vec<_>>(),
            Err(e) => vec![Err(e)],
        });
    BackgroundIterator::spawn(upstream, capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryObjectStore;
    use crate::object::ObjectKind;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn counted(n: usize, pulled: Arc<AtomicUsize>) -> impl Iterator<Item = Result<usize, String>> {
        (0..n).map(move |i| {
            pulled.fetch_add(1, Ordering::SeqCst);
            Ok(i)
        })
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn yields_all_items_in_order() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let it = BackgroundIterator::spawn(counted(1000, pulled), 16);
        let items: Vec<usize> = it.map(Result::unwrap).collect();
        assert_eq!(items, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn empty_upstream_ends_immediately() {
        let mut it = BackgroundIterator::<u8, String>::spawn(Vec::new(), 4);
        assert!(it.next().is_none());
        assert!(it.next().is_none());
    }

    #[test]
    fn producer_never_runs_more_than_capacity_ahead() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let capacity = 10;
        let mut it = BackgroundIterator::spawn(counted(10_000, Arc::clone(&pulled)), capacity);
        let mut consumed = 0;
        while let Some(item) = it.next() {
            item.unwrap();
            consumed += 1;
            assert!(it.buffered() <= capacity);
            // one extra item may sit in the producer's hands, blocked on send
            assert!(pulled.load(Ordering::SeqCst) <= consumed + capacity + 1);
            if consumed % 1000 == 0 {
                thread::sleep(Duration::from_millis(2));
            }
        }
        assert_eq!(consumed, 10_000);
    }

    #[test]
    fn upstream_error_reaches_the_consumer_promptly() {
        init_tracing();
        let capacity = 10;
        let upstream = (0..10_000usize).map(|i| {
            if i == 5_000 {
                Err(format!("boom at {i}"))
            } else {
                Ok(i)
            }
        });
        let mut it = BackgroundIterator::spawn(upstream, capacity);
        let mut ok_items = 0;
        let mut error = None;
        for item in it.by_ref() {
            match item {
                Ok(_) => ok_items += 1,
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }
        assert_eq!(error.as_deref(), Some("boom at 5000"));
        // at most one queue's worth of items is discarded to make room
        assert!(ok_items <= 5_000);
        assert!(ok_items + capacity >= 5_000);
        // the stream is finished after the error
        assert!(it.next().is_none());
    }

    #[test]
    fn dropping_early_releases_the_producer() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let infinite = (0..).map(move |i: u64| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<u64, String>(i)
        });
        let mut it = BackgroundIterator::spawn(infinite, 4);
        for _ in 0..5 {
            it.next().unwrap().unwrap();
        }
        drop(it);

        // the producer stops pulling once it observes the cancellation
        assert!(wait_for(|| {
            let before = pulled.load(Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            pulled.load(Ordering::SeqCst) == before
        }));
    }

    struct Closing {
        remaining: usize,
        fail: bool,
        closed: Arc<AtomicBool>,
    }

    impl Iterator for Closing {
        type Item = Result<usize, String>;

        fn next(&mut self) -> Option<Self::Item> {
            if self.remaining == 0 {
                return if self.fail {
                    self.fail = false;
                    Some(Err("resource failed".into()))
                } else {
                    None
                };
            }
            self.remaining -= 1;
            Some(Ok(self.remaining))
        }
    }

    impl Drop for Closing {
        fn drop(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn upstream_is_closed_after_failure() {
        let closed = Arc::new(AtomicBool::new(false));
        let upstream = Closing {
            remaining: 3,
            fail: true,
            closed: Arc::clone(&closed),
        };
        let results: Vec<_> = BackgroundIterator::spawn(upstream, 2).collect();
        assert_eq!(results.len(), 4);
        assert!(results[3].is_err());
        assert!(wait_for(|| closed.load(Ordering::SeqCst)));
    }

    #[test]
    fn prefetch_all_fetches_in_chunks() {
        let store = Arc::new(InMemoryObjectStore::new());
        let mut ids = Vec::new();
        for i in 0..25u32 {
            let id = ObjectId::from_bytes(&i.to_be_bytes());
            store
                .put(id, StoredObject::new(ObjectKind::Feature, i.to_be_bytes().to_vec()))
                .unwrap();
            ids.push(id);
        }
        ids.push(ObjectId::from_bytes(b"missing"));

        let fetched: Vec<_> = prefetch_all(store, ids.clone(), 7, 3)
            .map(Result::unwrap)
            .collect();
        assert_eq!(fetched.len(), 25);
        let fetched_ids: Vec<_> = fetched.iter().map(|(id, _)| *id).collect();
        assert_eq!(fetched_ids, ids[..25].to_vec());
    }
}
