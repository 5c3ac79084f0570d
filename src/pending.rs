//! Cancel-safe queue of outstanding user-mode I/O requests.
//!
//! Holds reads waiting for data and writes whose frame is in flight toward
//! the host stack. The queue owns its own lock, distinct from the adapter
//! control lock, so cancellation never contends with control-path work.
//!
//! Completion and cancellation are mutually exclusive by construction:
//! removing a request from the queue transfers ownership of it, and only the
//! owner may complete it. Whichever side loses the race to remove observes
//! the request already gone and no-ops. The submitting side waits on a
//! oneshot channel carried by its ticket.

use std::collections::VecDeque;

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{TapError, TapResult};

pub type RequestId = u64;
pub type HandleId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// A read with nothing queued yet.
    Read,
    /// A write indicated to the host stack; `indication` links it to the
    /// in-flight receive buffer, `len` is the byte count reported on success.
    Write { indication: u64, len: usize },
}

enum Completer {
    Read(Sender<TapResult<Vec<u8>>>),
    Write(Sender<TapResult<usize>>),
}

/// One not-yet-completed user-mode I/O operation.
pub struct PendingRequest {
    pub id: RequestId,
    pub handle: HandleId,
    pub kind: RequestKind,
    completer: Completer,
}

impl PendingRequest {
    pub fn read(id: RequestId, handle: HandleId) -> (Self, ReadTicket) {
        let (tx, rx) = bounded(1);
        (
            Self {
                id,
                handle,
                kind: RequestKind::Read,
                completer: Completer::Read(tx),
            },
            ReadTicket { id, rx },
        )
    }

    pub fn write(
        id: RequestId,
        handle: HandleId,
        indication: u64,
        len: usize,
    ) -> (Self, WriteTicket) {
        let (tx, rx) = bounded(1);
        (
            Self {
                id,
                handle,
                kind: RequestKind::Write { indication, len },
                completer: Completer::Write(tx),
            },
            WriteTicket { id, rx },
        )
    }

    pub fn is_read(&self) -> bool {
        matches!(self.kind, RequestKind::Read)
    }

    /// Indication id for in-flight writes.
    pub fn indication(&self) -> Option<u64> {
        match self.kind {
            RequestKind::Write { indication, .. } => Some(indication),
            RequestKind::Read => None,
        }
    }

    /// Complete a read with one frame. Consumes the request; a dropped
    /// receiver (caller went away) is fine.
    pub fn complete_read(self, frame: Vec<u8>) {
        if let Completer::Read(tx) = self.completer {
            let _ = tx.send(Ok(frame));
        } else {
            debug_assert!(false, "completing a write request as a read");
        }
    }

    /// Complete a write successfully, reporting the bytes consumed.
    pub fn complete_write(self) {
        if let RequestKind::Write { len, .. } = self.kind {
            if let Completer::Write(tx) = self.completer {
                let _ = tx.send(Ok(len));
            }
        } else {
            debug_assert!(false, "completing a read request as a write");
        }
    }

    /// Complete with a failure status, whatever the kind.
    pub fn fail(self, err: TapError) {
        match self.completer {
            Completer::Read(tx) => {
                let _ = tx.send(Err(err));
            }
            Completer::Write(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }

    pub fn cancel(self) {
        trace!(id = self.id, "cancelling pending request");
        self.fail(TapError::Cancelled);
    }
}

/// Held by the submitter of a pending read.
#[derive(Debug)]
pub struct ReadTicket {
    pub id: RequestId,
    rx: Receiver<TapResult<Vec<u8>>>,
}

impl ReadTicket {
    /// Block until the request completes or is cancelled.
    pub fn wait(self) -> TapResult<Vec<u8>> {
        self.rx.recv().unwrap_or(Err(TapError::Cancelled))
    }

    pub fn try_wait(&self) -> Option<TapResult<Vec<u8>>> {
        self.rx.try_recv().ok()
    }
}

/// Held by the submitter of a pending write.
#[derive(Debug)]
pub struct WriteTicket {
    pub id: RequestId,
    rx: Receiver<TapResult<usize>>,
}

impl WriteTicket {
    pub fn wait(self) -> TapResult<usize> {
        self.rx.recv().unwrap_or(Err(TapError::Cancelled))
    }

    pub fn try_wait(&self) -> Option<TapResult<usize>> {
        self.rx.try_recv().ok()
    }
}

/// Thread-safe FIFO of pending requests with O(n) targeted removal.
pub struct PendingQueue {
    inner: Mutex<VecDeque<PendingRequest>>,
    capacity: usize,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Insert at the tail. Fails with `Busy` at capacity instead of growing
    /// unboundedly behind a stalled reader.
    pub fn enqueue(&self, request: PendingRequest) -> TapResult<()> {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            return Err(TapError::Busy);
        }
        queue.push_back(request);
        Ok(())
    }

    /// Put a request back at the head. Only for requests that were just
    /// removed, so capacity was already accounted for.
    pub fn requeue_front(&self, request: PendingRequest) {
        self.inner.lock().push_front(request);
    }

    /// Remove a specific request. Idempotent: a second removal of the same
    /// id observes it gone and returns None.
    pub fn remove(&self, id: RequestId) -> Option<PendingRequest> {
        self.remove_matching(|r| r.id == id)
    }

    /// Remove the first request satisfying the predicate, from anywhere in
    /// the queue.
    pub fn remove_matching<F>(&self, pred: F) -> Option<PendingRequest>
    where
        F: Fn(&PendingRequest) -> bool,
    {
        let mut queue = self.inner.lock();
        let pos = queue.iter().position(pred)?;
        queue.remove(pos)
    }

    /// Remove every request satisfying the predicate. Used to flush requests
    /// belonging to a closing handle.
    pub fn drain_matching<F>(&self, pred: F) -> Vec<PendingRequest>
    where
        F: Fn(&PendingRequest) -> bool,
    {
        let mut queue = self.inner.lock();
        let mut taken = Vec::new();
        let mut i = 0;
        while i < queue.len() {
            if pred(&queue[i]) {
                if let Some(req) = queue.remove(i) {
                    taken.push(req);
                }
            } else {
                i += 1;
            }
        }
        taken
    }

    /// Remove the oldest waiting read, if any.
    pub fn pop_read(&self) -> Option<PendingRequest> {
        self.remove_matching(|r| r.is_read())
    }

    /// Out-of-band cancellation. Returns false when the request was already
    /// completed or cancelled by the other side of the race.
    pub fn cancel(&self, id: RequestId) -> bool {
        match self.remove(id) {
            Some(req) => {
                req.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_bounded() {
        let q = PendingQueue::new(2);
        let (r1, _t1) = PendingRequest::read(1, 1);
        let (r2, _t2) = PendingRequest::read(2, 1);
        let (r3, _t3) = PendingRequest::read(3, 1);
        q.enqueue(r1).unwrap();
        q.enqueue(r2).unwrap();
        assert_eq!(q.enqueue(r3), Err(TapError::Busy));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let q = PendingQueue::new(4);
        let (req, _ticket) = PendingRequest::read(7, 1);
        q.enqueue(req).unwrap();
        assert!(q.remove(7).is_some());
        assert!(q.remove(7).is_none());
    }

    #[test]
    fn test_cancel_completes_with_cancelled() {
        let q = PendingQueue::new(4);
        let (req, ticket) = PendingRequest::read(1, 1);
        q.enqueue(req).unwrap();
        assert!(q.cancel(1));
        assert_eq!(ticket.wait(), Err(TapError::Cancelled));
        assert!(!q.cancel(1));
    }

    #[test]
    fn test_drain_by_handle() {
        let q = PendingQueue::new(8);
        for (id, handle) in [(1, 10), (2, 20), (3, 10), (4, 30)] {
            let (req, _t) = PendingRequest::read(id, handle);
            q.enqueue(req).unwrap();
        }
        let flushed = q.drain_matching(|r| r.handle == 10);
        assert_eq!(flushed.len(), 2);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_pop_read_skips_writes() {
        let q = PendingQueue::new(8);
        let (w, _wt) = PendingRequest::write(1, 1, 99, 60);
        let (r, _rt) = PendingRequest::read(2, 1);
        q.enqueue(w).unwrap();
        q.enqueue(r).unwrap();
        let popped = q.pop_read().unwrap();
        assert_eq!(popped.id, 2);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_cancel_vs_complete_race_completes_once() {
        use std::sync::Arc;

        for _ in 0..200 {
            let q = Arc::new(PendingQueue::new(4));
            let (req, ticket) = PendingRequest::write(1, 1, 5, 42);
            q.enqueue(req).unwrap();

            let canceller = {
                let q = Arc::clone(&q);
                std::thread::spawn(move || q.cancel(1))
            };
            let completer = {
                let q = Arc::clone(&q);
                std::thread::spawn(move || match q.remove(1) {
                    Some(r) => {
                        r.complete_write();
                        true
                    }
                    None => false,
                })
            };

            let cancelled = canceller.join().unwrap();
            let completed = completer.join().unwrap();
            // Exactly one side wins.
            assert!(cancelled ^ completed);

            match ticket.wait() {
                Ok(len) => {
                    assert!(completed);
                    assert_eq!(len, 42);
                }
                Err(e) => {
                    assert!(cancelled);
                    assert_eq!(e, TapError::Cancelled);
                }
            }
        }
    }
}
