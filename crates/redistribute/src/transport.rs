//! Message-passing seam with an in-process backend.
//!
//! Messages are contiguous byte ranges keyed by (peer rank, tag). All
//! handles are waitable but non-blocking at post time; the exchange layer
//! calls `wait` before it trusts that a buffer is complete.
//!
//! [`LocalTransport`] runs every rank as a thread of one process, the same
//! way the simulation coordinator runs subdomains on threads. A network
//! backend (e.g. MPI) can be added later as a drop-in replacement behind
//! the [`Transport`] trait.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Handle for a posted non-blocking send.
///
/// Waiting guarantees the message has been handed off and the source
/// buffer is reusable.
pub struct SendRequest(Option<Box<dyn FnOnce() + Send>>);

impl SendRequest {
    /// A send that completed at post time (message already buffered).
    pub fn completed() -> Self {
        Self(None)
    }

    /// Construct a send whose completion runs the given closure.
    pub fn pending(f: Box<dyn FnOnce() + Send>) -> Self {
        Self(Some(f))
    }

    /// Block until the send has completed.
    pub fn wait(self) {
        if let Some(f) = self.0 {
            f()
        }
    }
}

/// Handle for a posted non-blocking receive.
///
/// Waiting blocks until the matching message arrives and yields its bytes.
pub struct RecvRequest(Box<dyn FnOnce() -> Vec<u8> + Send>);

impl RecvRequest {
    /// Construct a receive whose completion runs the given closure.
    pub fn pending(f: Box<dyn FnOnce() -> Vec<u8> + Send>) -> Self {
        Self(f)
    }

    /// Block until the message arrives and return it.
    pub fn wait(self) -> Vec<u8> {
        (self.0)()
    }
}

/// Non-blocking point-to-point transport plus the one collective the
/// global handshake needs.
///
/// Tags returned by [`Transport::next_tag`] must be drawn in the same
/// order on every rank so that concurrent exchanges agree on their tags.
pub trait Transport: Send + Sync {
    /// This process's rank.
    fn rank(&self) -> usize;

    /// Total number of ranks.
    fn num_ranks(&self) -> usize;

    /// Draw the next tag in this rank's tag sequence.
    fn next_tag(&self) -> u16;

    /// Post a non-blocking send of `message` to `peer`.
    fn isend(&self, peer: usize, tag: u16, message: Vec<u8>) -> SendRequest;

    /// Post a non-blocking receive from `peer`.
    fn irecv(&self, peer: usize, tag: u16) -> RecvRequest;

    /// Collective: every rank contributes `counts[r]` for each rank `r`
    /// and receives back what every rank contributed for *it*.
    ///
    /// Blocks until all ranks have entered the collective.
    fn alltoall_counts(&self, counts: &[u64]) -> Vec<u64>;
}

// ---------------------------------------------------------------------------
// In-process backend
// ---------------------------------------------------------------------------

type MailboxKey = (usize, usize, u16); // (src, dst, tag)

struct AllToAllState {
    rows: Vec<Option<Vec<u64>>>,
    drained: usize,
    draining: bool,
}

struct Shared {
    mailboxes: Mutex<HashMap<MailboxKey, VecDeque<Vec<u8>>>>,
    delivered: Condvar,
    a2a: Mutex<AllToAllState>,
    a2a_cv: Condvar,
}

/// In-process multi-rank transport over shared mailboxes.
///
/// Each rank runs on its own thread and owns one `LocalTransport` cloned
/// from the same cluster. Sends are buffered (they complete at post time);
/// receives block in `wait` until the matching message is deposited.
pub struct LocalTransport {
    rank: usize,
    num_ranks: usize,
    tag_counter: AtomicU16,
    shared: Arc<Shared>,
}

impl LocalTransport {
    /// Create `n` connected rank endpoints.
    pub fn cluster(n: usize) -> Vec<LocalTransport> {
        assert!(n > 0, "cluster requires at least one rank");
        let shared = Arc::new(Shared {
            mailboxes: Mutex::new(HashMap::new()),
            delivered: Condvar::new(),
            a2a: Mutex::new(AllToAllState {
                rows: vec![None; n],
                drained: 0,
                draining: false,
            }),
            a2a_cv: Condvar::new(),
        });
        (0..n)
            .map(|rank| LocalTransport {
                rank,
                num_ranks: n,
                tag_counter: AtomicU16::new(0),
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    fn next_tag(&self) -> u16 {
        // Tags are drawn in pairs: one for size metadata, one for data.
        self.tag_counter.fetch_add(2, Ordering::Relaxed)
    }

    fn isend(&self, peer: usize, tag: u16, message: Vec<u8>) -> SendRequest {
        assert!(peer < self.num_ranks, "send to unknown rank {}", peer);
        let key = (self.rank, peer, tag);
        let mut boxes = self.shared.mailboxes.lock().unwrap();
        boxes.entry(key).or_default().push_back(message);
        self.shared.delivered.notify_all();
        SendRequest::completed()
    }

    fn irecv(&self, peer: usize, tag: u16) -> RecvRequest {
        assert!(peer < self.num_ranks, "receive from unknown rank {}", peer);
        let key = (peer, self.rank, tag);
        let shared = Arc::clone(&self.shared);
        RecvRequest::pending(Box::new(move || {
            let mut boxes = shared.mailboxes.lock().unwrap();
            loop {
                if let Some(queue) = boxes.get_mut(&key) {
                    if let Some(message) = queue.pop_front() {
                        return message;
                    }
                }
                boxes = shared.delivered.wait(boxes).unwrap();
            }
        }))
    }

    fn alltoall_counts(&self, counts: &[u64]) -> Vec<u64> {
        assert_eq!(
            counts.len(),
            self.num_ranks,
            "all-to-all contribution must have one entry per rank"
        );
        if self.num_ranks == 1 {
            return counts.to_vec();
        }

        let mut st = self.shared.a2a.lock().unwrap();

        // A previous round may still be draining; wait it out.
        while st.draining {
            st = self.shared.a2a_cv.wait(st).unwrap();
        }

        st.rows[self.rank] = Some(counts.to_vec());
        if st.rows.iter().all(|r| r.is_some()) {
            st.draining = true;
            self.shared.a2a_cv.notify_all();
        } else {
            while !st.draining {
                st = self.shared.a2a_cv.wait(st).unwrap();
            }
        }

        let out: Vec<u64> = (0..self.num_ranks)
            .map(|r| st.rows[r].as_ref().unwrap()[self.rank])
            .collect();

        st.drained += 1;
        if st.drained == self.num_ranks {
            for row in st.rows.iter_mut() {
                *row = None;
            }
            st.drained = 0;
            st.draining = false;
            self.shared.a2a_cv.notify_all();
        }
        out
    }
}
