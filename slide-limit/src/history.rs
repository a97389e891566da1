use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use parking_lot::MutexGuard;
use tracing::debug;
use tracing::trace;

/// Timestamp queues for one requester, index-aligned with its thresholds.
///
/// Stamps are nanoseconds from the owning limiter's clock anchor and are always pushed in
/// non-decreasing order.
#[derive(Debug, Default)]
pub(crate) struct Queues {
    pub(crate) stamps: Vec<VecDeque<u64>>,
    /// Longest window of the rule set last applied, in nanoseconds.
    pub(crate) horizon: u64,
    /// Set once the entry has been dropped from the store. Checks must not record here.
    pub(crate) evicted: bool,
}

impl Queues {
    fn new(threshold_count: usize) -> Self {
        Self {
            stamps: vec![VecDeque::new(); threshold_count],
            horizon: 0,
            evicted: false,
        }
    }

    /// Resize after a rule change. Surviving indices keep their history.
    pub(crate) fn align(&mut self, threshold_count: usize) {
        if self.stamps.len() != threshold_count {
            trace!(
                from = self.stamps.len(),
                to = threshold_count,
                "Realigning request history"
            );
            self.stamps.resize_with(threshold_count, VecDeque::new);
        }
    }

    pub(crate) fn newest(&self) -> Option<u64> {
        self.stamps.iter().filter_map(|q| q.back().copied()).max()
    }

    fn is_idle(&self, now: u64) -> bool {
        match self.newest() {
            Some(newest) => now.saturating_sub(newest) >= self.horizon,
            None => true,
        }
    }
}

/// One requester's history together with the lock that serialises its checks.
#[derive(Debug)]
pub struct HistoryEntry {
    queues: Mutex<Queues>,
}

impl HistoryEntry {
    fn new(threshold_count: usize) -> Self {
        Self {
            queues: Mutex::new(Queues::new(threshold_count)),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock()
    }

    /// Number of recorded stamps per threshold queue.
    pub fn sizes(&self) -> Vec<usize> {
        self.lock().stamps.iter().map(VecDeque::len).collect()
    }

    /// Whether this entry has been removed from its store.
    pub fn is_evicted(&self) -> bool {
        self.lock().evicted
    }
}

/// Keyed store of per-requester histories.
///
/// Entries are created lazily, exactly once per requester, and live until they are swept
/// or removed.
#[derive(Debug, Default)]
pub struct RequestHistory {
    entries: DashMap<String, Arc<HistoryEntry>>,
}

impl RequestHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `requester`, creating it with `threshold_count` empty queues
    /// if it does not exist. Concurrent callers racing on the same id all observe the same
    /// entry.
    pub fn get_or_create(&self, requester: &str, threshold_count: usize) -> Arc<HistoryEntry> {
        if let Some(entry) = self.entries.get(requester) {
            return Arc::clone(entry.value());
        }
        let entry = self
            .entries
            .entry(requester.to_owned())
            .or_insert_with(|| {
                debug!(requester, threshold_count, "Creating request history");
                Arc::new(HistoryEntry::new(threshold_count))
            });
        Arc::clone(entry.value())
    }

    pub fn get(&self, requester: &str) -> Option<Arc<HistoryEntry>> {
        self.entries
            .get(requester)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Queue sizes for `requester`, if it is tracked.
    pub fn snapshot(&self, requester: &str) -> Option<Vec<usize>> {
        self.get(requester).map(|entry| entry.sizes())
    }

    pub fn contains(&self, requester: &str) -> bool {
        self.entries.contains_key(requester)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget `requester`. Returns whether it was tracked.
    pub fn remove(&self, requester: &str) -> bool {
        match self.entries.remove(requester) {
            Some((_, entry)) => {
                entry.lock().evicted = true;
                true
            }
            None => false,
        }
    }

    /// Evict every entry whose newest stamp is at least its horizon old at `now`.
    ///
    /// Entries are only probed with `try_lock` while their shard is write-locked. An entry
    /// that is locked is in use and is kept, so a long check on one requester never holds
    /// up lookups for the others.
    pub(crate) fn sweep(&self, now: u64) -> usize {
        let mut evicted = 0;
        self.entries.retain(|requester, entry| {
            let Some(mut queues) = entry.queues.try_lock() else {
                return true;
            };
            if queues.is_idle(now) {
                trace!(requester = %requester, "Evicting idle request history");
                queues.evicted = true;
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn it_creates_entries_once() {
        let history = RequestHistory::new();
        let first = history.get_or_create("alice", 2);
        let second = history.get_or_create("alice", 2);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(history.len(), 1);
        assert_eq!(history.snapshot("alice"), Some(vec![0, 0]));
        assert_eq!(history.snapshot("bob"), None);
    }

    #[test]
    fn test_concurrent_creation_yields_one_entry() {
        let history = Arc::new(RequestHistory::new());
        let threads = 32;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let history = Arc::clone(&history);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    history.get_or_create("contended", 3)
                })
            })
            .collect();

        let entries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(entries.iter().all(|e| Arc::ptr_eq(e, &entries[0])));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_align_keeps_surviving_queues() {
        let mut queues = Queues::new(2);
        queues.stamps[0].push_back(5);
        queues.stamps[1].push_back(5);

        queues.align(3);
        assert_eq!(queues.stamps.len(), 3);
        assert_eq!(queues.stamps[0].len(), 1);
        assert!(queues.stamps[2].is_empty());

        queues.align(1);
        assert_eq!(queues.stamps.len(), 1);
        assert_eq!(queues.stamps[0].front(), Some(&5));
    }

    #[test]
    fn test_sweep_evicts_idle_entries_only() {
        let history = RequestHistory::new();

        let idle = history.get_or_create("idle", 1);
        {
            let mut queues = idle.lock();
            queues.horizon = 100;
            queues.stamps[0].push_back(0);
        }
        let busy = history.get_or_create("busy", 1);
        {
            let mut queues = busy.lock();
            queues.horizon = 100;
            queues.stamps[0].push_back(50);
        }
        // Never recorded anything, so it is idle straight away.
        let _empty = history.get_or_create("empty", 1);

        assert_eq!(history.sweep(100), 2);
        assert!(history.contains("busy"));
        assert!(!history.contains("idle"));
        assert!(idle.is_evicted());
        assert!(!busy.is_evicted());
    }

    #[test]
    fn test_sweep_skips_busy_entries_without_blocking() {
        let history = Arc::new(RequestHistory::new());
        for i in 0..1024 {
            history.get_or_create(&format!("user-{i}"), 1);
        }

        let held = history.get_or_create("user-0", 1);
        let guard = held.lock();

        let (tx, rx) = mpsc::channel();
        let sweeper = Arc::clone(&history);
        thread::spawn(move || {
            tx.send(sweeper.sweep(10)).unwrap();
        });

        let evicted = rx
            .recv_timeout(Duration::from_secs(1))
            .expect("sweep waited on a locked entry");
        assert_eq!(evicted, 1023);

        // Every other requester is still reachable while user-0 stays locked
        let (tx, rx) = mpsc::channel();
        let lookups = Arc::clone(&history);
        thread::spawn(move || {
            for i in 1..1024 {
                lookups.get_or_create(&format!("user-{i}"), 1);
            }
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(1))
            .expect("lookups blocked behind a locked entry");

        drop(guard);
        assert!(history.contains("user-0"));
        assert!(!held.is_evicted());
        assert_eq!(history.len(), 1024);
    }

    #[test]
    fn test_remove_marks_entry_evicted() {
        let history = RequestHistory::new();
        let entry = history.get_or_create("alice", 1);
        assert!(history.remove("alice"));
        assert!(!history.remove("alice"));
        assert!(entry.is_evicted());
        assert!(history.is_empty());
    }
}
