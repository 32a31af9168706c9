use super::*;

/// A retained event and its position in the append order.
#[derive(Debug, Clone)]
pub struct Entry {
    pub seq: u64,
    pub event: Arc<LogEvent>,
}

/// Thread-safe, fixed-capacity store of the most recent log events.
///
/// Appends past capacity evict from the head. Knows nothing about subscribers.
pub struct RingBuffer {
    capacity: NonZeroUsize,
    inner: Mutex<Inner>,
}

struct Inner {
    entries: VecDeque<Entry>,
    appended: u64,
}

impl RingBuffer {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity.get()),
                appended: 0,
            }),
        }
    }

    /// Appends `event` and returns it with its sequence number. Sequence
    /// numbers start at 1 and increase by one per append.
    pub fn append(&self, event: LogEvent) -> Entry {
        let mut inner = self.inner.lock();

        inner.appended += 1;

        let entry = Entry {
            seq: inner.appended,
            event: Arc::new(event),
        };

        inner.entries.push_back(entry.clone());

        while inner.entries.len() > self.capacity.get() {
            inner.entries.pop_front();
        }

        entry
    }

    /// Independent copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Total number of appends since creation, including evicted entries.
    pub fn total_appended(&self) -> u64 {
        self.inner.lock().appended
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(capacity: usize) -> RingBuffer {
        RingBuffer::new(NonZeroUsize::new(capacity).unwrap())
    }

    fn event(message: &str) -> LogEvent {
        LogEvent::new(Level::Info, "test", message)
    }

    fn messages(entries: &[Entry]) -> Vec<String> {
        entries
            .iter()
            .map(|entry| entry.event.message.clone())
            .collect()
    }

    #[test]
    fn append_and_snapshot() {
        let buffer = buffer(10);

        buffer.append(event("one"));
        buffer.append(event("two"));

        let snapshot = buffer.snapshot();
        assert_eq!(messages(&snapshot), ["one", "two"]);
        assert_eq!(snapshot[0].seq, 1);
        assert_eq!(snapshot[1].seq, 2);
    }

    #[test]
    fn retains_only_the_most_recent_entries() {
        let buffer = buffer(3);

        for i in 1..=10 {
            buffer.append(event(&format!("msg {i}")));
        }

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(messages(&snapshot), ["msg 8", "msg 9", "msg 10"]);
        assert_eq!(
            snapshot.iter().map(|entry| entry.seq).collect::<Vec<_>>(),
            [8, 9, 10]
        );
        assert_eq!(buffer.total_appended(), 10);
    }

    #[test]
    fn capacity_of_one_keeps_latest() {
        let buffer = buffer(1);

        buffer.append(event("first"));
        buffer.append(event("second"));

        assert_eq!(messages(&buffer.snapshot()), ["second"]);
    }

    #[test]
    fn snapshot_is_independent_of_later_appends() {
        let buffer = buffer(2);

        buffer.append(event("a"));
        let before = buffer.snapshot();

        buffer.append(event("b"));
        buffer.append(event("c"));

        assert_eq!(messages(&before), ["a"]);
        assert_eq!(messages(&buffer.snapshot()), ["b", "c"]);
    }

    #[test]
    fn clear_keeps_sequence() {
        let buffer = buffer(4);

        buffer.append(event("a"));
        buffer.append(event("b"));
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.append(event("c")).seq, 3);
    }

    #[test]
    fn concurrent_appends_are_all_accounted_for() {
        const PRODUCERS: usize = 8;
        const PER_PRODUCER: usize = 500;

        let buffer = buffer(1000);

        thread::scope(|scope| {
            for producer in 0..PRODUCERS {
                let buffer = &buffer;
                scope.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        buffer.append(event(&format!("{producer}-{i}")));
                    }
                });
            }
        });

        let snapshot = buffer.snapshot();

        assert_eq!(buffer.total_appended(), (PRODUCERS * PER_PRODUCER) as u64);
        assert_eq!(snapshot.len(), 1000.min(PRODUCERS * PER_PRODUCER));

        for window in snapshot.windows(2) {
            assert_eq!(window[1].seq, window[0].seq + 1);
        }

        assert_eq!(
            snapshot.last().unwrap().seq,
            (PRODUCERS * PER_PRODUCER) as u64
        );
    }

    #[test]
    fn concurrent_snapshots_never_exceed_capacity() {
        let buffer = buffer(16);

        thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..2000 {
                    buffer.append(event(&i.to_string()));
                }
            });

            scope.spawn(|| {
                for _ in 0..2000 {
                    let snapshot = buffer.snapshot();
                    assert!(snapshot.len() <= 16);
                    for window in snapshot.windows(2) {
                        assert_eq!(window[1].seq, window[0].seq + 1);
                    }
                }
            });
        });
    }
}
