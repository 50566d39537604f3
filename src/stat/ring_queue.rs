//! Bounded ring queue with O(1) operations at both ends.
//!
//! Backs the monotonic deques inside `MovStats` and any place that needs a
//! bounded double-ended buffer without reallocation.

/// Fixed-capacity double-ended queue over a ring buffer.
pub struct RingQueue<T> {
    buf: Vec<Option<T>>,
    head: usize,
    tail: usize,
    len: usize,
}

impl<T> RingQueue<T> {
    /// Create a queue holding up to `capacity` elements.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring queue: capacity must be greater than 0");
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        Self {
            buf,
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// Oldest element.
    pub fn front(&self) -> Option<&T> {
        if self.len == 0 {
            None
        } else {
            self.buf[self.head].as_ref()
        }
    }

    /// Newest element.
    pub fn back(&self) -> Option<&T> {
        if self.len == 0 {
            None
        } else {
            let idx = self.wrap_back(self.tail);
            self.buf[idx].as_ref()
        }
    }

    /// Append at the back. Panics if full; callers size the queue to the
    /// window they slide over.
    pub fn push_back(&mut self, value: T) {
        assert!(!self.is_full(), "ring queue: push into full queue");
        self.buf[self.tail] = Some(value);
        self.tail = self.wrap_fwd(self.tail);
        self.len += 1;
    }

    /// Prepend at the front. Panics if full.
    pub fn push_front(&mut self, value: T) {
        assert!(!self.is_full(), "ring queue: push into full queue");
        self.head = self.wrap_back(self.head);
        self.buf[self.head] = Some(value);
        self.len += 1;
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.buf[self.head].take();
        self.head = self.wrap_fwd(self.head);
        self.len -= 1;
        value
    }

    pub fn pop_back(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.tail = self.wrap_back(self.tail);
        let value = self.buf[self.tail].take();
        self.len -= 1;
        value
    }

    pub fn clear(&mut self) {
        while self.pop_front().is_some() {}
    }

    fn wrap_fwd(&self, idx: usize) -> usize {
        if idx + 1 == self.buf.len() {
            0
        } else {
            idx + 1
        }
    }

    fn wrap_back(&self, idx: usize) -> usize {
        if idx == 0 {
            self.buf.len() - 1
        } else {
            idx - 1
        }
    }
}
