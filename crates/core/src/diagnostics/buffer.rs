use std::collections::VecDeque;

/// A fixed-capacity FIFO buffer. Once full, each push evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
    evicted: u64,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            capacity,
            items: VecDeque::with_capacity(capacity),
            evicted: 0,
        }
    }

    /// Append an entry, evicting the oldest one when the buffer is full.
    /// A zero-capacity buffer discards every entry.
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            self.evicted += 1;
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
            self.evicted += 1;
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries discarded since the buffer was created.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy the current contents, oldest first. Does not clear the buffer.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_most_recent_entries_in_order() {
        let mut buf = RingBuffer::new(3);
        for i in 0..7 {
            buf.push(i);
        }
        assert_eq!(buf.to_vec(), vec![4, 5, 6]);
        assert_eq!(buf.evicted(), 4);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn below_capacity_keeps_everything() {
        let mut buf = RingBuffer::new(5);
        buf.push("a");
        buf.push("b");
        assert_eq!(buf.to_vec(), vec!["a", "b"]);
        assert_eq!(buf.evicted(), 0);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut buf = RingBuffer::new(0);
        buf.push(1);
        buf.push(2);
        assert!(buf.is_empty());
        assert_eq!(buf.evicted(), 2);
    }

    #[test]
    fn to_vec_does_not_drain() {
        let mut buf = RingBuffer::new(2);
        buf.push(1);
        let first = buf.to_vec();
        let second = buf.to_vec();
        assert_eq!(first, second);
        assert_eq!(buf.len(), 1);
    }
}
