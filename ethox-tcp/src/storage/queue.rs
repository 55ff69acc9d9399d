use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::NetBuf;

/// A byte stream stored as a queue of buffers.
///
/// This backs the send buffer of a socket. Application data is appended as whole buffers while
/// the protocol consumes it by byte count.
#[derive(Clone, Debug, Default)]
pub struct BufQueue {
    bufs: VecDeque<NetBuf>,
    size: usize,
}

impl BufQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        BufQueue::default()
    }

    /// Total number of bytes in the queue.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Check if the queue holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Append a buffer at the end of the stream.
    pub fn push_back(&mut self, buf: NetBuf) {
        if buf.is_empty() {
            return;
        }
        self.size += buf.len();
        self.bufs.push_back(buf);
    }

    /// Take back the buffer appended last.
    pub fn pop_back(&mut self) -> Option<NetBuf> {
        let buf = self.bufs.pop_back()?;
        self.size -= buf.len();
        Some(buf)
    }

    /// Drop up to `count` bytes from the front, returning how many were dropped.
    pub fn trim_front(&mut self, mut count: usize) -> usize {
        let mut trimmed = 0;
        while count > 0 {
            let front = match self.bufs.front_mut() {
                Some(front) => front,
                None => break,
            };
            if front.len() <= count {
                count -= front.len();
                trimmed += front.len();
                self.bufs.pop_front();
            } else {
                *front = front.trim_head(count);
                trimmed += count;
                count = 0;
            }
        }
        self.size -= trimmed;
        trimmed
    }

    /// Get `len` bytes starting at `offset` as one buffer.
    ///
    /// The result is a view into the stored buffer when the range lies within a single one, and
    /// a fresh copy otherwise. Returns fewer bytes if the queue ends early.
    pub fn copy_range(&self, mut offset: usize, len: usize) -> NetBuf {
        let mut parts = Vec::new();
        let mut remaining = len;
        for buf in self.bufs.iter() {
            if remaining == 0 {
                break;
            }
            if offset >= buf.len() {
                offset -= buf.len();
                continue;
            }
            let take = (buf.len() - offset).min(remaining);
            parts.push(buf.slice(offset..offset + take));
            remaining -= take;
            offset = 0;
        }
        NetBuf::concat(&parts)
    }

    /// Remove every buffer.
    pub fn clear(&mut self) {
        self.bufs.clear();
        self.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled() -> BufQueue {
        let mut queue = BufQueue::new();
        queue.push_back(NetBuf::from_slice(b"hello "));
        queue.push_back(NetBuf::empty());
        queue.push_back(NetBuf::from_slice(b"world"));
        queue
    }

    #[test]
    fn range_across_buffers() {
        let queue = filled();
        assert_eq!(queue.len(), 11);
        assert_eq!(queue.copy_range(0, 5).as_slice(), b"hello");
        assert_eq!(queue.copy_range(4, 4).as_slice(), b"o wo");
        assert_eq!(queue.copy_range(8, 10).as_slice(), b"rld");
        assert!(queue.copy_range(11, 1).is_empty());
    }

    #[test]
    fn trimming() {
        let mut queue = filled();
        assert_eq!(queue.trim_front(3), 3);
        assert_eq!(queue.copy_range(0, 4).as_slice(), b"lo w");
        assert_eq!(queue.trim_front(100), 8);
        assert!(queue.is_empty());
        assert_eq!(queue.trim_front(1), 0);
    }

    #[test]
    fn undo_append() {
        let mut queue = filled();
        assert_eq!(queue.pop_back().unwrap().as_slice(), b"world");
        assert_eq!(queue.len(), 6);
    }
}
