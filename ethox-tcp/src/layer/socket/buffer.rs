use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::storage::{BufQueue, NetBuf};
use super::token::Received;

/// Free space the send buffer needs before it takes another request, in bytes.
pub(crate) const LOW_WATER: usize = 2048;

/// The bytes the application handed over for transmission.
///
/// Holds both the data in flight and the data not yet sent. Bytes leave the buffer only when the
/// peer acknowledges them.
#[derive(Debug, Clone)]
pub(crate) struct SendBuffer {
    queue: BufQueue,
    high_water: usize,
    low_water: usize,
}

/// A contiguous run of received bytes.
#[derive(Debug, Clone)]
struct Chunk {
    data: NetBuf,
    /// Number of urgent bytes at the front of `data`.
    urgent: usize,
}

/// The in-order bytes delivered by the protocol but not yet read.
#[derive(Debug, Clone)]
pub(crate) struct RecvBuffer {
    chunks: VecDeque<Chunk>,
    size: usize,
    high_water: usize,
}

impl SendBuffer {
    pub(crate) fn new(high_water: usize) -> Self {
        SendBuffer {
            queue: BufQueue::new(),
            high_water,
            low_water: LOW_WATER,
        }
    }

    /// Bytes buffered, sent or not.
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// `max(0, high_water - len)`.
    pub(crate) fn free_space(&self) -> usize {
        self.high_water.saturating_sub(self.queue.len())
    }

    /// Whether a new send request may be processed right away.
    pub(crate) fn admits(&self) -> bool {
        self.free_space() >= self.low_water
    }

    pub(crate) fn push(&mut self, data: NetBuf) {
        self.queue.push_back(data);
    }

    /// Withdraw the data of a send request the protocol refused.
    pub(crate) fn unpush(&mut self) {
        let _ = self.queue.pop_back();
    }

    /// Bytes starting at `offset` from the oldest unacknowledged byte.
    pub(crate) fn get(&self, offset: usize, len: usize) -> NetBuf {
        self.queue.copy_range(offset, len)
    }

    /// Forget acknowledged bytes, returning how many were actually buffered.
    pub(crate) fn acknowledge(&mut self, count: usize) -> usize {
        self.queue.trim_front(count)
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
    }
}

impl RecvBuffer {
    pub(crate) fn new(high_water: usize) -> Self {
        RecvBuffer {
            chunks: VecDeque::new(),
            size: 0,
            high_water,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.size
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub(crate) fn high_water(&self) -> usize {
        self.high_water
    }

    /// `max(0, high_water - len)`, the basis of the advertised window.
    pub(crate) fn free_space(&self) -> usize {
        self.high_water.saturating_sub(self.size)
    }

    /// Append delivered bytes, the first `urgent` of which are urgent data.
    pub(crate) fn push(&mut self, data: NetBuf, urgent: usize) {
        if data.is_empty() {
            return;
        }
        let urgent = urgent.min(data.len());
        self.size += data.len();
        self.chunks.push_back(Chunk { data, urgent });
    }

    /// Remove up to `capacity` bytes of the same urgency as the oldest byte.
    pub(crate) fn take(&mut self, capacity: usize) -> Option<Received> {
        let urgent = self.chunks.front()?.urgent > 0;
        let mut parts = Vec::new();
        let mut left = capacity;

        while left > 0 {
            let chunk = match self.chunks.front_mut() {
                Some(chunk) => chunk,
                None => break,
            };
            let available = match (urgent, chunk.urgent) {
                (true, 0) => break,
                (true, count) => count,
                (false, 0) => chunk.data.len(),
                (false, _) => break,
            };
            let count = available.min(left);
            parts.push(chunk.data.slice(0..count));
            chunk.data = chunk.data.trim_head(count);
            if urgent {
                chunk.urgent -= count;
            }
            left -= count;
            self.size -= count;

            if chunk.data.is_empty() {
                self.chunks.pop_front();
            } else if urgent && chunk.urgent == 0 {
                // The rest of this chunk is normal data.
                break;
            }
        }

        Some(Received {
            data: NetBuf::concat(&parts),
            urgent,
        })
    }

    pub(crate) fn clear(&mut self) {
        self.chunks.clear();
        self.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_space() {
        let mut buffer = SendBuffer::new(4096);
        assert!(buffer.admits());
        buffer.push(NetBuf::from(alloc::vec![0; 3000]));
        assert_eq!(buffer.free_space(), 1096);
        assert!(!buffer.admits());
        assert_eq!(buffer.acknowledge(5000), 3000);
        assert!(buffer.is_empty());
        buffer.push(NetBuf::from(alloc::vec![0; 5000]));
        assert_eq!(buffer.free_space(), 0);
    }

    #[test]
    fn urgent_separated() {
        let mut buffer = RecvBuffer::new(8192);
        buffer.push(NetBuf::from_slice(b"!!abc"), 2);
        buffer.push(NetBuf::from_slice(b"def"), 0);
        buffer.push(NetBuf::from_slice(b"?xyz"), 1);
        assert_eq!(buffer.len(), 12);

        let first = buffer.take(100).unwrap();
        assert!(first.urgent);
        assert_eq!(first.data.as_slice(), b"!!");

        let second = buffer.take(4).unwrap();
        assert!(!second.urgent);
        assert_eq!(second.data.as_slice(), b"abcd");

        let third = buffer.take(100).unwrap();
        assert!(!third.urgent);
        assert_eq!(third.data.as_slice(), b"ef");

        let fourth = buffer.take(100).unwrap();
        assert!(fourth.urgent);
        assert_eq!(fourth.data.as_slice(), b"?");

        assert_eq!(buffer.take(100).unwrap().data.as_slice(), b"xyz");
        assert!(buffer.take(100).is_none());
        assert_eq!(buffer.free_space(), 8192);
    }
}
