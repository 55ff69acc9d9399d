use core::{fmt, ops};
use alloc::sync::Arc;
use alloc::vec::Vec;

/// A shared, immutable view of a byte range.
///
/// Cloning is cheap and never copies the bytes. All trimming operations return a narrower view
/// of the same allocation.
#[derive(Clone)]
pub struct NetBuf {
    data: Arc<[u8]>,
    start: usize,
    end: usize,
}

impl NetBuf {
    /// A buffer without any bytes.
    pub fn empty() -> Self {
        NetBuf::from(Vec::new())
    }

    /// Copy a slice into a new buffer.
    pub fn from_slice(data: &[u8]) -> Self {
        NetBuf::from(data.to_vec())
    }

    /// The number of bytes in this view.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Check if the view contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The bytes of this view.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// A view without the first `count` bytes.
    ///
    /// Trimming more than the length results in an empty view.
    pub fn trim_head(&self, count: usize) -> NetBuf {
        let count = count.min(self.len());
        NetBuf {
            data: self.data.clone(),
            start: self.start + count,
            end: self.end,
        }
    }

    /// A view without the last `count` bytes.
    ///
    /// Trimming more than the length results in an empty view.
    pub fn trim_tail(&self, count: usize) -> NetBuf {
        let count = count.min(self.len());
        NetBuf {
            data: self.data.clone(),
            start: self.start,
            end: self.end - count,
        }
    }

    /// A view of a sub range.
    ///
    /// # Panics
    /// This function panics if the range is not contained in the view.
    pub fn slice(&self, range: ops::Range<usize>) -> NetBuf {
        assert!(range.start <= range.end && range.end <= self.len(), "slice out of bounds");
        NetBuf {
            data: self.data.clone(),
            start: self.start + range.start,
            end: self.start + range.end,
        }
    }

    /// Copy bytes starting at `offset` into `out`, returning the number copied.
    pub fn copy_to(&self, offset: usize, out: &mut [u8]) -> usize {
        let available = self.as_slice().get(offset..).unwrap_or(&[]);
        let count = available.len().min(out.len());
        out[..count].copy_from_slice(&available[..count]);
        count
    }

    /// Join several views into one buffer.
    ///
    /// A single view is returned as is, without copying.
    pub fn concat(bufs: &[NetBuf]) -> NetBuf {
        match bufs {
            [] => NetBuf::empty(),
            [single] => single.clone(),
            many => {
                let total = many.iter().map(NetBuf::len).sum();
                let mut data = Vec::with_capacity(total);
                for buf in many {
                    data.extend_from_slice(buf.as_slice());
                }
                NetBuf::from(data)
            },
        }
    }
}

impl From<Vec<u8>> for NetBuf {
    fn from(data: Vec<u8>) -> Self {
        let end = data.len();
        NetBuf {
            data: data.into(),
            start: 0,
            end,
        }
    }
}

impl AsRef<[u8]> for NetBuf {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq for NetBuf {
    fn eq(&self, other: &NetBuf) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for NetBuf { }

impl fmt::Debug for NetBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NetBuf({} bytes)", self.len())
    }
}
