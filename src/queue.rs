use crate::Error;

/// Bounded FIFO byte buffer with capacity fixed at construction.
///
/// One instance each carries outbound and inbound serial traffic. Each
/// instance has exactly one producer-side and one consumer-side actor
/// (mainline vs. transport notification), which never run inside the
/// same invocation, so no locking is required.
#[derive(Debug)]
pub struct ByteQueue {
    buf: Box<[u8]>,
    head: usize, // next dequeue position
    len: usize,
}

impl ByteQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            head: 0,
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

    pub fn remaining_capacity(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Appends a byte. Fails iff the queue is full; a failed enqueue
    /// leaves the queue unchanged.
    pub fn enqueue(&mut self, byte: u8) -> Result<(), Error> {
        if self.len == self.buf.len() {
            return Err(Error::QueueFull);
        }
        let tail = (self.head + self.len) % self.buf.len();
        self.buf[tail] = byte;
        self.len += 1;
        Ok(())
    }

    /// Removes the oldest byte, or `None` when empty.
    pub fn dequeue(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % self.buf.len();
        self.len -= 1;
        Some(byte)
    }
}
