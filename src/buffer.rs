/*!
# UMICP Buffer Management

Bounded byte containers and a ring buffer for streaming use. All growth
paths enforce a hard capacity cap; key material goes through
[`BufferManager::secure_erase`] before release.
*/

use crate::error::{Result, UmicpError};
use zeroize::Zeroize;

/// Capacity-enforcing operations over plain byte vectors
pub struct BufferManager;

impl BufferManager {
    /// Default starting capacity for new buffers
    pub const DEFAULT_CAPACITY: usize = 4096;

    /// Hard upper bound on any buffer managed by the protocol
    pub const MAX_CAPACITY: usize = 100 * 1024 * 1024;

    /// Allocate an empty buffer with the requested capacity
    pub fn create(capacity: usize) -> Result<Vec<u8>> {
        if capacity > Self::MAX_CAPACITY {
            return Err(UmicpError::buffer_overflow(format!(
                "Requested capacity {} exceeds the {} byte limit",
                capacity,
                Self::MAX_CAPACITY
            )));
        }
        Ok(Vec::with_capacity(capacity.max(Self::DEFAULT_CAPACITY)))
    }

    /// Copy `data` into a new buffer
    pub fn from_data(data: &[u8]) -> Result<Vec<u8>> {
        if data.len() > Self::MAX_CAPACITY {
            return Err(UmicpError::buffer_overflow(format!(
                "Source of {} bytes exceeds the {} byte limit",
                data.len(),
                Self::MAX_CAPACITY
            )));
        }
        Ok(data.to_vec())
    }

    /// Resize a buffer, zero-filling any new tail
    pub fn resize(buffer: &mut Vec<u8>, new_size: usize) -> Result<()> {
        if new_size > Self::MAX_CAPACITY {
            return Err(UmicpError::buffer_overflow(format!(
                "Resize to {} bytes exceeds the {} byte limit",
                new_size,
                Self::MAX_CAPACITY
            )));
        }
        buffer.resize(new_size, 0);
        Ok(())
    }

    /// Append bytes. Past the capacity cap the buffer is left untouched and
    /// `BUFFER_OVERFLOW` is returned.
    pub fn append(buffer: &mut Vec<u8>, data: &[u8]) -> Result<()> {
        if buffer.len() + data.len() > Self::MAX_CAPACITY {
            return Err(UmicpError::buffer_overflow(format!(
                "Appending {} bytes to {} would exceed the {} byte limit",
                data.len(),
                buffer.len(),
                Self::MAX_CAPACITY
            )));
        }
        buffer.extend_from_slice(data);
        Ok(())
    }

    /// Insert bytes at the front, same bound as [`BufferManager::append`]
    pub fn prepend(buffer: &mut Vec<u8>, data: &[u8]) -> Result<()> {
        if buffer.len() + data.len() > Self::MAX_CAPACITY {
            return Err(UmicpError::buffer_overflow(format!(
                "Prepending {} bytes to {} would exceed the {} byte limit",
                data.len(),
                buffer.len(),
                Self::MAX_CAPACITY
            )));
        }
        buffer.splice(0..0, data.iter().copied());
        Ok(())
    }

    /// Copy out `length` bytes starting at `offset`
    pub fn slice(buffer: &[u8], offset: usize, length: usize) -> Result<Vec<u8>> {
        let end = offset
            .checked_add(length)
            .ok_or_else(|| UmicpError::invalid_argument("Slice range overflows"))?;
        if end > buffer.len() {
            return Err(UmicpError::invalid_argument(format!(
                "Slice {}..{} is out of bounds for a {} byte buffer",
                offset,
                end,
                buffer.len()
            )));
        }
        Ok(buffer[offset..end].to_vec())
    }

    /// Overwrite the contents with zeros through a write the compiler cannot
    /// elide, then empty the buffer. Used for session keys and plaintext.
    pub fn secure_erase(buffer: &mut Vec<u8>) {
        buffer.zeroize();
        buffer.clear();
    }
}

/// Fixed-capacity ring buffer for streaming reads and writes
pub struct RingBuffer {
    buffer: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    size: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            buffer: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
            size: 0,
        }
    }

    /// Write all of `data`, failing with `BUFFER_OVERFLOW` when it does not
    /// fit in the remaining space
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.capacity() - self.size {
            return Err(UmicpError::buffer_overflow(format!(
                "Ring buffer has {} free bytes, {} requested",
                self.capacity() - self.size,
                data.len()
            )));
        }
        for &byte in data {
            self.buffer[self.write_pos] = byte;
            self.write_pos = (self.write_pos + 1) % self.capacity();
        }
        self.size += data.len();
        Ok(())
    }

    /// Read up to `out.len()` bytes, returning how many were read
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.size);
        for slot in out.iter_mut().take(count) {
            *slot = self.buffer[self.read_pos];
            self.read_pos = (self.read_pos + 1) % self.capacity();
        }
        self.size -= count;
        count
    }

    /// Bytes currently readable
    pub fn available(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    /// Discard all content
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_oversized_capacity() {
        assert!(BufferManager::create(BufferManager::MAX_CAPACITY + 1).is_err());
        assert!(BufferManager::create(16).is_ok());
    }

    #[test]
    fn test_append_past_cap_leaves_buffer_untouched() {
        let mut buffer = vec![0u8; BufferManager::MAX_CAPACITY - 4];
        let before = buffer.len();
        let err = BufferManager::append(&mut buffer, &[0u8; 8]).unwrap_err();
        assert!(matches!(err, UmicpError::BufferOverflow { .. }));
        assert_eq!(buffer.len(), before);
    }

    #[test]
    fn test_append_and_prepend() {
        let mut buffer = Vec::new();
        BufferManager::append(&mut buffer, b"world").unwrap();
        BufferManager::prepend(&mut buffer, b"hello ").unwrap();
        assert_eq!(buffer, b"hello world");
    }

    #[test]
    fn test_slice_bounds() {
        let buffer = b"0123456789".to_vec();
        assert_eq!(BufferManager::slice(&buffer, 2, 3).unwrap(), b"234");
        assert!(BufferManager::slice(&buffer, 8, 5).is_err());
    }

    #[test]
    fn test_secure_erase_empties_buffer() {
        let mut buffer = b"secret key material".to_vec();
        BufferManager::secure_erase(&mut buffer);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_ring_buffer_wraps() {
        let mut ring = RingBuffer::new(8);
        ring.write(&[1, 2, 3, 4, 5, 6]).unwrap();

        let mut out = [0u8; 4];
        assert_eq!(ring.read(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);

        // Wraps around the end of the backing storage
        ring.write(&[7, 8, 9, 10]).unwrap();
        assert_eq!(ring.available(), 6);

        let mut rest = [0u8; 6];
        assert_eq!(ring.read(&mut rest), 6);
        assert_eq!(rest, [5, 6, 7, 8, 9, 10]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_ring_buffer_rejects_overfill() {
        let mut ring = RingBuffer::new(4);
        ring.write(&[1, 2, 3]).unwrap();
        assert!(ring.write(&[4, 5]).is_err());
        assert!(!ring.is_full());
        ring.write(&[4]).unwrap();
        assert!(ring.is_full());
    }
}
