/// Fixed-capacity frame buffers
///
/// Framers never grow their buffers. The backing storage is chosen by type:
/// [`StaticBuffer`] keeps the bytes inline (no heap at all), [`HeapBuffer`]
/// allocates once at construction with a capacity chosen at runtime.

/// Fixed-capacity byte storage a framer accumulates frames in
pub trait FrameBuffer {
    /// The whole storage, regardless of how much holds frame data
    fn as_slice(&self) -> &[u8];

    /// Mutable view of the whole storage
    fn as_mut_slice(&mut self) -> &mut [u8];

    /// Total capacity in bytes
    fn capacity(&self) -> usize {
        self.as_slice().len()
    }
}

/// Buffer allocated once on the heap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapBuffer {
    bytes: Box<[u8]>,
}

impl HeapBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self { bytes: vec![0u8; capacity].into_boxed_slice() }
    }
}

impl Default for HeapBuffer {
    fn default() -> Self {
        Self::new(crate::MAX_TCP_FRAME_SIZE)
    }
}

impl FrameBuffer for HeapBuffer {
    fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Buffer stored inline, capacity fixed at compile time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticBuffer<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> StaticBuffer<N> {
    pub const fn new() -> Self {
        Self { bytes: [0u8; N] }
    }
}

impl<const N: usize> Default for StaticBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameBuffer for StaticBuffer<N> {
    fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn capacity(&self) -> usize {
        N
    }
}

/// Frame being assembled in a [`FrameBuffer`]
///
/// Bytes pushed past the capacity are counted and discarded; the frame is
/// then flagged as overflowed and must be dropped by the framer.
#[derive(Debug, Clone, Default)]
pub struct FrameAccumulator<B: FrameBuffer> {
    buffer: B,
    len: usize,
    overflowed: bool,
}

impl<B: FrameBuffer> FrameAccumulator<B> {
    pub fn new(buffer: B) -> Self {
        Self { buffer, len: 0, overflowed: false }
    }

    /// Append one byte; returns `false` if it had to be discarded
    pub fn push(&mut self, byte: u8) -> bool {
        match self.buffer.as_mut_slice().get_mut(self.len) {
            Some(slot) => {
                *slot = byte;
                self.len += 1;
                true
            }
            None => {
                self.overflowed = true;
                false
            }
        }
    }

    /// Append bytes, returning how many were kept
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> usize {
        let room = self.remaining_capacity();
        let kept = bytes.len().min(room);
        let start = self.len;
        self.buffer.as_mut_slice()[start..start + kept].copy_from_slice(&bytes[..kept]);
        self.len += kept;
        if kept < bytes.len() {
            self.overflowed = true;
        }
        kept
    }

    /// Bytes accumulated so far
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer.as_slice()[..self.len]
    }

    /// The whole underlying storage, for in-place responses
    pub fn storage_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity() - self.len
    }

    /// `true` once any byte has been discarded since the last clear
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Drop the first `count` bytes, moving the rest to the front
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.len);
        self.buffer.as_mut_slice().copy_within(count..self.len, 0);
        self.len -= count;
    }

    /// Forget all accumulated bytes and the overflow flag
    pub fn clear(&mut self) {
        self.len = 0;
        self.overflowed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacities() {
        assert_eq!(StaticBuffer::<256>::new().capacity(), 256);
        assert_eq!(HeapBuffer::new(17).capacity(), 17);
        assert_eq!(HeapBuffer::default().capacity(), crate::MAX_TCP_FRAME_SIZE);
    }

    #[test]
    fn test_accumulator_overflow() {
        let mut frame = FrameAccumulator::new(StaticBuffer::<4>::new());
        assert!(frame.push(1));
        assert_eq!(frame.extend_from_slice(&[2, 3, 4, 5, 6]), 3);
        assert!(frame.overflowed());
        assert!(!frame.push(7));
        assert_eq!(frame.as_slice(), &[1, 2, 3, 4]);

        frame.clear();
        assert!(frame.is_empty());
        assert!(!frame.overflowed());
    }

    #[test]
    fn test_consume_keeps_tail() {
        let mut frame = FrameAccumulator::new(HeapBuffer::new(8));
        frame.extend_from_slice(&[1, 2, 3, 4, 5]);
        frame.consume(3);
        assert_eq!(frame.as_slice(), &[4, 5]);
        frame.consume(10);
        assert!(frame.is_empty());
    }
}
