//! Block-sized rolling window over a byte stream.
//!
//! The scanner owns one window per worker: a ring buffer of exactly
//! `block_size` bytes with an O(1) weak-checksum update on every slide and
//! an on-demand MD4 digest of the current contents.

use std::io::{self, ErrorKind, Read};

use md4::{Digest, Md4};

use crate::checksum::RollingChecksum;

/// Length in bytes of a full (untruncated) strong digest.
pub const STRONG_DIGEST_LEN: usize = 16;

/// Fixed-capacity ring buffer with an incrementally maintained weak checksum.
#[derive(Debug)]
pub struct HashedWindow {
    buf: Vec<u8>,
    /// Index of the oldest byte once the buffer is full.
    head: usize,
    filled: usize,
    weak: RollingChecksum,
}

impl HashedWindow {
    /// Create a window holding exactly `block_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero.
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        assert!(block_size > 0, "window size must be non-zero");
        Self {
            buf: vec![0u8; block_size],
            head: 0,
            filled: 0,
            weak: RollingChecksum::empty(),
        }
    }

    /// Capacity of the window.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.buf.len()
    }

    /// Append a byte. Once the window is full the oldest byte leaves and
    /// the weak checksum is updated in O(1).
    pub fn push_byte(&mut self, byte: u8) {
        if self.filled < self.buf.len() {
            self.buf[self.filled] = byte;
            self.filled += 1;
            self.weak.push(byte);
        } else {
            let old = self.buf[self.head];
            self.buf[self.head] = byte;
            self.head = (self.head + 1) % self.buf.len();
            self.weak.roll(old, byte);
        }
    }

    /// Replace the entire window with the next `block_size` bytes of
    /// `reader`. Returns `Ok(false)` when the reader ends before a full
    /// block is available; the window contents are unspecified then.
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than end-of-file.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> io::Result<bool> {
        match reader.read_exact(&mut self.buf) {
            Ok(()) => {
                self.head = 0;
                self.filled = self.buf.len();
                self.weak = RollingChecksum::new(&self.buf);
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Slide the window forward by one byte from `reader`. Returns
    /// `Ok(false)` at end-of-file.
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than end-of-file.
    pub fn slide_from<R: Read>(&mut self, reader: &mut R) -> io::Result<bool> {
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte) {
            Ok(()) => {
                self.push_byte(byte[0]);
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Current 32-bit weak checksum.
    #[must_use]
    pub fn weak(&self) -> u32 {
        self.weak.digest()
    }

    /// MD4 digest of the current window contents, oldest byte first.
    ///
    /// The full 16 bytes are returned; callers compare the prefix the
    /// control declares.
    #[must_use]
    pub fn strong(&self) -> [u8; STRONG_DIGEST_LEN] {
        let (front, back) = self.as_slices();
        let mut hasher = Md4::new();
        hasher.update(front);
        hasher.update(back);
        hasher.finalize().into()
    }

    /// Window contents in logical order as two slices (the ring may wrap).
    fn as_slices(&self) -> (&[u8], &[u8]) {
        if self.filled < self.buf.len() {
            (&self.buf[..self.filled], &[])
        } else {
            let (tail, front) = self.buf.split_at(self.head);
            (front, tail)
        }
    }
}
