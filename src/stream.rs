//! Block stream plumbing.
//!
//! The processing block pulls one block at a time from an [`InputStream`] and publishes into an
//! [`OutputStream`]. [`stream_pair`] connects a writer and a reader through a one-block
//! channel: the writer fills its own buffer, `swap` hands it over and blocks until the reader
//! has taken the previous one. Drained buffers travel back on a second channel for reuse.
//!
//! Either side going away closes the pair: `read` then returns `None`, `swap` returns `false`.

use crossbeam_channel::{bounded, Receiver, Sender};

/// Buffers the reader hands back for reuse. Extra ones are dropped.
const SPARE_BUFFERS: usize = 2;

/// Pull side of a block stream.
pub trait InputStream<T>: Send {
    /// Blocks until a block is available. Returns its length, or `None` once the stream is
    /// closed and drained.
    fn read(&mut self) -> Option<usize>;

    /// The block returned by the last successful [`read`](Self::read).
    fn read_buf(&self) -> &[T];

    /// Releases the current block.
    fn flush(&mut self);
}

/// Push side of a block stream.
pub trait OutputStream<T>: Send {
    /// Buffer to fill before the next [`swap`](Self::swap).
    fn write_buf(&mut self) -> &mut Vec<T>;

    /// Publishes the first `count` samples of the write buffer. Returns `false` when the
    /// consumer is gone.
    fn swap(&mut self, count: usize) -> bool;
}

/// Writing half of a [`stream_pair`].
pub struct StreamWriter<T> {
    blocks: Sender<Vec<T>>,
    spare: Receiver<Vec<T>>,
    buf: Vec<T>,
}

/// Reading half of a [`stream_pair`].
pub struct StreamReader<T> {
    blocks: Receiver<Vec<T>>,
    spare: Sender<Vec<T>>,
    buf: Vec<T>,
}

pub fn stream_pair<T: Send>() -> (StreamWriter<T>, StreamReader<T>) {
    let (block_tx, block_rx) = bounded(1);
    let (spare_tx, spare_rx) = bounded(SPARE_BUFFERS);
    (
        StreamWriter {
            blocks: block_tx,
            spare: spare_rx,
            buf: Vec::new(),
        },
        StreamReader {
            blocks: block_rx,
            spare: spare_tx,
            buf: Vec::new(),
        },
    )
}

impl<T: Send> StreamWriter<T> {
    /// Copies `samples` into the write buffer and publishes them.
    pub fn write(&mut self, samples: &[T]) -> bool
    where
        T: Clone,
    {
        self.buf.clear();
        self.buf.extend_from_slice(samples);
        self.swap(samples.len())
    }
}

impl<T: Send> OutputStream<T> for StreamWriter<T> {
    fn write_buf(&mut self) -> &mut Vec<T> {
        &mut self.buf
    }

    fn swap(&mut self, count: usize) -> bool {
        self.buf.truncate(count);
        let mut next = self.spare.try_recv().unwrap_or_default();
        next.clear();
        let block = std::mem::replace(&mut self.buf, next);
        // Blocks while the reader still holds the previous block unread.
        self.blocks.send(block).is_ok()
    }
}

impl<T: Send> InputStream<T> for StreamReader<T> {
    fn read(&mut self) -> Option<usize> {
        // Pending blocks are still delivered after the writer is dropped.
        let block = self.blocks.recv().ok()?;
        let old = std::mem::replace(&mut self.buf, block);
        if old.capacity() > 0 {
            let _ = self.spare.try_send(old);
        }
        Some(self.buf.len())
    }

    fn read_buf(&self) -> &[T] {
        &self.buf
    }

    fn flush(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_blocks_arrive_in_order() {
        let (mut w, mut r) = stream_pair::<f32>();
        let producer = thread::spawn(move || {
            for i in 0..20 {
                let block: Vec<f32> = (0..i + 1).map(|j| (i * 100 + j) as f32).collect();
                assert!(w.write(&block));
            }
        });

        for i in 0..20 {
            let n = r.read().unwrap();
            assert_eq!(n, i + 1);
            assert_eq!(r.read_buf()[0], (i * 100) as f32);
            r.flush();
        }
        producer.join().unwrap();
        assert_eq!(r.read(), None);
    }

    #[test]
    fn test_swap_publishes_prefix() {
        let (mut w, mut r) = stream_pair::<u8>();
        w.write_buf().extend_from_slice(&[1, 2, 3, 4]);
        assert!(w.swap(2));
        assert_eq!(r.read(), Some(2));
        assert_eq!(r.read_buf(), &[1, 2]);
        assert!(w.write_buf().is_empty());
    }

    #[test]
    fn test_reader_drop_closes_writer() {
        let (mut w, r) = stream_pair::<f32>();
        drop(r);
        assert!(!w.write(&[1.0]));
    }

    #[test]
    fn test_pending_block_survives_writer_drop() {
        let (mut w, mut r) = stream_pair::<f32>();
        assert!(w.write(&[7.0, 8.0]));
        drop(w);
        assert_eq!(r.read(), Some(2));
        assert_eq!(r.read(), None);
    }

    #[test]
    fn test_blocked_writer_released_when_reader_drops() {
        let (mut w, r) = stream_pair::<f32>();
        assert!(w.write(&[1.0]));
        let blocked = thread::spawn(move || w.write(&[2.0]));
        thread::sleep(std::time::Duration::from_millis(20));
        drop(r);
        assert!(!blocked.join().unwrap());
    }

    #[test]
    fn test_drained_buffers_are_reused() {
        let (mut w, mut r) = stream_pair::<u8>();
        assert!(w.write(&[1, 2, 3, 4]));
        assert_eq!(r.read(), Some(4));
        assert!(w.write(&[5]));
        assert_eq!(r.read(), Some(1));
        assert!(w.write(&[6]));
        assert!(w.write_buf().capacity() >= 4);
    }
}
