//! Processing-thread logging.
//!
//! With the `debug` feature, [`nr_log!`](crate::nr_log) formats into a fixed-size entry and
//! pushes it onto a lock-free single-producer ring; nothing on the processing path touches a
//! lock or the `log` backend. Another thread calls [`drain_to_log`] to forward the entries.
//!
//! Without the feature, `nr_log!` forwards straight to `log::debug!`.

use std::fmt;

#[cfg(feature = "debug")]
pub mod logger {
    use std::cell::UnsafeCell;
    use std::fmt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::OnceLock;

    const LOG_CAP: usize = 256;
    const LOG_MSG_MAX: usize = 256;

    #[derive(Copy, Clone)]
    struct LogEntry {
        len: u16,
        bytes: [u8; LOG_MSG_MAX],
    }

    impl Default for LogEntry {
        fn default() -> Self {
            Self {
                len: 0,
                bytes: [0; LOG_MSG_MAX],
            }
        }
    }

    struct LogRing {
        head: AtomicUsize,
        tail: AtomicUsize,
        dropped: AtomicUsize,
        buf: Box<[UnsafeCell<LogEntry>]>,
    }

    // Single producer (processing thread), single consumer (drain thread).
    unsafe impl Sync for LogRing {}

    impl LogRing {
        fn new() -> Self {
            let buf = (0..LOG_CAP)
                .map(|_| UnsafeCell::new(LogEntry::default()))
                .collect();
            Self {
                head: AtomicUsize::new(0),
                tail: AtomicUsize::new(0),
                dropped: AtomicUsize::new(0),
                buf,
            }
        }

        fn push(&self, entry: LogEntry) {
            let cap = self.buf.len();
            let head = self.head.load(Ordering::Relaxed);
            let next = (head + 1) % cap;
            if next == self.tail.load(Ordering::Acquire) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            unsafe {
                *self.buf[head].get() = entry;
            }
            self.head.store(next, Ordering::Release);
        }

        fn pop(&self) -> Option<LogEntry> {
            let cap = self.buf.len();
            let tail = self.tail.load(Ordering::Relaxed);
            if tail == self.head.load(Ordering::Acquire) {
                return None;
            }
            let entry = unsafe { *self.buf[tail].get() };
            self.tail.store((tail + 1) % cap, Ordering::Release);
            Some(entry)
        }
    }

    static LOGGER: OnceLock<LogRing> = OnceLock::new();
    static LOG_ENABLED: AtomicBool = AtomicBool::new(false);

    pub fn init_logger() {
        let _ = LOGGER.get_or_init(LogRing::new);
        LOG_ENABLED.store(true, Ordering::Relaxed);
    }

    struct FixedBuf {
        entry: LogEntry,
    }

    impl fmt::Write for FixedBuf {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let len = self.entry.len as usize;
            let avail = LOG_MSG_MAX - len;
            // Never split a UTF-8 sequence.
            let mut n = s.len().min(avail);
            while !s.is_char_boundary(n) {
                n -= 1;
            }
            self.entry.bytes[len..len + n].copy_from_slice(&s.as_bytes()[..n]);
            self.entry.len = (len + n) as u16;
            Ok(())
        }
    }

    pub fn log_args(args: fmt::Arguments) {
        if !LOG_ENABLED.load(Ordering::Relaxed) {
            return;
        }
        let Some(logger) = LOGGER.get() else {
            return;
        };
        let mut buf = FixedBuf {
            entry: LogEntry::default(),
        };
        let _ = fmt::write(&mut buf, args);
        logger.push(buf.entry);
    }

    /// Forwards queued entries to `log::debug!`. Returns how many were forwarded.
    pub fn drain_to_log() -> usize {
        let Some(logger) = LOGGER.get() else {
            return 0;
        };
        let mut count = 0;
        while let Some(entry) = logger.pop() {
            let len = entry.len as usize;
            if len == 0 {
                continue;
            }
            let msg = std::str::from_utf8(&entry.bytes[..len]).unwrap_or("<invalid>");
            log::debug!("{}", msg);
            count += 1;
        }
        let dropped = logger.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            log::warn!("processing log ring overflowed, {} entries dropped", dropped);
        }
        count
    }
}

#[cfg(feature = "debug")]
pub use logger::{drain_to_log, init_logger};

/// No-op without the `debug` feature.
#[cfg(not(feature = "debug"))]
pub fn init_logger() {}

/// No-op without the `debug` feature; messages already went to `log` directly.
#[cfg(not(feature = "debug"))]
pub fn drain_to_log() -> usize {
    0
}

#[cfg(feature = "debug")]
#[doc(hidden)]
pub fn nr_log_inner(args: fmt::Arguments) {
    logger::log_args(args);
}

#[cfg(not(feature = "debug"))]
#[doc(hidden)]
pub fn nr_log_inner(args: fmt::Arguments) {
    log::debug!("{}", args);
}

#[macro_export]
macro_rules! nr_log {
    ($($arg:tt)*) => {
        $crate::debug::nr_log_inner(format_args!($($arg)*))
    };
}

#[cfg(all(test, feature = "debug"))]
mod tests {
    use super::*;

    #[test]
    fn test_ring_drains() {
        init_logger();
        drain_to_log();
        crate::nr_log!("frame {} of {}", 1, 2);
        crate::nr_log!("{}", "é".repeat(300));
        assert!(drain_to_log() >= 2);
    }
}
