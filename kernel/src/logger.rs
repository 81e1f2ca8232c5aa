//! Structured kernel logger
//!
//! Backend for the `log` facade: a fixed-size, heap-free circular buffer of
//! structured entries behind a [`spin::Mutex`], with an optional console
//! sink. Subsystems log through the ordinary `log` macros; the target string
//! becomes the subsystem tag of the stored entry.
//!
//! The buffer holds up to [`LOG_BUFFER_CAPACITY`] entries. Once full it
//! wraps around and silently overwrites the oldest entries.

use core::fmt::Write as _;

use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Maximum number of log entries the circular buffer can hold.
pub const LOG_BUFFER_CAPACITY: usize = 256;

/// Maximum length (in bytes) of a log message stored in a [`LogEntry`].
pub const LOG_MESSAGE_MAX_LEN: usize = 128;

/// Maximum length (in bytes) of the subsystem tag in a [`LogEntry`].
pub const LOG_SUBSYSTEM_MAX_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A single structured log entry. Fields are inline fixed-size arrays so the
/// logger never allocates.
#[derive(Clone, Copy)]
pub struct LogEntry {
    /// Severity of the entry.
    pub level: log::Level,
    /// Subsystem tag, truncated to [`LOG_SUBSYSTEM_MAX_LEN`].
    pub subsystem: [u8; LOG_SUBSYSTEM_MAX_LEN],
    pub subsystem_len: usize,
    /// Formatted message, truncated to [`LOG_MESSAGE_MAX_LEN`].
    pub message: [u8; LOG_MESSAGE_MAX_LEN],
    pub message_len: usize,
}

impl LogEntry {
    const fn empty() -> Self {
        Self {
            level: log::Level::Trace,
            subsystem: [0; LOG_SUBSYSTEM_MAX_LEN],
            subsystem_len: 0,
            message: [0; LOG_MESSAGE_MAX_LEN],
            message_len: 0,
        }
    }

    /// Subsystem tag as a string slice.
    pub fn subsystem_str(&self) -> &str {
        core::str::from_utf8(&self.subsystem[..self.subsystem_len]).unwrap_or("?")
    }

    /// Message as a string slice.
    pub fn message_str(&self) -> &str {
        core::str::from_utf8(&self.message[..self.message_len]).unwrap_or("?")
    }
}

struct LogBuffer {
    entries: [LogEntry; LOG_BUFFER_CAPACITY],
    next: usize,
    count: usize,
}

/// Fixed-length formatting adapter: `write!` into a byte array, truncating
/// instead of failing when the message overruns.
struct FixedWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl core::fmt::Write for FixedWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let room = self.buf.len() - self.len;
        let take = s.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

/// The kernel logger. One static instance backs the `log` facade.
pub struct KernelLogger {
    buffer: Mutex<LogBuffer>,
    sink: Mutex<Option<fn(&str)>>,
}

static LOGGER: KernelLogger = KernelLogger {
    buffer: Mutex::new(LogBuffer {
        entries: [LogEntry::empty(); LOG_BUFFER_CAPACITY],
        next: 0,
        count: 0,
    }),
    sink: Mutex::new(None),
};

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut entry = LogEntry::empty();
        entry.level = record.level();

        let tag = record.target();
        // Module paths make poor tags; keep the last component.
        let tag = tag.rsplit("::").next().unwrap_or(tag);
        let take = tag.len().min(LOG_SUBSYSTEM_MAX_LEN);
        entry.subsystem[..take].copy_from_slice(&tag.as_bytes()[..take]);
        entry.subsystem_len = take;

        let mut writer = FixedWriter { buf: &mut entry.message, len: 0 };
        let _ = write!(writer, "{}", record.args());
        entry.message_len = writer.len;

        if let Some(sink) = *self.sink.lock() {
            let mut line = [0u8; LOG_MESSAGE_MAX_LEN + LOG_SUBSYSTEM_MAX_LEN + 16];
            let mut writer = FixedWriter { buf: &mut line, len: 0 };
            let _ = write!(
                writer,
                "[{:<5}] {}: {}\n",
                record.level(),
                entry.subsystem_str(),
                entry.message_str()
            );
            let len = writer.len;
            if let Ok(text) = core::str::from_utf8(&line[..len]) {
                sink(text);
            }
        }

        let mut buffer = self.buffer.lock();
        let slot = buffer.next;
        buffer.entries[slot] = entry;
        buffer.next = (slot + 1) % LOG_BUFFER_CAPACITY;
        buffer.count = (buffer.count + 1).min(LOG_BUFFER_CAPACITY);
    }

    fn flush(&self) {}
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Register the kernel logger with the `log` facade. Idempotent: repeated
/// calls (multiple kernels in one test binary) keep the first registration.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Install a console sink. Every subsequent entry is also rendered as a
/// single text line through it.
pub fn set_sink(sink: fn(&str)) {
    *LOGGER.sink.lock() = Some(sink);
}

/// Number of entries currently retained.
pub fn entry_count() -> usize {
    LOGGER.buffer.lock().count
}

/// Visit retained entries, oldest first.
pub fn for_each_entry(mut visit: impl FnMut(&LogEntry)) {
    let buffer = LOGGER.buffer.lock();
    let start = (buffer.next + LOG_BUFFER_CAPACITY - buffer.count) % LOG_BUFFER_CAPACITY;
    for i in 0..buffer.count {
        visit(&buffer.entries[(start + i) % LOG_BUFFER_CAPACITY]);
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    static SINK_LINES: AtomicUsize = AtomicUsize::new(0);

    fn counting_sink(_line: &str) {
        SINK_LINES.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn console_sink_sees_rendered_lines() {
        init(LevelFilter::Trace);
        set_sink(counting_sink);
        let before = SINK_LINES.load(Ordering::SeqCst);
        log::info!(target: "sink-test", "one line out");
        assert!(SINK_LINES.load(Ordering::SeqCst) > before);
    }

    #[test]
    fn entries_are_recorded_and_truncated() {
        init(LevelFilter::Trace);
        let before = entry_count();

        log::info!(target: "heap", "heap initialized");
        let long = "x".repeat(LOG_MESSAGE_MAX_LEN * 2);
        log::warn!(target: "very-long-subsystem-tag-here", "{long}");

        assert!(entry_count() >= before.min(LOG_BUFFER_CAPACITY));

        let mut found_heap = false;
        let mut found_truncated = false;
        for_each_entry(|entry| {
            if entry.subsystem_str() == "heap" && entry.message_str() == "heap initialized" {
                found_heap = true;
            }
            if entry.subsystem_str() == "very-long-subsys" {
                // Both the tag and the message were clipped to their limits.
                assert_eq!(entry.subsystem_len, LOG_SUBSYSTEM_MAX_LEN);
                assert_eq!(entry.message_len, LOG_MESSAGE_MAX_LEN);
                assert!(entry.message_str().bytes().all(|b| b == b'x'));
                found_truncated = true;
            }
        });
        assert!(found_heap);
        assert!(found_truncated);
    }
}
