//! Progress reporting and cooperative cancellation.
//!
//! Both the container engine and the secure-erase engine drive the same
//! listener protocol: a per-file notification always precedes the aggregate
//! notification, percentages are reported only when they advance by at least
//! one integer point, and cancellation is polled at buffer boundaries.

use std::sync::Arc;

/// What the engine is currently doing to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Encrypting a plaintext source into the staging area
    Encrypt,
    /// Inserting a ciphertext blob into the archive
    Add,
    /// Removing an entry from the archive
    Remove,
    /// Decrypting an entry to disk
    Extract,
    /// Overwriting a plaintext file on disk
    Wipe,
}

/// Listener for long-running operations.
///
/// All callbacks are invoked synchronously on the caller's thread, in the
/// order listeners were registered.
pub trait ProgressListener {
    /// A new file entered processing.
    fn on_file(&self, _name: &str, _operation: Operation) {}

    /// Current file progressed to the given integer percentage (0 to 100).
    fn on_file_percent(&self, _percent: u8) {}

    /// The whole operation progressed to the given integer percentage (0 to 100).
    fn on_total_percent(&self, _percent: u8) {}

    /// The operation finished (success, failure, or abort).
    fn on_done(&self) {}

    /// Polled before each buffer is committed; return true to cancel.
    fn poll_abort(&self) -> bool {
        false
    }

    /// Cancellation was temporarily blocked or unblocked by the engine.
    fn on_abort_blocked(&self, _blocked: bool) {}
}

/// Shared progress accounting for one engine instance.
///
/// Tracks per-file and aggregate byte counters and fans notifications out to
/// the registered listeners. The abort flag is sticky for the duration of one
/// operation and is cleared by [`ProgressTracker::reset`].
pub struct ProgressTracker {
    listeners: Vec<Arc<dyn ProgressListener>>,
    file_length: u64,
    file_bytes: u64,
    file_percent: u8,
    total_length: u64,
    total_bytes: u64,
    total_percent: u8,
    aborted: bool,
    block_abort: bool,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            file_length: 0,
            file_bytes: 0,
            file_percent: 0,
            total_length: 0,
            total_bytes: 0,
            total_percent: 0,
            aborted: false,
            block_abort: false,
        }
    }

    /// Register a listener. Duplicate handles are ignored.
    pub fn add_listener(&mut self, listener: Arc<dyn ProgressListener>) {
        if !self.listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            self.listeners.push(listener);
        }
    }

    /// Unregister a listener by handle identity.
    pub fn remove_listener(&mut self, listener: &Arc<dyn ProgressListener>) {
        self.listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn listeners(&self) -> &[Arc<dyn ProgressListener>] {
        &self.listeners
    }

    /// Start a new operation with the given total byte budget.
    pub fn reset(&mut self, total_length: u64) {
        self.total_length = total_length;
        self.total_bytes = 0;
        self.total_percent = 0;
        self.aborted = false;
    }

    /// Announce the file now in processing and its byte budget.
    pub fn begin_file(&mut self, name: &str, operation: Operation, file_length: u64) {
        self.file_length = file_length;
        self.file_bytes = 0;
        self.file_percent = 0;
        for listener in &self.listeners {
            listener.on_file(name, operation);
            listener.on_file_percent(0);
        }
    }

    /// Account for processed bytes; notifies listeners only when an integer
    /// percentage point is crossed.
    pub fn advance(&mut self, bytes: u64) {
        if self.file_length > 0 {
            self.file_bytes += bytes;
            let percent = ((self.file_bytes * 100) / self.file_length).min(100) as u8;
            if percent > self.file_percent {
                self.file_percent = percent;
                for listener in &self.listeners {
                    listener.on_file_percent(percent);
                }
            }
        }

        if self.total_length > 0 {
            self.total_bytes += bytes;
            let percent = ((self.total_bytes * 100) / self.total_length).min(100) as u8;
            if percent > self.total_percent {
                self.total_percent = percent;
                for listener in &self.listeners {
                    listener.on_total_percent(percent);
                }
            }
        }
    }

    /// Poll the listeners for cancellation. Returns false while a block-abort
    /// window is open; once any listener requests cancellation the flag stays
    /// set until the next [`ProgressTracker::reset`].
    pub fn poll_abort(&mut self) -> bool {
        if self.block_abort {
            return false;
        }
        if !self.aborted {
            self.aborted = self.listeners.iter().any(|l| l.poll_abort());
        }
        self.aborted
    }

    pub fn aborted(&self) -> bool {
        self.aborted
    }

    /// Open or close a block-abort window and notify listeners.
    pub fn set_block_abort(&mut self, blocked: bool) {
        self.block_abort = blocked;
        for listener in &self.listeners {
            listener.on_abort_blocked(blocked);
        }
    }

    pub fn block_abort(&self) -> bool {
        self.block_abort
    }

    /// Signal the end of the operation to all listeners.
    pub fn notify_done(&self) {
        for listener in &self.listeners {
            listener.on_done();
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
