// SPDX-License-Identifier: Apache-2.0

//! Shared infrastructure for the gatecheck workspace: the logging facade,
//! diagnostic message model, and common error plumbing.

pub mod diagnostic;
pub mod error;
pub mod in_memory;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A trait that defines the interface of a logger.
pub trait Logger {
    /// Logs a trace message (only with debug enabled).
    fn trace(&self, message: &str);

    /// Logs an info message.
    fn info(&self, message: &str);

    /// Logs a warning message.
    fn warn(&self, message: &str);

    /// Logs an error message.
    fn error(&self, message: &str);

    /// Logs a success message.
    fn success(&self, message: &str);

    /// Logs a loading message with a spinner.
    fn loading(&self, message: &str);

    /// Stops a loading message.
    fn done(&self);

    /// Logs a message without icon.
    fn log(&self, message: &str);

    /// Mute all the messages except for the warnings and errors.
    fn mute(&self);
}

/// A generic logger that can be used to log messages to the console.
/// This logger is thread-safe and can be cloned.
#[derive(Default, Clone)]
pub struct ConsoleLogger {
    logger: Arc<Mutex<paris::Logger<'static>>>,
    debug_level: u8,
    /// Mute all the messages except for the warnings and errors.
    /// This flag is used to dynamically mute the logger.
    mute: Arc<AtomicBool>,
}

impl ConsoleLogger {
    /// Creates a new logger.
    #[must_use]
    pub fn new(debug_level: u8) -> Self {
        ConsoleLogger {
            logger: Arc::new(Mutex::new(paris::Logger::new())),
            debug_level,
            mute: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Logger for ConsoleLogger {
    /// Logs a trace message (only with debug enabled).
    fn trace(&self, message: &str) {
        if self.debug_level > 0 && !self.mute.load(Ordering::Acquire) {
            _ = self
                .logger
                .lock()
                .expect("Failed to lock logger")
                .log(message);
        }
    }

    /// Logs an info message.
    fn info(&self, message: &str) {
        if self.mute.load(Ordering::Acquire) {
            return;
        }

        _ = self
            .logger
            .lock()
            .expect("Failed to lock logger")
            .info(message);
    }

    /// Logs a warning message.
    fn warn(&self, message: &str) {
        _ = self
            .logger
            .lock()
            .expect("Failed to lock logger")
            .warn(message);
    }

    /// Logs an error message.
    fn error(&self, message: &str) {
        _ = self
            .logger
            .lock()
            .expect("Failed to lock logger")
            .error(message);
    }

    /// Logs a success message.
    fn success(&self, message: &str) {
        if self.mute.load(Ordering::Acquire) {
            return;
        }

        _ = self
            .logger
            .lock()
            .expect("Failed to lock logger")
            .success(message);
    }

    /// Logs a loading message with a spinner.
    fn loading(&self, message: &str) {
        if self.mute.load(Ordering::Acquire) {
            return;
        }

        _ = self
            .logger
            .lock()
            .expect("Failed to lock logger")
            .loading(message);
    }

    /// Stops a loading message.
    fn done(&self) {
        _ = self.logger.lock().expect("Failed to lock logger").done();
    }

    /// Logs a message without icon.
    fn log(&self, message: &str) {
        if self.mute.load(Ordering::Acquire) {
            return;
        }

        _ = self
            .logger
            .lock()
            .expect("Failed to lock logger")
            .log(message);
    }

    /// Mute all the messages except for the warnings and errors.
    fn mute(&self) {
        self.mute.store(true, Ordering::Release);
    }
}

/// A logger that discards every message except warnings and errors.
#[derive(Default, Clone)]
pub struct QuietLogger {
    logger: Arc<Mutex<paris::Logger<'static>>>,
}

impl QuietLogger {
    /// Creates a new quiet logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Logger for QuietLogger {
    fn trace(&self, _message: &str) {}

    fn info(&self, _message: &str) {}

    fn warn(&self, message: &str) {
        _ = self
            .logger
            .lock()
            .expect("Failed to lock logger")
            .warn(message);
    }

    fn error(&self, message: &str) {
        _ = self
            .logger
            .lock()
            .expect("Failed to lock logger")
            .error(message);
    }

    fn success(&self, _message: &str) {}

    fn loading(&self, _message: &str) {}

    fn done(&self) {}

    fn log(&self, _message: &str) {}

    fn mute(&self) {}
}
