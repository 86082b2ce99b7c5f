//! Structured logger handed to registered functions.
//!
//! A [`RuntimeLogger`] is a value: adding fields builds a new handle and
//! leaves the original untouched, so handles can be cloned freely across
//! concurrent calls.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::Level;

/// Target under which script log output is emitted.
pub const LOG_TARGET: &str = "linna::runtime";

/// Immutable, field-chaining log handle.
#[derive(Clone, Default)]
pub struct RuntimeLogger {
    fields: Arc<IndexMap<String, String>>,
}

impl RuntimeLogger {
    /// A logger with no fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// New handle with `key` set to `value`.
    pub fn with_field(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut fields = (*self.fields).clone();
        fields.insert(key.into(), value.into());
        Self {
            fields: Arc::new(fields),
        }
    }

    /// New handle with every pair added; later keys overwrite earlier ones.
    pub fn with_fields<I, K, V>(&self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut fields = (*self.fields).clone();
        for (k, v) in pairs {
            fields.insert(k.into(), v.into());
        }
        Self {
            fields: Arc::new(fields),
        }
    }

    /// Snapshot of the current fields.
    pub fn fields(&self) -> IndexMap<String, String> {
        (*self.fields).clone()
    }

    pub fn debug(&self, message: impl fmt::Display) -> String {
        self.emit(Level::DEBUG, message)
    }

    pub fn info(&self, message: impl fmt::Display) -> String {
        self.emit(Level::INFO, message)
    }

    pub fn warn(&self, message: impl fmt::Display) -> String {
        self.emit(Level::WARN, message)
    }

    pub fn error(&self, message: impl fmt::Display) -> String {
        self.emit(Level::ERROR, message)
    }

    /// Render `message`, log it at `level` with the field set attached and
    /// return the rendered text.
    pub fn emit(&self, level: Level, message: impl fmt::Display) -> String {
        let message = message.to_string();
        let fields = self.render_fields();

        match level {
            Level::ERROR => tracing::error!(target: LOG_TARGET, fields = %fields, "{}", message),
            Level::WARN => tracing::warn!(target: LOG_TARGET, fields = %fields, "{}", message),
            Level::INFO => tracing::info!(target: LOG_TARGET, fields = %fields, "{}", message),
            Level::DEBUG => tracing::debug!(target: LOG_TARGET, fields = %fields, "{}", message),
            Level::TRACE => tracing::trace!(target: LOG_TARGET, fields = %fields, "{}", message),
        }

        message
    }

    fn render_fields(&self) -> String {
        let mut out = String::new();
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{k}={v}");
        }
        out
    }
}

impl fmt::Debug for RuntimeLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeLogger")
            .field("fields", &*self.fields)
            .finish()
    }
}
