//! Diagnostics sink: forwards formatted tracing events to a host callback.
//!
//! The sink is a [`Layer`], so it sees exactly the events the installed
//! subscriber lets through. Each event becomes one line:
//!
//! ```text
//! INFO shmseg::manager: segment mapped key=buf-a len=64 version=1 created=true
//! ```
//!
//! The callback never influences control flow: a panicking callback is
//! caught, and events emitted from inside the callback are dropped.

use parking_lot::RwLock;
use std::cell::Cell;
use std::fmt::{self, Write as _};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

type Callback = Arc<dyn Fn(&str) + Send + Sync>;

thread_local! {
    static IN_CALLBACK: Cell<bool> = const { Cell::new(false) };
}

/// Cloneable handle to the diagnostics callback slot.
#[derive(Clone, Default)]
pub struct DiagnosticsSink {
    callback: Arc<RwLock<Option<Callback>>>,
}

impl DiagnosticsSink {
    /// A sink with no callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the callback. Takes effect for every clone of this handle.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.callback.write() = Some(Arc::new(callback));
    }

    /// Detach the callback.
    pub fn clear_callback(&self) {
        *self.callback.write() = None;
    }

    /// Whether a callback is set.
    pub fn is_attached(&self) -> bool {
        self.callback.read().is_some()
    }

    /// Pass one line to the callback, if any.
    pub fn emit(&self, line: &str) {
        let Some(callback) = self.callback.read().clone() else {
            return;
        };
        if IN_CALLBACK.with(Cell::get) {
            return;
        }
        IN_CALLBACK.with(|flag| flag.set(true));
        let _ = panic::catch_unwind(AssertUnwindSafe(|| callback(line)));
        IN_CALLBACK.with(|flag| flag.set(false));
    }
}

impl fmt::Debug for DiagnosticsSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticsSink")
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl<S: Subscriber> Layer<S> for DiagnosticsSink {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.is_attached() {
            return;
        }
        let meta = event.metadata();
        let mut line = LineVisitor::default();
        event.record(&mut line);
        self.emit(&line.finish(meta.level(), meta.target()));
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self, level: &tracing::Level, target: &str) -> String {
        format!("{level} {target}: {}{}", self.message, self.fields)
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}
