mod alloc;
mod event;
mod ledger;
mod output;
mod shared;
mod state;

pub use alloc::global::{scope, untraced, TraceScope, TraceSystem};
pub use alloc::typed::{HeapStore, LoggingAlloc, RawStore};
pub use event::{AllocEvent, PathKind};
pub use ledger::{Anomaly, Ledger, LiveBlock, PathStats};
pub use output::{PathJson, ReportJson, Reporter, TraceReport};
pub use shared::Shared;
pub use state::ledger;

use output::{JsonPrettyReporter, JsonReporter, TableReporter};
use std::sync::{Arc, RwLock};

// Every binary linking this crate runs under the tracing override; it is a
// pure passthrough until a thread arms tracing.
#[global_allocator]
static GLOBAL: TraceSystem = TraceSystem;

#[derive(Clone, Copy, Debug, Default)]
pub enum Format {
    #[default]
    Table,
    Json,
    JsonPretty,
}

/// Configures and installs the trace pipeline.
#[derive(Clone, Debug)]
pub struct TraceBuilder {
    format: Format,
    echo: bool,
}

impl Default for TraceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self {
            format: Format::Table,
            echo: true,
        }
    }

    /// Summary format rendered when the [`Trace`] guard drops.
    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Whether the worker echoes one line per event as it arrives.
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Installs the pipeline. Panics if a trace is already installed.
    pub fn install_with_caller(self, caller_name: impl Into<String>) -> Trace {
        state::init(caller_name.into(), self.format, self.echo)
    }
}

/// Installs the trace pipeline, capturing the caller's module path for the
/// summary header. Arms nothing by itself: pair it with [`scope`].
#[macro_export]
macro_rules! init {
    () => {
        $crate::init!($crate::TraceBuilder::new())
    };
    ($builder:expr) => {{
        fn __caller_fn() {}
        let caller_name = ::std::any::type_name_of_val(&__caller_fn);
        let caller_name = caller_name
            .strip_suffix("::__caller_fn")
            .unwrap_or(caller_name)
            .replace("::{{closure}}", "");

        $builder.install_with_caller(caller_name)
    }};
}

/// Guard owning the trace pipeline: dropping it drains the event channel,
/// joins the worker, and renders the summary report.
pub struct Trace {
    pub(crate) state: Arc<RwLock<state::TraceState>>,
}

impl Drop for Trace {
    fn drop(&mut self) {
        // The shutdown handshake and the report both allocate.
        untraced(|| {
            let state = Arc::clone(&self.state);

            let (shutdown_tx, completion_rx) = {
                let Ok(mut state_guard) = state.write() else {
                    // If state is poisoned, just return
                    return;
                };

                // Make shutdown idempotent
                if state_guard.shutdown_initiated {
                    return;
                }
                state_guard.shutdown_initiated = true;

                state_guard.sender = None;
                let shutdown_tx = state_guard.shutdown_tx.take();
                let completion_rx = state_guard.completion_rx.take();
                (shutdown_tx, completion_rx)
            };

            // Signal shutdown and wait for the worker to finish (non-panicking)
            if let Some(tx) = shutdown_tx {
                let _ = tx.send(());
            }
            if let Some(rx) = completion_rx {
                let _ = rx.recv();
            }

            let Ok(state_guard) = state.read() else {
                return;
            };
            let Some(ref ledger) = state_guard.ledger else {
                return;
            };

            let report = TraceReport {
                ledger,
                total_elapsed: state_guard.started.elapsed(),
                caller_name: &state_guard.caller_name,
            };

            let reporter: Box<dyn Reporter> = match state_guard.format {
                Format::Table => Box::new(TableReporter),
                Format::Json => Box::new(JsonReporter),
                Format::JsonPretty => Box::new(JsonPrettyReporter),
            };

            if let Err(err) = reporter.report(&report) {
                eprintln!("[alloctrace] failed to render summary: {err}");
            }
        });
    }
}
