use std::sync::{Arc, OnceLock, RwLock};
use std::thread;

use colored::Colorize;
use crossbeam_channel::{bounded, select, Receiver, Sender};

use crate::alloc::global::{self, untraced, Untraced};
use crate::event::AllocEvent;
use crate::ledger::Ledger;
use crate::{Format, Trace};

// Large enough that a demo run never backpressures the hooked allocator;
// events past capacity are dropped rather than blocking inside alloc().
const CHANNEL_CAPACITY: usize = 65_536;

pub(crate) enum Message {
    Event(AllocEvent),
    Snapshot(Sender<Ledger>),
}

pub(crate) struct TraceState {
    pub sender: Option<Sender<Message>>,
    pub shutdown_tx: Option<Sender<()>>,
    pub completion_rx: Option<Receiver<()>>,
    pub ledger: Option<Ledger>, // populated by the worker at shutdown
    pub started: quanta::Instant,
    pub caller_name: String,
    pub format: Format,
    pub shutdown_initiated: bool,
}

pub(crate) static TRACE_STATE: OnceLock<Arc<RwLock<TraceState>>> = OnceLock::new();

pub(crate) fn init(caller_name: String, format: Format, echo: bool) -> Trace {
    if TRACE_STATE.get().is_some() {
        panic!("alloctrace::init() can be called only once");
    }

    // Setup allocates; keep it out of its own trace.
    let _quiet = Untraced::new();

    let state = TRACE_STATE.get_or_init(|| {
        let (tx, rx) = bounded::<Message>(CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (completion_tx, completion_rx) = bounded::<()>(1);
        let started = quanta::Instant::now();

        let state_arc = Arc::new(RwLock::new(TraceState {
            sender: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            completion_rx: Some(completion_rx),
            ledger: None,
            started,
            caller_name,
            format,
            shutdown_initiated: false,
        }));

        let state_clone = Arc::clone(&state_arc);
        thread::Builder::new()
            .name("alloctrace-worker".into())
            .spawn(move || {
                let mut ledger = Ledger::new();

                loop {
                    select! {
                        recv(rx) -> result => {
                            match result {
                                Ok(message) => handle_message(&mut ledger, message, echo),
                                Err(_) => break, // Channel disconnected
                            }
                        }
                        recv(shutdown_rx) -> _ => {
                            // Process remaining messages after shutdown signal
                            while let Ok(message) = rx.try_recv() {
                                handle_message(&mut ledger, message, echo);
                            }
                            break;
                        }
                    }
                }

                // Copy the ledger back to shared state before signaling completion
                if let Ok(mut state_guard) = state_clone.write() {
                    state_guard.ledger = Some(ledger);
                }

                let _ = completion_tx.send(());
            })
            .expect("Failed to spawn alloctrace-worker thread");

        state_arc
    });

    Trace {
        state: Arc::clone(state),
    }
}

fn handle_message(ledger: &mut Ledger, message: Message, echo: bool) {
    match message {
        Message::Event(event) => {
            if echo {
                println!("{} {}", "[alloctrace]".blue().bold(), event);
            }
            ledger.apply(event);
        }
        Message::Snapshot(reply) => {
            let _ = reply.send(ledger.clone());
        }
    }
}

/// Called by both interception layers. Must not allocate: the send is a
/// plain write into the preallocated channel buffer.
#[inline]
pub(crate) fn record(event: AllocEvent) {
    if !global::active() {
        return;
    }
    let Some(state) = TRACE_STATE.get() else {
        return;
    };
    let Ok(state_guard) = state.read() else {
        return;
    };
    let Some(sender) = state_guard.sender.as_ref() else {
        return;
    };
    let _ = sender.try_send(Message::Event(event));
}

/// Snapshot of the ledger covering every event recorded before this call.
///
/// The request rides the same channel as the events, so all earlier events
/// from this thread are folded in before the reply. Returns `None` when no
/// trace is installed or it has already shut down.
pub fn ledger() -> Option<Ledger> {
    let state = TRACE_STATE.get()?;
    untraced(|| {
        let (reply_tx, reply_rx) = bounded::<Ledger>(1);
        {
            let state_guard = state.read().ok()?;
            let sender = state_guard.sender.as_ref()?;
            sender.send(Message::Snapshot(reply_tx)).ok()?;
        }
        reply_rx.recv().ok()
    })
}
