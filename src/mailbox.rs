//! The UI/engine handoff: a mutex-guarded record, not a queue, per
//! `Phone.h`'s public fields (`commandIn`, `addressIn`, `stateOut`, `logOut`,
//! `errorMessage`) and spec.md section 5 "Mailbox pattern".

use parking_lot::Mutex;
use std::sync::Arc;

use crate::state::{CallState, Command};

/// Callback the engine invokes once whenever state, log, or error content
/// changes — the Rust stand-in for `Phone.h`'s `UpdateHandler::sendUpdate()`.
/// A `Box<dyn Fn>` rather than a trait object hierarchy since there is only
/// ever one registered handler and no other method on the interface.
pub trait UpdateHandler: Send {
    fn send_update(&self);
}

impl<F: Fn() + Send> UpdateHandler for F {
    fn send_update(&self) {
        self()
    }
}

struct Inner {
    command: Command,
    address: Option<String>,
    state: CallState,
    log: Vec<String>,
    error_message: Option<String>,
    handler: Option<Box<dyn UpdateHandler>>,
}

/// Shared handle the UI and the engine both hold. Cloning shares the same
/// underlying mutex (it wraps an `Arc`).
#[derive(Clone)]
pub struct Mailbox {
    inner: Arc<Mutex<Inner>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Mailbox {
            inner: Arc::new(Mutex::new(Inner {
                command: Command::None,
                address: None,
                state: CallState::Starting,
                log: Vec::new(),
                error_message: None,
                handler: None,
            })),
        }
    }

    /// Register the one-shot wakeup callback. Called by the UI at startup.
    pub fn set_update_handler(&self, handler: impl UpdateHandler + 'static) {
        self.inner.lock().handler = Some(Box::new(handler));
    }

    // --- UI -> engine -------------------------------------------------

    /// Write a command (and, for `Call`, the dial address) into the single
    /// slot. Last write wins — a command the engine hasn't yet consumed is
    /// silently replaced (spec.md section 3).
    pub fn set_command(&self, command: Command) {
        let mut inner = self.inner.lock();
        if let Command::Call(addr) = &command {
            inner.address = Some(addr.clone());
        }
        inner.command = command;
    }

    /// Consumed once per engine loop iteration; resets the slot to `None`.
    pub(crate) fn take_command(&self) -> Command {
        let mut inner = self.inner.lock();
        std::mem::replace(&mut inner.command, Command::None)
    }

    pub(crate) fn take_address(&self) -> Option<String> {
        self.inner.lock().address.take()
    }

    // --- engine -> UI ---------------------------------------------------

    pub fn state(&self) -> CallState {
        self.inner.lock().state.clone()
    }

    pub(crate) fn set_state(&self, state: CallState) {
        let mut inner = self.inner.lock();
        inner.state = state;
        self.notify(&inner);
    }

    /// Drain and return every log line appended since the last call.
    pub fn drain_log(&self) -> Vec<String> {
        std::mem::take(&mut self.inner.lock().log)
    }

    pub(crate) fn push_log(&self, line: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.log.push(line.into());
        self.notify(&inner);
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner.lock().error_message.clone()
    }

    pub(crate) fn set_error_message(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.error_message = Some(message.into());
        self.notify(&inner);
    }

    fn notify(&self, inner: &Inner) {
        if let Some(handler) = &inner.handler {
            handler.send_update();
        }
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn last_write_wins() {
        let mailbox = Mailbox::new();
        mailbox.set_command(Command::Call("10.0.0.1".into()));
        mailbox.set_command(Command::Hangup);
        assert_eq!(mailbox.take_command(), Command::Hangup);
        // the slot is consumed, a second take sees None
        assert_eq!(mailbox.take_command(), Command::None);
    }

    #[test]
    fn call_command_stashes_address() {
        let mailbox = Mailbox::new();
        mailbox.set_command(Command::Call("10.0.0.1:4000".into()));
        assert_eq!(mailbox.take_address().as_deref(), Some("10.0.0.1:4000"));
    }

    #[test]
    fn state_change_notifies_handler() {
        let mailbox = Mailbox::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        mailbox.set_update_handler(move || {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        mailbox.set_state(CallState::Dialing);
        mailbox.push_log("dialing 10.0.0.1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drain_log_empties_buffer() {
        let mailbox = Mailbox::new();
        mailbox.push_log("one");
        mailbox.push_log("two");
        assert_eq!(mailbox.drain_log(), vec!["one", "two"]);
        assert!(mailbox.drain_log().is_empty());
    }
}
