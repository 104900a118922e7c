use std::{
    cell::{Cell, RefCell},
    time::{Duration, Instant},
};

use crate::ast::node::ExitKind;

/// How a statement finished.
///
/// Exits and halts travel here rather than through `EvalError`, so an error
/// handler can never mistake `Response.End` for a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    /// `Exit For`, `Exit Do`, ... until the matching construct consumes it.
    Exit(ExitKind),
    /// Stop the whole request.
    Halt(Halt),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Halt {
    /// `Response.End`
    End,
    /// `Response.Redirect url`
    Redirect(String),
}

/// Request-wide interrupt state shared between the evaluator and the
/// built-in objects that can stop or re-time a request.
#[derive(Debug)]
pub struct RequestControl {
    started: Instant,
    timeout: Cell<Option<Duration>>,
    halt: RefCell<Option<Halt>>,
}

impl Default for RequestControl {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RequestControl {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            timeout: Cell::new(timeout),
            halt: RefCell::new(None),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.get()
    }

    /// Moves the deadline; the start of the request stays fixed.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.timeout.set(timeout);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.timeout()
            .map(|timeout| timeout.saturating_sub(self.elapsed()))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timeout().map(|timeout| self.started + timeout)
    }

    pub fn is_expired(&self) -> bool {
        self.timeout()
            .is_some_and(|timeout| self.elapsed() > timeout)
    }

    /// The first halt wins; later requests keep the original reason.
    pub fn request_halt(&self, halt: Halt) {
        let mut current = self.halt.borrow_mut();
        if current.is_none() {
            *current = Some(halt);
        }
    }

    pub fn halted(&self) -> Option<Halt> {
        self.halt.borrow().clone()
    }
}
