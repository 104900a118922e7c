use std::sync::{Arc, PoisonError, RwLock};

use crate::ast::node::Document;

#[derive(Debug, Default)]
struct StartupState {
    started: bool,
    ended: bool,
}

/// Tracks the application-level event handlers and whether they have run.
///
/// The write lock is held while an event runs, so requests arriving during
/// `Application_OnStart` wait for it to finish.
#[derive(Debug, Default)]
pub struct StartupRegistry {
    global: RwLock<Option<Arc<Document>>>,
    state: RwLock<StartupState>,
}

impl StartupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the document declaring `Application_OnStart`, `Session_OnStart`
    /// and `Application_OnEnd`.
    pub fn set_global(&self, document: Arc<Document>) {
        *self.global.write().unwrap_or_else(PoisonError::into_inner) = Some(document);
    }

    pub fn global(&self) -> Option<Arc<Document>> {
        self.global
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_started(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .started
    }

    /// Runs `start` exactly once for the life of the registry. Returns
    /// whether this call ran it. A failing start still counts as run.
    pub fn ensure_started<E>(&self, start: impl FnOnce() -> Result<(), E>) -> Result<bool, E> {
        if self.is_started() {
            return Ok(false);
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.started {
            return Ok(false);
        }
        state.started = true;
        start().map(|()| true)
    }

    /// Runs `end` once, and only after a successful start.
    pub fn finish<E>(&self, end: impl FnOnce() -> Result<(), E>) -> Result<bool, E> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.started || state.ended {
            return Ok(false);
        }
        state.ended = true;
        end().map(|()| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    #[test]
    fn test_start_runs_once_across_threads() {
        let registry = Arc::new(StartupRegistry::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let handles = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let runs = Arc::clone(&runs);
                thread::spawn(move || {
                    registry.ensure_started(|| {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok::<(), ()>(())
                    })
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(registry.is_started());
    }

    #[test]
    fn test_finish_requires_start() {
        let registry = StartupRegistry::new();
        assert_eq!(registry.finish(|| Ok::<(), ()>(())), Ok(false));
        assert_eq!(registry.ensure_started(|| Ok::<(), ()>(())), Ok(true));
        assert_eq!(registry.finish(|| Ok::<(), ()>(())), Ok(true));
        assert_eq!(registry.finish(|| Ok::<(), ()>(())), Ok(false));
    }

    #[test]
    fn test_failed_start_is_not_retried() {
        let registry = StartupRegistry::new();
        assert_eq!(registry.ensure_started(|| Err("boom")), Err("boom"));
        assert_eq!(registry.ensure_started(|| Err("again")), Ok(false));
    }
}
