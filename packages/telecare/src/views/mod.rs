//! View models: per-screen state driven by REST fetches and live events.
//!
//! Each view publishes its state through a `watch` channel, owns at most one
//! live channel, and releases it on `unmount` (or on drop). Completions that
//! land after unmount are discarded.

pub mod assistant;
pub mod chat;
pub mod dashboard;
pub mod search;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

pub use assistant::{AssistantSource, AssistantState, AssistantView};
pub use chat::{ChatSource, ChatState, ChatView};
pub use dashboard::{DashboardSource, DashboardState, DashboardView};
pub use search::{SearchSource, SearchState, SearchView};

/// Shared "still mounted" flag plus the state it guards.
#[derive(Debug)]
pub(crate) struct Mounted<T> {
    alive: Arc<AtomicBool>,
    state: Arc<watch::Sender<T>>,
}

impl<T> Clone for Mounted<T> {
    fn clone(&self) -> Self {
        Self {
            alive: self.alive.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T> Mounted<T> {
    pub(crate) fn new(initial: T) -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
            state: Arc::new(watch::Sender::new(initial)),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(crate) fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Apply `f` unless the view has been torn down.
    pub(crate) fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.state.send_modify(f);
        true
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<T> {
        self.state.subscribe()
    }

    pub(crate) fn borrow(&self) -> watch::Ref<'_, T> {
        self.state.borrow()
    }
}
