//! Keyed single-writer actors.
//!
//! Each state machine implements [`Process`]: a pure transition from the
//! current (optional) state and one input to the next state plus the outputs
//! it emits. [`ActorRegistry`] owns one tokio task per key that applies inputs
//! strictly in delivery order, persists changed state, and forwards outputs
//! to a per-kind sink. An actor left without state (or in a final state)
//! retires once its inbox is empty; the next input respawns it from the
//! store.

pub mod registry;

pub use registry::{ActorRegistry, Emitted};

use std::fmt;
use std::hash::Hash;

/// A keyed state machine with a pure transition function.
pub trait Process: Clone + Send + Sync + 'static {
    /// Identity of one instance.
    type Key: Clone + Ord + Hash + fmt::Display + Send + Sync + 'static;
    /// Commands and events the machine reacts to.
    type Input: fmt::Debug + Send + 'static;
    /// Commands and events the machine emits.
    type Output: Clone + Send + 'static;
    /// Timing constants shared by every instance of this kind.
    type Policy: Send + Sync + 'static;

    /// Short name used in logs and store file names.
    const KIND: &'static str;

    /// Returns `true` for states that ignore every further input.
    ///
    /// Final states stay persisted but their actor is retired, so ticks no
    /// longer reach them.
    fn is_final(&self) -> bool {
        false
    }

    /// Compute the transition for `input`.
    ///
    /// `state` is `None` until the first input that creates it.
    fn apply(
        state: Option<&Self>,
        input: Self::Input,
        policy: &Self::Policy,
    ) -> Transition<Self, Self::Output>;
}

/// What happens to an instance's state after one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next<S> {
    /// State untouched; nothing is persisted.
    Unchanged,
    /// Replace the state.
    Set(S),
    /// Drop the state entirely.
    Clear,
}

/// Result of [`Process::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<S, O> {
    /// Next state.
    pub next: Next<S>,
    /// Outputs in emission order.
    pub emitted: Vec<O>,
}

impl<S, O> Transition<S, O> {
    /// Leave the state as-is and emit nothing.
    pub fn unchanged() -> Self {
        Self {
            next: Next::Unchanged,
            emitted: Vec::new(),
        }
    }

    /// Replace the state.
    pub fn set(state: S) -> Self {
        Self {
            next: Next::Set(state),
            emitted: Vec::new(),
        }
    }

    /// Remove the state.
    pub fn clear() -> Self {
        Self {
            next: Next::Clear,
            emitted: Vec::new(),
        }
    }

    /// Append an output.
    #[must_use]
    pub fn emit(mut self, output: O) -> Self {
        self.emitted.push(output);
        self
    }

    /// Append several outputs.
    #[must_use]
    pub fn emit_all(mut self, outputs: impl IntoIterator<Item = O>) -> Self {
        self.emitted.extend(outputs);
        self
    }

    /// The state this transition leaves behind, given the previous one.
    pub fn resolve<'a>(&'a self, previous: Option<&'a S>) -> Option<&'a S> {
        match &self.next {
            Next::Unchanged => previous,
            Next::Set(state) => Some(state),
            Next::Clear => None,
        }
    }
}
