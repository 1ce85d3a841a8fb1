//! Active-session set per user, used to verify incoming session ids.

use crate::actor::{Process, Transition};
use crate::model::{SessionId, UserScope};
use serde::{Deserialize, Serialize};

/// Sessions currently logged in for one user, in login order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSessions {
    pub sessions: Vec<SessionId>,
}

impl ActiveSessions {
    pub fn contains(&self, session: &SessionId) -> bool {
        self.sessions.contains(session)
    }
}

#[derive(Debug, Clone)]
pub enum SessionInput {
    Login(SessionId),
    Logout(SessionId),
    Expired(SessionId),
    Verify(SessionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutput {
    /// A session was added; the user has credentials to fetch with.
    Opened(SessionId),
    /// The last session was removed.
    AllClosed,
    Verified(SessionId),
    VerificationFailed(SessionId),
}

impl Process for ActiveSessions {
    type Key = UserScope;
    type Input = SessionInput;
    type Output = SessionOutput;
    type Policy = ();

    const KIND: &'static str = "sessions";

    fn apply(state: Option<&Self>, input: SessionInput, _: &()) -> Transition<Self, SessionOutput> {
        let current = state.cloned().unwrap_or_default();
        match input {
            SessionInput::Login(session) => {
                if current.contains(&session) {
                    return Transition::unchanged();
                }
                let mut next = current;
                next.sessions.push(session.clone());
                Transition::set(next).emit(SessionOutput::Opened(session))
            }
            SessionInput::Logout(session) | SessionInput::Expired(session) => {
                if !current.contains(&session) {
                    return Transition::unchanged();
                }
                let mut next = current;
                next.sessions.retain(|s| s != &session);
                if next.sessions.is_empty() {
                    Transition::clear().emit(SessionOutput::AllClosed)
                } else {
                    Transition::set(next)
                }
            }
            SessionInput::Verify(session) => {
                let output = if current.contains(&session) {
                    SessionOutput::Verified(session)
                } else {
                    SessionOutput::VerificationFailed(session)
                };
                Transition::unchanged().emit(output)
            }
        }
    }
}
