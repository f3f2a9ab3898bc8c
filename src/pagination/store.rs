use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::context::{AnalysisSession, PaginationContext};

/// Storage for contexts and sessions.
///
/// Implementations must make each call atomic with respect to the others.
pub trait ContextStore: Send + Sync {
    fn get_context(&self, session_id: &str) -> Option<PaginationContext>;
    fn put_context(&self, context: PaginationContext);
    fn remove_context(&self, session_id: &str) -> Option<PaginationContext>;
    /// Drop every context for which `remove` returns true; returns how many were dropped
    fn purge_contexts(&self, remove: &mut dyn FnMut(&PaginationContext) -> bool) -> usize;
    fn context_count(&self) -> usize;

    fn get_session(&self, session_id: &str) -> Option<AnalysisSession>;
    fn put_session(&self, session: AnalysisSession);
    fn remove_session(&self, session_id: &str) -> Option<AnalysisSession>;
    /// Apply `update` to a stored session, returning the updated copy
    fn modify_session(
        &self,
        session_id: &str,
        update: &mut dyn FnMut(&mut AnalysisSession),
    ) -> Option<AnalysisSession>;
    fn sessions(&self) -> Vec<AnalysisSession>;
    fn purge_sessions(&self, remove: &mut dyn FnMut(&AnalysisSession) -> bool) -> usize;
}

#[derive(Default)]
struct StoreState {
    contexts: HashMap<String, PaginationContext>,
    sessions: HashMap<String, AnalysisSession>,
}

/// Process-local store guarded by a single mutex
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ContextStore for MemoryStore {
    fn get_context(&self, session_id: &str) -> Option<PaginationContext> {
        self.lock().contexts.get(session_id).cloned()
    }

    fn put_context(&self, context: PaginationContext) {
        self.lock()
            .contexts
            .insert(context.session_id.clone(), context);
    }

    fn remove_context(&self, session_id: &str) -> Option<PaginationContext> {
        self.lock().contexts.remove(session_id)
    }

    fn purge_contexts(&self, remove: &mut dyn FnMut(&PaginationContext) -> bool) -> usize {
        let mut state = self.lock();
        let before = state.contexts.len();
        state.contexts.retain(|_, ctx| !remove(ctx));
        before - state.contexts.len()
    }

    fn context_count(&self) -> usize {
        self.lock().contexts.len()
    }

    fn get_session(&self, session_id: &str) -> Option<AnalysisSession> {
        self.lock().sessions.get(session_id).cloned()
    }

    fn put_session(&self, session: AnalysisSession) {
        self.lock()
            .sessions
            .insert(session.session_id.clone(), session);
    }

    fn remove_session(&self, session_id: &str) -> Option<AnalysisSession> {
        self.lock().sessions.remove(session_id)
    }

    fn modify_session(
        &self,
        session_id: &str,
        update: &mut dyn FnMut(&mut AnalysisSession),
    ) -> Option<AnalysisSession> {
        let mut state = self.lock();
        let session = state.sessions.get_mut(session_id)?;
        update(session);
        Some(session.clone())
    }

    fn sessions(&self) -> Vec<AnalysisSession> {
        self.lock().sessions.values().cloned().collect()
    }

    fn purge_sessions(&self, remove: &mut dyn FnMut(&AnalysisSession) -> bool) -> usize {
        let mut state = self.lock();
        let before = state.sessions.len();
        state.sessions.retain(|_, session| !remove(session));
        before - state.sessions.len()
    }
}
