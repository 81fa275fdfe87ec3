// SOS interface: the narrow seam through which an external SOS subsystem
// (SOS CRUD lives elsewhere, out of scope here) injects state transitions
// the engine fans out as alerts. The engine holds only the minimal state
// needed to pin a tourist's status to `sos` and to prevent a double-resolve;
// it does not own SOS audit history.
//
// Models an explicit two-state machine (Active -> Resolved) rather than
// inferring "responded" from record deletion, so the transition itself is
// observable and audit logic elsewhere doesn't have to infer state from
// absence.

use dashmap::DashMap;

use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SosState {
    Active,
    Resolved,
}

pub struct SosRegistry {
    active: DashMap<String, SosState>,
}

impl SosRegistry {
    pub fn new() -> Self {
        Self { active: DashMap::new() }
    }

    /// Marks an SOS as triggered for a tourist. Idempotent: re-triggering an
    /// already-active SOS is a no-op success (mobile retries on flaky links).
    pub fn trigger(&self, tourist_id: &str) {
        self.active.insert(tourist_id.to_string(), SosState::Active);
    }

    /// Marks an SOS resolved. Errs `Conflict` if there was no active SOS —
    /// resolving twice is a caller bug, not a degraded-mode condition.
    pub fn resolve(&self, tourist_id: &str) -> Result<(), EngineError> {
        match self.active.get(tourist_id).map(|e| *e.value()) {
            Some(SosState::Active) => {
                self.active.insert(tourist_id.to_string(), SosState::Resolved);
                Ok(())
            }
            _ => Err(EngineError::Conflict(format!("no active SOS for {tourist_id}"))),
        }
    }

    pub fn is_active(&self, tourist_id: &str) -> bool {
        matches!(self.active.get(tourist_id).map(|e| *e.value()), Some(SosState::Active))
    }
}

impl Default for SosRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_then_resolve_transitions_state() {
        let reg = SosRegistry::new();
        reg.trigger("t1");
        assert!(reg.is_active("t1"));
        reg.resolve("t1").unwrap();
        assert!(!reg.is_active("t1"));
    }

    #[test]
    fn resolve_without_trigger_is_conflict() {
        let reg = SosRegistry::new();
        assert!(matches!(reg.resolve("t1"), Err(EngineError::Conflict(_))));
    }

    #[test]
    fn double_resolve_is_conflict() {
        let reg = SosRegistry::new();
        reg.trigger("t1");
        reg.resolve("t1").unwrap();
        assert!(matches!(reg.resolve("t1"), Err(EngineError::Conflict(_))));
    }

    #[test]
    fn retrigger_after_resolve_is_allowed() {
        let reg = SosRegistry::new();
        reg.trigger("t1");
        reg.resolve("t1").unwrap();
        reg.trigger("t1");
        assert!(reg.is_active("t1"));
    }
}
