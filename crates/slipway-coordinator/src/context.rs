//! Execution context threaded through every coordinator entry point.

use std::fmt;

use slipway_state::epoch_secs;

/// Who asked for an operation and the correlation id tying its log lines,
/// retries, and follow-on jobs together. Passed explicitly; there is no
/// ambient "current caller".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub caller: String,
    pub correlation_id: String,
}

impl ExecutionContext {
    pub fn new(caller: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            correlation_id: format!("corr-{}-{:04x}", epoch_secs(), fastrand::u16(..)),
        }
    }

    /// Context for work the daemon initiates itself (sweeps, schedulers).
    pub fn system() -> Self {
        Self::new("system")
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.caller, self.correlation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_are_distinct() {
        let a = ExecutionContext::new("alice");
        let b = ExecutionContext::new("alice");
        assert_ne!(a.correlation_id, b.correlation_id);
    }
}
