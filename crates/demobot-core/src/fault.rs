//! Fault reporting port.
//!
//! Listener faults and worker-fatal faults end up here. The default reporter only
//! logs; an owner that wants bug reports mailed or filed plugs in its own.

use chrono::{DateTime, Local};

use crate::domain::ListenerId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultOrigin {
    /// A listener invocation failed or panicked. Isolated; nothing else stops.
    Listener { id: ListenerId },
    /// The update worker hit an error it cannot recover from and terminated.
    Worker,
}

#[derive(Clone, Debug)]
pub struct Fault {
    pub origin: FaultOrigin,
    pub message: String,
    pub at: DateTime<Local>,
}

impl Fault {
    pub fn new(origin: FaultOrigin, message: impl Into<String>) -> Self {
        Self {
            origin,
            message: message.into(),
            at: Local::now(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.origin, FaultOrigin::Worker)
    }
}

pub trait FaultReporter: Send + Sync {
    fn report(&self, fault: &Fault);
}

/// Reports faults through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingFaultReporter;

impl FaultReporter for TracingFaultReporter {
    fn report(&self, fault: &Fault) {
        match fault.origin {
            FaultOrigin::Listener { id } => tracing::error!(
                listener = %id,
                at = %fault.at.to_rfc3339(),
                "listener fault: {}",
                fault.message
            ),
            FaultOrigin::Worker => tracing::error!(
                at = %fault.at.to_rfc3339(),
                "update worker terminated: {}",
                fault.message
            ),
        }
    }
}
