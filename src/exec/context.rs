//! Per-operation context consulted by the executor between `work()` calls

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::errors::{ExecError, ExecResult};

/// Kills an operation from another thread.
#[derive(Debug, Clone)]
pub struct KillHandle {
    killed: Arc<AtomicBool>,
}

impl KillHandle {
    /// Requests that the operation stop at its next interrupt check
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }
}

/// Identity, kill flag and deadline of one running operation.
#[derive(Debug)]
pub struct OperationContext {
    op_id: Uuid,
    killed: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl OperationContext {
    /// New context with no deadline
    pub fn new() -> Self {
        Self {
            op_id: Uuid::new_v4(),
            killed: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// New context that expires `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        let mut ctx = Self::new();
        ctx.deadline = Some(Instant::now() + timeout);
        ctx
    }

    /// Operation id, unique per context
    pub fn op_id(&self) -> Uuid {
        self.op_id
    }

    /// Handle that can kill this operation from elsewhere
    pub fn kill_handle(&self) -> KillHandle {
        KillHandle {
            killed: Arc::clone(&self.killed),
        }
    }

    /// Returns true once the operation has been killed
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Fails if the operation was killed or its deadline has passed.
    pub fn check_for_interrupt(&self) -> ExecResult<()> {
        if self.is_killed() {
            return Err(ExecError::interrupted(format!("operation {} killed", self.op_id)));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ExecError::deadline_exceeded(format!(
                    "operation {} exceeded its time limit",
                    self.op_id
                )));
            }
        }
        Ok(())
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}
