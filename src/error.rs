use thiserror::Error;

/// Errors whose class decides what the scheduler does next.
///
/// Transient errors are retried, definition errors fail the task instance immediately,
/// execution errors are reported as the task's final state.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("invalid definition: {0}")]
    Definition(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("host unreachable: {0}")]
    Unreachable(String),
}

impl SchedulerError {
    pub fn definition(msg: impl Into<String>) -> Self {
        Self::Definition(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Unreachable(_))
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}

/// True when an `anyhow` error carries a [`SchedulerError::Definition`].
pub fn is_definition_error(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<SchedulerError>(), Some(SchedulerError::Definition(_)))
}

/// Unclassified errors (I/O, storage) count as transient.
pub fn is_retryable_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<SchedulerError>()
        .is_none_or(SchedulerError::is_retryable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(is_retryable_error(&SchedulerError::transient("db down").into()));
        assert!(is_retryable_error(&SchedulerError::Unreachable("w:1".into()).into()));
        assert!(is_retryable_error(&anyhow::anyhow!("connection reset")));
        assert!(!is_retryable_error(&SchedulerError::definition("bad params").into()));
        assert!(!is_retryable_error(&SchedulerError::execution("plugin crashed").into()));
        assert!(is_definition_error(&SchedulerError::definition("bad params").into()));
        assert!(!is_definition_error(&SchedulerError::execution("plugin crashed").into()));
    }
}
