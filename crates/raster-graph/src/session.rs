//! Explicit session context.

use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};

/// Session context created once at startup and passed by reference to every
/// collection constructor.
///
/// Remote calls are stateless, so there is nothing to tear down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    project: String,
}

impl Session {
    /// Create a session bound to a billing project.
    pub fn new(project: impl Into<String>) -> BackendResult<Self> {
        let project = project.into();
        if project.trim().is_empty() {
            return Err(BackendError::initialization("project must not be empty"));
        }
        Ok(Self { project })
    }

    pub fn project(&self) -> &str {
        &self.project
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_project_is_rejected() {
        assert!(matches!(
            Session::new("  "),
            Err(BackendError::Initialization(_))
        ));
        assert_eq!(Session::new("urban-heat").unwrap().project(), "urban-heat");
    }
}
