//! The backend call seam.

use async_trait::async_trait;
use opspilot_core::{Capability, ExecutionResult};
use serde_json::{Map, Value};

/// Failure text prefix for a backend that refused the connection.
pub const UNREACHABLE_PREFIX: &str = "Cannot connect to backend";

/// Executes one capability. Never errors: failures are `ExecutionResult`s.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn call(&self, capability: &Capability, arguments: &Map<String, Value>) -> ExecutionResult;
}

/// Whether a failed result means the backend itself is down.
pub fn is_unreachable(result: &ExecutionResult) -> bool {
    !result.success
        && result
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with(UNREACHABLE_PREFIX) || e == "Request timed out")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_unreachable() {
        assert!(is_unreachable(&ExecutionResult::failure(
            "Cannot connect to backend at http://127.0.0.1:8082. Is it running?"
        )));
        assert!(is_unreachable(&ExecutionResult::failure("Request timed out")));
        assert!(!is_unreachable(&ExecutionResult::failure("pods \"x\" not found")));
        assert!(!is_unreachable(&ExecutionResult::ok(Map::new())));
    }
}
