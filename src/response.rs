use serde::Serialize;

pub fn quota_granted_message(user_id: &str) -> String {
    format!("Request processed successfully for user: {}", user_id)
}

pub fn quota_exceeded_message(user_id: &str) -> String {
    format!("Quota exceeded for user: {}", user_id)
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub counter_store: String,
}

impl ReadinessResponse {
    pub fn ready(backend: &str) -> Self {
        Self {
            status: "ready".to_string(),
            counter_store: format!("{} connected", backend),
        }
    }

    pub fn not_ready(backend: &str, error: &str) -> Self {
        Self {
            status: "not_ready".to_string(),
            counter_store: format!("{} unavailable: {}", backend, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_messages() {
        assert_eq!(
            quota_granted_message("u1"),
            "Request processed successfully for user: u1"
        );
        assert_eq!(quota_exceeded_message("u1"), "Quota exceeded for user: u1");
    }

    #[test]
    fn test_readiness_serialization() {
        let response = ReadinessResponse::not_ready("redis", "timeout");
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("not_ready"));
        assert!(json.contains("redis unavailable: timeout"));
    }
}
