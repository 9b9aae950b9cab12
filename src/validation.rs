use crate::error::{QuotaError, Result};
use crate::users::UserPatch;
use regex::Regex;
use std::sync::LazyLock;
use validator::Validate;

const MAX_USER_ID_LEN: usize = 128;

static USER_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.@-]+$").expect("user id pattern is valid"));

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    /// User ids are non-empty and limited to alphanumerics, `-`, `_`, `.` and `@`.
    pub fn validate_user_id(user_id: &str) -> Result<()> {
        if user_id.trim().is_empty() {
            return Err(QuotaError::InvalidUserId("user id cannot be empty".to_string()));
        }

        if user_id.len() > MAX_USER_ID_LEN {
            return Err(QuotaError::InvalidUserId(format!(
                "user id longer than {} characters",
                MAX_USER_ID_LEN
            )));
        }

        if !USER_ID_PATTERN.is_match(user_id) {
            return Err(QuotaError::InvalidUserId(format!(
                "'{}' contains invalid characters",
                user_id
            )));
        }

        Ok(())
    }

    pub fn validate_user_patch(patch: &UserPatch) -> Result<()> {
        patch.validate()?;
        Ok(())
    }
}
