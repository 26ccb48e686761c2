// Two-role password gate. Role only decides which surfaces the front end
// offers; query semantics are the same for both.
use crate::error::AuthError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Guest,
}

impl Role {
    /// Whether exports and the media plan are available.
    pub fn can_export(self) -> bool {
        matches!(self, Role::Admin)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub admin_password: Option<String>,
    pub guest_password: Option<String>,
}

/// Resolve a password to a role. An unset role password never matches.
pub fn authenticate(password: &str, config: &AuthConfig) -> Result<Role, AuthError> {
    if password.trim().is_empty() {
        return Err(AuthError::MissingPassword);
    }
    let matches = |expected: &Option<String>| expected.as_deref() == Some(password);
    if matches(&config.admin_password) {
        Ok(Role::Admin)
    } else if matches(&config.guest_password) {
        Ok(Role::Guest)
    } else {
        Err(AuthError::Rejected)
    }
}
