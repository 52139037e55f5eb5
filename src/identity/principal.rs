use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Fan,
}

impl Role {
    /// Anything other than `admin` is a fan.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("admin") { Role::Admin } else { Role::Fan }
    }
}

/// An authenticated user. `id` is the lower-cased email, which is also the
/// document id under `users`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub name: Option<String>,
}

impl Principal {
    pub fn is_admin(&self) -> bool { self.role == Role::Admin }
}

pub fn normalize_email(email: &str) -> String { email.trim().to_lowercase() }
