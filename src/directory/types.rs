use serde::{Deserialize, Serialize};

use crate::models::{Identity, IdentityKind};

/// A requester or agent as the identity directory returns it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Person {
    pub id: u64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, alias = "primary_email")]
    pub email: Option<String>,
    #[serde(default)]
    pub department_names: Vec<String>,
}

impl Person {
    /// "First Last", else the email, else "Unknown".
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !name.is_empty() {
            return name;
        }
        match self.email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => email.to_string(),
            _ => "Unknown".to_string(),
        }
    }

    pub fn into_identity(self, kind: IdentityKind) -> Identity {
        Identity {
            id: self.id,
            name: self.display_name(),
            email: self.email.filter(|e| !e.trim().is_empty()),
            departments: self.department_names,
            kind,
        }
    }
}
