use serde::{Deserialize, Serialize};

/// Which identity collection(s) an id was found in.
///
/// Requesters and agents share one numeric id space with no discriminator,
/// so the kind is only known after probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Requester,
    Agent,
    Both,
}

impl IdentityKind {
    /// Combine what two probes found for the same id.
    pub fn merge(self, other: IdentityKind) -> IdentityKind {
        if self == other {
            self
        } else {
            IdentityKind::Both
        }
    }
}

/// A person resolved from the identity directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub departments: Vec<String>,
    pub kind: IdentityKind,
}

impl Identity {
    pub fn department(&self) -> Option<&str> {
        self.departments.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_merge() {
        use IdentityKind::*;
        assert_eq!(Requester.merge(Requester), Requester);
        assert_eq!(Requester.merge(Agent), Both);
        assert_eq!(Agent.merge(Requester), Both);
        assert_eq!(Both.merge(Agent), Both);
    }

    #[test]
    fn test_department() {
        let identity = Identity {
            id: 1,
            name: "Ada".into(),
            email: None,
            departments: vec!["Platform".into(), "SRE".into()],
            kind: IdentityKind::Agent,
        };
        assert_eq!(identity.department(), Some("Platform"));
    }
}
