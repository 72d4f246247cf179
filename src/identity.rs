//! Cart identity: an authenticated user or an anonymous session, never both.
//!
//! The identity service upstream supplies these values; this crate trusts
//! them as-is. Modeling the pair as an enum makes the mutual-exclusion
//! invariant unrepresentable in code; the `cart_items` CHECK constraint
//! enforces the same thing at rest.

use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CartIdentity {
    User(Uuid),
    Session(String),
}

impl CartIdentity {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::User(id) => Some(*id),
            Self::Session(_) => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::User(_) => None,
            Self::Session(id) => Some(id.as_str()),
        }
    }

    /// SQL fragment values: `(user_id, session_id)` with exactly one set.
    pub fn columns(&self) -> (Option<Uuid>, Option<String>) {
        match self {
            Self::User(id) => (Some(*id), None),
            Self::Session(id) => (None, Some(id.clone())),
        }
    }
}

impl std::fmt::Display for CartIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Session(id) => write!(f, "session:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_column_is_set() {
        let user = CartIdentity::User(Uuid::new_v4());
        let (u, s) = user.columns();
        assert!(u.is_some() && s.is_none());

        let session = CartIdentity::Session("abc123".into());
        let (u, s) = session.columns();
        assert!(u.is_none() && s.is_some());
    }
}
