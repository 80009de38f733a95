use std::borrow::Borrow;
use std::fmt;

use crate::entity::EntityKind;

/// Name of a push topic, e.g. `public.local` or `request.r1.reactions`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(String);

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Global feed for a deployment scope.
    pub fn public(scope: &str) -> Self {
        Self(format!("public.{scope}"))
    }

    /// Requests posted by one user.
    pub fn user(user_id: &str) -> Self {
        Self(format!("user.{user_id}"))
    }

    /// Reactions on a single request or response.
    pub fn reactions(kind: EntityKind, id: &str) -> Self {
        Self(format!("{kind}.{id}.reactions"))
    }

    /// Responses to a single request.
    pub fn responses(request_id: &str) -> Self {
        Self(format!("{}.{request_id}.response", EntityKind::Request))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Channel {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Channel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Channel {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Channel {
    fn from(value: String) -> Self {
        Self(value)
    }
}
