use serde::{Deserialize, Serialize};

use crate::entity::ReactionType;

/// Body of a new or edited request, shaped like the publish form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDraft {
    pub request: String,
    #[serde(default)]
    pub is_anonymous: bool,
}

impl RequestDraft {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            is_anonymous: false,
        }
    }

    pub fn anonymous(mut self) -> Self {
        self.is_anonymous = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseDraft {
    pub response: String,
}

impl ResponseDraft {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionDraft {
    pub reaction_type: ReactionType,
}

impl From<ReactionType> for ReactionDraft {
    fn from(reaction_type: ReactionType) -> Self {
        Self { reaction_type }
    }
}
