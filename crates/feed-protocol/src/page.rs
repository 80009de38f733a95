use serde::{Deserialize, Serialize};

/// One page of a paged read: `offset` counts the items returned by earlier pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub offset: u64,
    pub total: u64,
}

impl<T> Page<T> {
    /// True when this page reaches the end of the collection.
    pub fn is_last(&self) -> bool {
        (self.items.len() as u64).checked_add(self.offset) == Some(self.total)
    }
}
