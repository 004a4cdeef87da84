//! Author representation

use serde::{Deserialize, Serialize};

/// One author of a document. Author order is meaningful for naming.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Person {
    pub first_name: Option<String>,
    pub last_name: String,
}

impl Person {
    /// Create a person with just a last name
    pub fn new(last_name: impl Into<String>) -> Self {
        Self {
            first_name: None,
            last_name: last_name.into(),
        }
    }

    /// Builder method to add a first name
    pub fn with_first_name(mut self, first: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self
    }

    /// Format as "First Last" for display
    pub fn display_name(&self) -> String {
        match &self.first_name {
            Some(first) => format!("{} {}", first, self.last_name),
            None => self.last_name.clone(),
        }
    }
}
