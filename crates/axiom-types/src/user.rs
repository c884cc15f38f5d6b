//! User resource model.

use serde::{Deserialize, Serialize};

/// The user a personal token belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub emails: Vec<String>,
}
