use serde::{Deserialize, Serialize};

use super::user::Role;

/// Identity carried by a verified token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    pub email: String,
    pub role: Role,
}
