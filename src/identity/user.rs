use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    User,
    Moderator,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Moderator => "MODERATOR",
            Role::Admin => "ADMIN",
            Role::SuperAdmin => "SUPER_ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "USER" => Ok(Role::User),
            "MODERATOR" => Ok(Role::Moderator),
            "ADMIN" => Ok(Role::Admin),
            "SUPER_ADMIN" => Ok(Role::SuperAdmin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

fn default_timezone() -> String { "UTC".to_string() }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for Profile {
    fn default() -> Self {
        Self { department: None, position: None, bio: None, phone: None, avatar: None, timezone: default_timezone() }
    }
}

/// Stored identity row. Carries the password hash and never leaves the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: Role,
    pub active: bool,
    #[serde(default)]
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wire form of a user: the stored record with the password stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub active: bool,
    #[serde(default)]
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&UserRecord> for User {
    fn from(r: &UserRecord) -> Self {
        Self {
            id: r.id.clone(),
            email: r.email.clone(),
            name: r.name.clone(),
            role: r.role,
            active: r.active,
            profile: r.profile.clone(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl From<UserRecord> for User {
    fn from(r: UserRecord) -> Self { User::from(&r) }
}

/// Input for inserting a new row; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub profile: Profile,
}

/// Partial profile update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl ProfileUpdate {
    pub fn apply(&self, rec: &mut UserRecord) {
        self.merge_into(&mut rec.name, &mut rec.profile);
    }

    /// Same merge against the wire form, for client-side caches.
    pub fn apply_to_user(&self, user: &mut User) {
        self.merge_into(&mut user.name, &mut user.profile);
    }

    fn merge_into(&self, name: &mut String, profile: &mut Profile) {
        if let Some(n) = &self.name { *name = n.trim().to_string(); }
        if let Some(v) = &self.department { profile.department = Some(v.clone()); }
        if let Some(v) = &self.position { profile.position = Some(v.clone()); }
        if let Some(v) = &self.bio { profile.bio = Some(v.clone()); }
        if let Some(v) = &self.phone { profile.phone = Some(v.clone()); }
        if let Some(v) = &self.avatar { profile.avatar = Some(v.clone()); }
        if let Some(v) = &self.timezone { profile.timezone = v.clone(); }
    }
}

/// Canonical form used for uniqueness and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
