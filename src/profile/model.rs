//! Profile record data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Which kind of account the profile belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Applicant,
    Coach,
    Organization,
}

impl Default for Role {
    fn default() -> Self {
        Self::Applicant
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Applicant => write!(f, "applicant"),
            Self::Coach => write!(f, "coach"),
            Self::Organization => write!(f, "organization"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "applicant" => Ok(Self::Applicant),
            "coach" => Ok(Self::Coach),
            "organization" => Ok(Self::Organization),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// One row per identity in the profile store.
///
/// A record without a display name is *incomplete*; that single predicate
/// drives every onboarding routing decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: Identity,
    pub role: Role,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Coaches: areas they coach in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expertise: Vec<String>,
    /// Organizations: legal or trading name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProfileRecord {
    pub fn is_complete(&self) -> bool {
        self.display_name.is_some()
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(ref name) = update.display_name {
            self.display_name = Some(name.clone());
        }
        if let Some(ref bio) = update.bio {
            self.bio = Some(bio.clone());
        }
        if let Some(ref location) = update.location {
            self.location = Some(location.clone());
        }
        if let Some(ref expertise) = update.expertise {
            self.expertise = expertise.clone();
        }
        if let Some(ref org) = update.organization_name {
            self.organization_name = Some(org.clone());
        }
        if let Some(ref website) = update.website {
            self.website = Some(website.clone());
        }
        self.updated_at = Utc::now();
    }
}

/// Row inserted by the client-side creation path.
///
/// Always starts incomplete; the completion form fills in the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProfile {
    pub id: Identity,
    pub role: Role,
    pub display_name: Option<String>,
}

impl NewProfile {
    pub fn new(id: Identity, role: Role) -> Self {
        Self {
            id,
            role,
            display_name: None,
        }
    }

    pub fn into_record(self) -> ProfileRecord {
        let now = Utc::now();
        ProfileRecord {
            id: self.id,
            role: self.role,
            display_name: self.display_name,
            bio: None,
            location: None,
            expertise: Vec::new(),
            organization_name: None,
            website: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update submitted by the profile-completion form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expertise: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl ProfileUpdate {
    pub fn display_name(name: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
            ..Default::default()
        }
    }
}
