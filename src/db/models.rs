use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::metadata_extractor::CameraAttributes;

/// Author key of descriptions written by automated passes.
pub const AUTOMATED_AUTHOR: &str = "curator";
/// Author key of descriptions written by a person. Never overwritten by automated passes.
pub const USER_AUTHOR: &str = "user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DescriptionStatus {
    Pending,
    Described,
    Failed,
}

impl fmt::Display for DescriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Described => write!(f, "described"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CatalogEntry {
    pub id: i64,
    pub location: String,
    pub content_fingerprint: String,
    pub format: String,
    pub description: Option<String>,
    pub description_status: DescriptionStatus,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub attributes: CameraAttributes,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImportLocation {
    pub id: i64,
    pub directory: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DescriptionRecord {
    pub entry_id: i64,
    pub author: String,
    pub text: String,
    pub updated_at: DateTime<Utc>,
}
