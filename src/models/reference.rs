//! Business objects (orders and quotes) that uploads attach to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Kind of business object a batch belongs to.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ReferenceType {
    Order,
    Quote,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Order => "order",
            ReferenceType::Quote => "quote",
        }
    }
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "order" => Ok(ReferenceType::Order),
            "quote" => Ok(ReferenceType::Quote),
            other => Err(format!("unknown reference type `{}`", other)),
        }
    }
}

/// Portal role of whoever uploads or talks: the customer or staff.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Client,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one batch within a reference: a client submission id or an
/// admin revision number.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BatchTag {
    BatchId(Uuid),
    Revision(i64),
}

impl BatchTag {
    pub fn role(&self) -> Role {
        match self {
            BatchTag::BatchId(_) => Role::Client,
            BatchTag::Revision(_) => Role::Admin,
        }
    }
}

impl fmt::Display for BatchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchTag::BatchId(id) => write!(f, "{}", id),
            BatchTag::Revision(n) => write!(f, "rev-{}", n),
        }
    }
}

/// Value of a reference's download/delivery link.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DeliveryLink {
    /// Files uploaded through the portal.
    #[serde(rename_all = "camelCase")]
    Uploaded {
        /// Flattened to `batchId` or `revision`.
        #[serde(flatten)]
        batch: BatchTag,
        prefix: String,
        url: String,
    },
    /// Staff pointed the delivery somewhere else (shared drive, transfer service).
    #[serde(rename_all = "camelCase")]
    ExternalLink { url: String },
}

/// An order or quote with its denormalized link fields.
///
/// `download_link` tracks the newest client batch, `delivery_link` the newest
/// admin revision (or an external link set by staff).
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub reference_type: ReferenceType,
    pub id: String,
    pub owner_user_id: String,
    pub title: String,
    pub download_link: Option<Json<DeliveryLink>>,
    pub delivery_link: Option<Json<DeliveryLink>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
