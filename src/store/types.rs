//! Record types for the relational store.
//!
//! [`Item`] (a captured note), [`Circle`] (a user-defined group with a derived
//! centroid) and [`Membership`] (the junction between them, carrying the learning
//! signal used by the reranker).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ItemId = i64;
pub type CircleId = i64;
pub type OwnerId = Uuid;

/// A user-captured note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub owner_id: OwnerId,
    pub content: String,
    /// Interpretation of why the note matters, if one has been written.
    pub meaning: Option<String>,
    /// Unit-length embedding of `content`, once computed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: String,
    pub updated_at: String,
}

/// A user-defined semantic group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Circle {
    pub id: CircleId,
    pub owner_id: OwnerId,
    pub name: String,
    pub description: Option<String>,
    /// Present exactly when the circle has at least one member.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Vec<f32>>,
    pub created_at: String,
    pub updated_at: String,
}

/// A link between an item and a circle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub item_id: ItemId,
    pub circle_id: CircleId,
    /// `true` when a person placed the item in the circle.
    pub is_user_assigned: bool,
    /// Confidence of a system suggestion, in `[0, 1]`.
    pub confidence_score: Option<f32>,
    pub created_at: String,
}

/// How a membership came to exist.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MembershipSource {
    /// Explicit placement by the owner. Carries no confidence score.
    User,
    /// An accepted system prediction with its confidence.
    Suggested { confidence: f32 },
}

impl MembershipSource {
    pub fn is_user_assigned(&self) -> bool {
        matches!(self, Self::User)
    }

    pub fn confidence(&self) -> Option<f32> {
        match self {
            Self::User => None,
            Self::Suggested { confidence } => Some(*confidence),
        }
    }
}
