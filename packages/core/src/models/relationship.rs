//! Object Relationship - directed, typed edge between two objects
//!
//! Edges are independent rows owned by neither endpoint. Soft-deleting an
//! endpoint deactivates its edges in the same transaction; a physical delete
//! (which the kernel itself never issues) cascades through the foreign keys.
//! Navigation is one hop only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::ActorContext;

#[derive(Error, Debug)]
pub enum RelationshipError {
    #[error("Unknown cardinality: {0}")]
    UnknownCardinality(String),

    #[error("Relationship strength must be within 0.0..=1.0, got {0}")]
    StrengthOutOfRange(f64),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Declared multiplicity of an edge. Informational - not enforced by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    #[serde(rename = "1:1")]
    OneToOne,
    #[serde(rename = "1:N")]
    OneToMany,
    #[serde(rename = "N:N")]
    ManyToMany,
}

impl Cardinality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cardinality::OneToOne => "1:1",
            Cardinality::OneToMany => "1:N",
            Cardinality::ManyToMany => "N:N",
        }
    }

    pub fn parse(s: &str) -> Result<Self, RelationshipError> {
        match s {
            "1:1" => Ok(Cardinality::OneToOne),
            "1:N" => Ok(Cardinality::OneToMany),
            "N:N" => Ok(Cardinality::ManyToMany),
            other => Err(RelationshipError::UnknownCardinality(other.to_string())),
        }
    }
}

/// A directed, typed edge `(source) -[rel_type]-> (target)`.
///
/// `(source_id, target_id, rel_type)` is unique. When `bidirectional` is set
/// without an `inverse_type`, no second row is synthesized - navigation is
/// symmetric at query level instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRelationship {
    pub id: Uuid,

    pub source_id: Uuid,

    pub target_id: Uuid,

    pub rel_type: String,

    pub cardinality: Cardinality,

    pub bidirectional: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inverse_type: Option<String>,

    /// Edge weight in 0.0..=1.0
    pub strength: f64,

    pub display_order: i64,

    pub metadata: serde_json::Value,

    pub active: bool,

    pub created_at: DateTime<Utc>,

    pub created_by: String,

    pub modified_at: DateTime<Utc>,

    pub modified_by: String,
}

impl ObjectRelationship {
    pub fn new(
        source_id: Uuid,
        target_id: Uuid,
        rel_type: String,
        cardinality: Cardinality,
        actor: &ActorContext,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_id,
            target_id,
            rel_type,
            cardinality,
            bidirectional: false,
            inverse_type: None,
            strength: 1.0,
            display_order: 0,
            metadata: serde_json::json!({}),
            active: true,
            created_at: now,
            created_by: actor.user.clone(),
            modified_at: now,
            modified_by: actor.user.clone(),
        }
    }

    /// Presence and range checks
    pub fn validate(&self) -> Result<(), RelationshipError> {
        if self.rel_type.trim().is_empty() {
            return Err(RelationshipError::MissingField("rel_type".to_string()));
        }
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(RelationshipError::StrengthOutOfRange(self.strength));
        }
        Ok(())
    }
}
