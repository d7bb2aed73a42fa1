//! Paid image operations: kinds, parameters, the cost catalog and the
//! record written once a transform has succeeded.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::{OperationId, UserId};

// ============================================================================
// Constants
// ============================================================================

/// Default cost of a generative fill.
pub const DEFAULT_GENERATIVE_FILL_COST: i64 = 5;

/// Default cost of removing an object.
pub const DEFAULT_REMOVE_OBJECT_COST: i64 = 3;

/// Default cost of recoloring part of an image.
pub const DEFAULT_RECOLOR_COST: i64 = 2;

/// Default cost of a restore.
pub const DEFAULT_RESTORE_COST: i64 = 1;

const MAX_PROMPT_LEN: usize = 500;
const MAX_TARGET_PART_LEN: usize = 100;

/// The fixed set of billable operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Outpaint the image to a new aspect ratio.
    GenerativeFill,
    /// Restore a damaged or low-quality image.
    Restore,
    /// Recolor a named part of the image.
    Recolor,
    /// Remove an object described by a prompt.
    RemoveObject,
}

impl OperationKind {
    /// Every kind, in catalog order.
    pub const ALL: [Self; 4] = [
        Self::GenerativeFill,
        Self::Restore,
        Self::Recolor,
        Self::RemoveObject,
    ];

    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GenerativeFill => "generative_fill",
            Self::Restore => "restore",
            Self::Recolor => "recolor",
            Self::RemoveObject => "remove_object",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target aspect ratio for a generative fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    /// 16:9 landscape.
    #[serde(rename = "16:9")]
    Widescreen,
    /// 4:3 landscape.
    #[serde(rename = "4:3")]
    Standard,
    /// 1:1 square.
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    /// Ratio as written by clients.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Widescreen => "16:9",
            Self::Standard => "4:3",
            Self::Square => "1:1",
        }
    }

    /// Landscape ratios pad to the source height, the square pads to width.
    #[must_use]
    pub const fn pads_height(&self) -> bool {
        matches!(self, Self::Widescreen | Self::Standard)
    }
}

/// Operation-specific parameters, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationParams {
    /// Generative fill to an aspect ratio.
    GenerativeFill {
        /// Target aspect ratio.
        aspect_ratio: AspectRatio,
    },
    /// Restore.
    Restore,
    /// Recolor a part of the image.
    Recolor {
        /// What to recolor (e.g. "shirt").
        target_part: String,
        /// Six-digit hex color, with or without a leading `#`.
        color: String,
    },
    /// Remove an object.
    RemoveObject {
        /// Description of the object to remove.
        prompt: String,
    },
}

impl OperationParams {
    /// The kind these parameters belong to.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::GenerativeFill { .. } => OperationKind::GenerativeFill,
            Self::Restore => OperationKind::Restore,
            Self::Recolor { .. } => OperationKind::Recolor,
            Self::RemoveObject { .. } => OperationKind::RemoveObject,
        }
    }

    /// Validate and normalize the parameters.
    ///
    /// Free-text fields are trimmed and colors lose their leading `#` and are
    /// lowercased.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidParams` for empty or oversized text and
    /// malformed colors.
    pub fn normalized(self) -> Result<Self> {
        match self {
            Self::Recolor { target_part, color } => {
                let target_part = non_empty("target_part", &target_part, MAX_TARGET_PART_LEN)?;
                let color = color.trim().trim_start_matches('#').to_ascii_lowercase();
                if color.len() != 6 || !color.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(CoreError::InvalidParams {
                        field: "color",
                        reason: "expected a six-digit hex color".into(),
                    });
                }
                Ok(Self::Recolor { target_part, color })
            }
            Self::RemoveObject { prompt } => Ok(Self::RemoveObject {
                prompt: non_empty("prompt", &prompt, MAX_PROMPT_LEN)?,
            }),
            other => Ok(other),
        }
    }

    /// Key-value metadata stored on the operation record.
    #[must_use]
    pub fn metadata(&self) -> BTreeMap<String, serde_json::Value> {
        let mut metadata = BTreeMap::new();
        match self {
            Self::GenerativeFill { aspect_ratio } => {
                metadata.insert("aspect_ratio".into(), aspect_ratio.as_str().into());
            }
            Self::Restore => {}
            Self::Recolor { target_part, color } => {
                metadata.insert("target_part".into(), target_part.as_str().into());
                metadata.insert("color".into(), color.as_str().into());
            }
            Self::RemoveObject { prompt } => {
                metadata.insert("prompt".into(), prompt.as_str().into());
            }
        }
        metadata
    }
}

fn non_empty(field: &'static str, value: &str, max_len: usize) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidParams {
            field,
            reason: "must not be empty".into(),
        });
    }
    if trimmed.chars().count() > max_len {
        return Err(CoreError::InvalidParams {
            field,
            reason: format!("must be at most {max_len} characters"),
        });
    }
    Ok(trimmed.to_string())
}

/// Static mapping from operation kind to credit cost.
///
/// Invariant: every [`OperationKind`] has a strictly positive cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<OperationKind, i64>",
    into = "BTreeMap<OperationKind, i64>"
)]
pub struct OperationCatalog {
    costs: BTreeMap<OperationKind, i64>,
}

impl OperationCatalog {
    /// Build a catalog, rejecting missing kinds and non-positive costs.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::IncompleteCatalog` or `CoreError::InvalidCost`.
    pub fn from_costs(costs: impl IntoIterator<Item = (OperationKind, i64)>) -> Result<Self> {
        let costs: BTreeMap<_, _> = costs.into_iter().collect();

        for kind in OperationKind::ALL {
            match costs.get(&kind) {
                None => return Err(CoreError::IncompleteCatalog(kind)),
                Some(&cost) if cost <= 0 => return Err(CoreError::InvalidCost { kind, cost }),
                Some(_) => {}
            }
        }

        Ok(Self { costs })
    }

    /// Credit cost of an operation kind.
    #[must_use]
    pub fn cost(&self, kind: OperationKind) -> i64 {
        // Construction guarantees presence.
        self.costs.get(&kind).copied().unwrap_or(i64::MAX)
    }

    /// Iterate `(kind, cost)` pairs in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = (OperationKind, i64)> + '_ {
        self.costs.iter().map(|(kind, cost)| (*kind, *cost))
    }
}

impl Default for OperationCatalog {
    fn default() -> Self {
        Self {
            costs: BTreeMap::from([
                (OperationKind::GenerativeFill, DEFAULT_GENERATIVE_FILL_COST),
                (OperationKind::Restore, DEFAULT_RESTORE_COST),
                (OperationKind::Recolor, DEFAULT_RECOLOR_COST),
                (OperationKind::RemoveObject, DEFAULT_REMOVE_OBJECT_COST),
            ]),
        }
    }
}

impl TryFrom<BTreeMap<OperationKind, i64>> for OperationCatalog {
    type Error = CoreError;

    fn try_from(costs: BTreeMap<OperationKind, i64>) -> Result<Self> {
        Self::from_costs(costs)
    }
}

impl From<OperationCatalog> for BTreeMap<OperationKind, i64> {
    fn from(catalog: OperationCatalog) -> Self {
        catalog.costs
    }
}

/// Reference to an asset held by the transform provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Provider-side identifier, used for deletion.
    pub id: String,
    /// Public URL of the asset.
    pub url: String,
}

/// A completed, billed image operation.
///
/// Written only after the provider returned a result. The credit cost is not
/// stored; readers resolve it from the current [`OperationCatalog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Record ID (ULID, time-ordered).
    pub id: OperationId,

    /// The owning user.
    pub user_id: UserId,

    /// What was performed.
    pub kind: OperationKind,

    /// The uploaded source image.
    pub source_asset: AssetRef,

    /// The transformed image.
    pub result_asset: AssetRef,

    /// Operation parameters as key-value pairs.
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl OperationRecord {
    /// Create a record for a finished transform.
    #[must_use]
    pub fn new(
        user_id: UserId,
        params: &OperationParams,
        source_asset: AssetRef,
        result_asset: AssetRef,
    ) -> Self {
        Self {
            id: OperationId::generate(),
            user_id,
            kind: params.kind(),
            source_asset,
            result_asset,
            metadata: params.metadata(),
            created_at: Utc::now(),
        }
    }
}
