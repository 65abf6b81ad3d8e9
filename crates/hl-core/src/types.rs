use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Minimum hatch likelihood for an egg to earn its own chick illustration.
pub const ILLUSTRATION_THRESHOLD: f64 = 70.0;

/// Minimum hatch likelihood for the consolidator to count an egg as viable.
///
/// Intentionally independent of [`ILLUSTRATION_THRESHOLD`]: an egg can be
/// viable for aggregate counting without qualifying for its own illustration.
pub const VIABILITY_THRESHOLD: f64 = 50.0;

/// Clamp a model-proposed hatch likelihood into the valid [0, 100] range.
pub fn clamp_hatch_likelihood(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// RecordKey
// ---------------------------------------------------------------------------

/// Composite (partition, sort) key addressing one row in the record store.
///
/// Clutch metadata lives at (`CLUTCH#<id>`, `METADATA`); eggs live at
/// (`CLUTCH#<id>`, `EGG#<id>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub pk: String,
    pub sk: String,
}

pub const METADATA_SK: &str = "METADATA";
pub const EGG_SK_PREFIX: &str = "EGG#";

impl RecordKey {
    pub fn clutch_meta(clutch_id: Uuid) -> Self {
        Self {
            pk: format!("CLUTCH#{clutch_id}"),
            sk: METADATA_SK.to_string(),
        }
    }

    pub fn egg(clutch_id: Uuid, egg_id: Uuid) -> Self {
        Self {
            pk: format!("CLUTCH#{clutch_id}"),
            sk: format!("{EGG_SK_PREFIX}{egg_id}"),
        }
    }

    pub fn is_metadata(&self) -> bool {
        self.sk == METADATA_SK
    }

    pub fn is_egg(&self) -> bool {
        self.sk.starts_with(EGG_SK_PREFIX)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.pk, self.sk)
    }
}

// ---------------------------------------------------------------------------
// BreedConfidence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreedConfidence {
    High,
    Medium,
    Low,
    Uncertain,
}

impl fmt::Display for BreedConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BreedConfidence::High => "high",
            BreedConfidence::Medium => "medium",
            BreedConfidence::Low => "low",
            BreedConfidence::Uncertain => "uncertain",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// ChickAppearance
// ---------------------------------------------------------------------------

/// Predicted appearance of the chick expected to hatch from an egg.
///
/// Every field is optional on the wire; prompt builders substitute neutral
/// placeholders for anything the model left unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChickAppearance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plumage_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comb_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feather_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leg_color: Option<String>,
}

// ---------------------------------------------------------------------------
// EggAnalysis
// ---------------------------------------------------------------------------

/// The viability verdict produced by the analysis agent for one egg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EggAnalysis {
    pub possible_hen_breeds: Vec<String>,
    pub predicted_chick_breed: String,
    pub breed_confidence: BreedConfidence,
    /// Always clamped into [0, 100] before persistence.
    pub hatch_likelihood: f64,
    pub chicken_appearance: ChickAppearance,
    pub notes: String,
}

impl EggAnalysis {
    /// The hard-coded fallback written when the analysis loop fails, so the
    /// record still carries a hatch likelihood and downstream stages unblock.
    pub fn uncertain_default() -> Self {
        Self {
            possible_hen_breeds: vec!["Unknown".to_string()],
            predicted_chick_breed: "Unknown".to_string(),
            breed_confidence: BreedConfidence::Uncertain,
            hatch_likelihood: 50.0,
            chicken_appearance: ChickAppearance {
                plumage_color: Some("unknown".to_string()),
                comb_type: Some("unknown".to_string()),
                body_type: Some("unknown".to_string()),
                feather_pattern: Some("unknown".to_string()),
                leg_color: Some("unknown".to_string()),
            },
            notes: "Analysis failed - using defaults".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// EggRecord
// ---------------------------------------------------------------------------

/// One detected egg, evolving from raw appearance through scored analysis to
/// an optional generated chick image. Created once by the intake agent;
/// mutated by the viability agent (analysis fields) and the illustration
/// generator (image fields). Never deleted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EggRecord {
    pub id: Uuid,
    pub clutch_id: Uuid,
    pub created_at: DateTime<Utc>,

    // Physical/visual attributes from intake.
    pub color: String,
    pub shape: String,
    pub size: String,
    pub shell_texture: String,
    pub shell_integrity: String,
    pub hardness: String,
    pub spots_markings: String,
    pub bloom_condition: String,
    pub cleanliness: String,
    pub visible_defects: Vec<String>,
    pub overall_grade: String,
    pub notes: String,

    // Analysis fields, present once the viability agent has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub possible_hen_breeds: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_chick_breed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed_confidence: Option<BreedConfidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hatch_likelihood: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chicken_appearance: Option<ChickAppearance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_timestamp: Option<DateTime<Utc>>,

    // Illustration fields, present once the chick image exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chick_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chick_image_generated_at: Option<DateTime<Utc>>,
}

impl EggRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::egg(self.clutch_id, self.id)
    }

    pub fn is_analyzed(&self) -> bool {
        self.hatch_likelihood.is_some()
    }

    pub fn has_chick_image(&self) -> bool {
        self.chick_image_url.is_some()
    }

    /// Counts toward the consolidator's viable aggregate.
    pub fn is_viable(&self) -> bool {
        self.hatch_likelihood
            .map(|h| h >= VIABILITY_THRESHOLD)
            .unwrap_or(false)
    }

    /// Qualifies for its own chick illustration.
    pub fn is_illustration_eligible(&self) -> bool {
        self.hatch_likelihood
            .map(|h| h >= ILLUSTRATION_THRESHOLD)
            .unwrap_or(false)
    }

    /// Merge an analysis verdict onto this record, clamping the likelihood
    /// and stamping the analysis timestamp. Full-overwrite semantics: a
    /// second application replaces the first wholesale.
    pub fn apply_analysis(&mut self, analysis: EggAnalysis, at: DateTime<Utc>) {
        self.possible_hen_breeds = Some(analysis.possible_hen_breeds);
        self.predicted_chick_breed = Some(analysis.predicted_chick_breed);
        self.breed_confidence = Some(analysis.breed_confidence);
        self.hatch_likelihood = Some(clamp_hatch_likelihood(analysis.hatch_likelihood));
        self.chicken_appearance = Some(analysis.chicken_appearance);
        self.notes = analysis.notes;
        self.analysis_timestamp = Some(at);
    }
}

// ---------------------------------------------------------------------------
// ClutchMeta
// ---------------------------------------------------------------------------

/// The metadata row for a clutch (one uploaded image of eggs).
///
/// Created by the intake agent before any eggs exist; mutated by the
/// completion tracker (completed set) and the consolidator (aggregates,
/// composite image, timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClutchMeta {
    pub id: Uuid,
    pub image_key: String,
    pub upload_timestamp: DateTime<Utc>,
    /// Expected egg count, stamped by the intake agent once enumeration is
    /// complete. Absent while intake is still running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egg_count: Option<u32>,
    /// Egg ids that have reached a terminal processing outcome. A set rather
    /// than a bare counter so redelivered completion events cannot inflate
    /// progress past the true number of distinct completed eggs.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub completed_eggs: BTreeSet<Uuid>,
    /// Derived from `completed_eggs`; kept on the row for observability.
    #[serde(default)]
    pub processing_complete: u32,
    /// Set once, by the single write that first satisfied the fan-in barrier.
    /// Later completions and redeliveries observe it already set and must not
    /// fire consolidation again.
    #[serde(default)]
    pub consolidation_triggered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_egg_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viable_egg_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chicken_image_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consolidated_at: Option<DateTime<Utc>>,
}

impl ClutchMeta {
    pub fn new(id: Uuid, image_key: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id,
            image_key: image_key.into(),
            upload_timestamp: at,
            egg_count: None,
            completed_eggs: BTreeSet::new(),
            processing_complete: 0,
            consolidation_triggered: false,
            total_egg_count: None,
            viable_egg_count: None,
            chicken_image_key: None,
            consolidated_at: None,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::clutch_meta(self.id)
    }

    pub fn is_consolidated(&self) -> bool {
        self.consolidated_at.is_some()
    }

    /// Flip the consolidation trigger if every expected egg has completed and
    /// it has not fired yet. Returns `true` exactly once per clutch, on the
    /// write that satisfied the barrier.
    ///
    /// Both the completion path and the expected-count stamp call this, so
    /// the barrier also fires when the last egg completed before intake
    /// finished enumerating (and immediately for a zero-egg clutch).
    pub fn try_trigger_consolidation(&mut self) -> bool {
        if self.consolidation_triggered {
            return false;
        }
        match self.egg_count {
            Some(expected) if self.processing_complete >= expected => {
                self.consolidation_triggered = true;
                true
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// ClutchRow
// ---------------------------------------------------------------------------

/// A row under a clutch partition: either the metadata row or one egg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rowType", rename_all = "snake_case")]
pub enum ClutchRow {
    Meta(ClutchMeta),
    Egg(EggRecord),
}

impl ClutchRow {
    pub fn key(&self) -> RecordKey {
        match self {
            ClutchRow::Meta(meta) => meta.key(),
            ClutchRow::Egg(egg) => egg.key(),
        }
    }

    pub fn as_egg(&self) -> Option<&EggRecord> {
        match self {
            ClutchRow::Egg(egg) => Some(egg),
            ClutchRow::Meta(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
