//! Tool definitions and typed inputs for the two agent loops.
//!
//! The dispatch set is closed: [`ToolKind`] enumerates every tool a loop is
//! willing to execute, and anything else the model invents gets a structured
//! error result fed back instead of execution.

use chrono::{DateTime, Utc};
use hl_core::types::{BreedConfidence, ChickAppearance, EggAnalysis, EggRecord};
use hl_model::ToolSpec;
use serde::Deserialize;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ToolKind
// ---------------------------------------------------------------------------

/// The closed set of tools the pipeline's agents execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    StoreEggData,
    SaveEggAnalysis,
}

impl ToolKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "store_egg_data" => Some(ToolKind::StoreEggData),
            "save_egg_analysis" => Some(ToolKind::SaveEggAnalysis),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::StoreEggData => "store_egg_data",
            ToolKind::SaveEggAnalysis => "save_egg_analysis",
        }
    }
}

// ---------------------------------------------------------------------------
// store_egg_data
// ---------------------------------------------------------------------------

fn default_unknown() -> String {
    "unknown".to_string()
}

fn default_none_marking() -> String {
    "none".to_string()
}

/// Input for `store_egg_data`. Every field the model omits falls back to a
/// neutral placeholder so a sloppy call still yields a persistable record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreEggDataInput {
    #[serde(default = "default_unknown")]
    pub color: String,
    #[serde(default = "default_unknown")]
    pub shape: String,
    #[serde(default = "default_unknown")]
    pub size: String,
    #[serde(default = "default_unknown")]
    pub shell_texture: String,
    #[serde(default = "default_unknown")]
    pub shell_integrity: String,
    #[serde(default = "default_unknown")]
    pub hardness: String,
    #[serde(default = "default_none_marking")]
    pub spots_markings: String,
    #[serde(default = "default_unknown")]
    pub bloom_condition: String,
    #[serde(default = "default_unknown")]
    pub cleanliness: String,
    #[serde(default)]
    pub visible_defects: Vec<String>,
    #[serde(default = "default_unknown")]
    pub overall_grade: String,
    #[serde(default)]
    pub notes: String,
}

impl StoreEggDataInput {
    /// Materialize a fresh egg record under the given clutch.
    pub fn into_record(self, clutch_id: Uuid, egg_id: Uuid, created_at: DateTime<Utc>) -> EggRecord {
        EggRecord {
            id: egg_id,
            clutch_id,
            created_at,
            color: self.color,
            shape: self.shape,
            size: self.size,
            shell_texture: self.shell_texture,
            shell_integrity: self.shell_integrity,
            hardness: self.hardness,
            spots_markings: self.spots_markings,
            bloom_condition: self.bloom_condition,
            cleanliness: self.cleanliness,
            visible_defects: self.visible_defects,
            overall_grade: self.overall_grade,
            notes: self.notes,
            possible_hen_breeds: None,
            predicted_chick_breed: None,
            breed_confidence: None,
            hatch_likelihood: None,
            chicken_appearance: None,
            analysis_timestamp: None,
            chick_image_url: None,
            chick_image_generated_at: None,
        }
    }
}

pub fn store_egg_data_spec() -> ToolSpec {
    ToolSpec {
        name: "store_egg_data".to_string(),
        description: "Save the analysis results for a single egg to the database. \
                      Call this tool once for EACH egg you identify in the image."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "color": { "type": "string", "description": "Shell color (white, cream, brown, dark brown, blue, green, olive, speckled)" },
                "shape": { "type": "string", "description": "Egg shape (oval, round, elongated, pointed, asymmetric)" },
                "size": { "type": "string", "description": "Relative size (small, medium, large, extra-large, jumbo)" },
                "shellTexture": { "type": "string", "description": "Surface texture (smooth, rough, porous, bumpy, wrinkled, ridged)" },
                "shellIntegrity": { "type": "string", "description": "Shell condition (intact, hairline crack, cracked, chipped, broken)" },
                "hardness": { "type": "string", "description": "Shell hardness estimate (hard, normal, soft, thin)" },
                "spotsMarkings": { "type": "string", "description": "Surface markings (none, light speckles, heavy speckles, calcium deposits)" },
                "bloomCondition": { "type": "string", "description": "Protective coating status (present, partial, absent)" },
                "cleanliness": { "type": "string", "description": "Cleanliness level (clean, slightly dirty, dirty, debris attached)" },
                "visibleDefects": { "type": "array", "items": { "type": "string" }, "description": "Array of visible defects" },
                "overallGrade": { "type": "string", "description": "Quality grade (A, B, C, non-viable)" },
                "notes": { "type": "string", "description": "Additional observations about this specific egg" }
            },
            "required": ["color", "shape", "size", "shellTexture", "shellIntegrity", "hardness", "spotsMarkings", "bloomCondition", "cleanliness", "visibleDefects", "overallGrade", "notes"]
        }),
    }
}

// ---------------------------------------------------------------------------
// save_egg_analysis
// ---------------------------------------------------------------------------

fn default_breeds() -> Vec<String> {
    vec!["Unknown".to_string()]
}

fn default_breed() -> String {
    "Unknown".to_string()
}

fn default_confidence() -> BreedConfidence {
    BreedConfidence::Uncertain
}

fn default_hatch() -> f64 {
    50.0
}

/// Input for `save_egg_analysis`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveEggAnalysisInput {
    #[serde(default = "default_breeds")]
    pub possible_hen_breeds: Vec<String>,
    #[serde(default = "default_breed")]
    pub predicted_chick_breed: String,
    #[serde(default = "default_confidence")]
    pub breed_confidence: BreedConfidence,
    #[serde(default = "default_hatch")]
    pub hatch_likelihood: f64,
    #[serde(default)]
    pub chicken_appearance: ChickAppearance,
    #[serde(default)]
    pub notes: String,
}

impl SaveEggAnalysisInput {
    pub fn into_analysis(self) -> EggAnalysis {
        EggAnalysis {
            possible_hen_breeds: self.possible_hen_breeds,
            predicted_chick_breed: self.predicted_chick_breed,
            breed_confidence: self.breed_confidence,
            hatch_likelihood: self.hatch_likelihood,
            chicken_appearance: self.chicken_appearance,
            notes: self.notes,
        }
    }
}

pub fn save_egg_analysis_spec() -> ToolSpec {
    ToolSpec {
        name: "save_egg_analysis".to_string(),
        description: "Save the egg analysis results to the database. \
                      You MUST call this tool with your analysis findings."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "possibleHenBreeds": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Array of up to 3 most likely chicken breeds that LAID this egg (the mother hen)"
                },
                "predictedChickBreed": {
                    "type": "string",
                    "description": "Single predicted breed of the chick that will hatch from this egg"
                },
                "breedConfidence": {
                    "type": "string",
                    "enum": ["high", "medium", "low", "uncertain"],
                    "description": "Confidence level in breed predictions"
                },
                "hatchLikelihood": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 100,
                    "description": "Percentage likelihood of successful hatching (0-100). THIS IS THE MOST IMPORTANT OUTPUT."
                },
                "chickenAppearance": {
                    "type": "object",
                    "description": "Predicted appearance of the chick that will hatch",
                    "properties": {
                        "plumageColor": { "type": "string" },
                        "combType": { "type": "string" },
                        "bodyType": { "type": "string" },
                        "featherPattern": { "type": "string" },
                        "legColor": { "type": "string" }
                    },
                    "required": ["plumageColor", "combType", "bodyType", "featherPattern", "legColor"]
                },
                "notes": { "type": "string", "description": "Brief observations about the egg" }
            },
            "required": ["possibleHenBreeds", "predictedChickBreed", "breedConfidence", "hatchLikelihood", "chickenAppearance", "notes"]
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
