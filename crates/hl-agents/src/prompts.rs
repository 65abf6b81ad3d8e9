//! Prompt construction for both agent loops.
//!
//! Kept in one place so the wording the model sees is reviewable without
//! digging through the agents themselves.

use hl_core::types::EggRecord;

// ---------------------------------------------------------------------------
// Vision intake
// ---------------------------------------------------------------------------

pub fn intake_system_prompt() -> String {
    "You are an expert poultry scientist analyzing an image of eggs. Your task is to:

1. Identify ALL eggs visible in the image
2. For EACH egg, assess its quality characteristics
3. Call the store_egg_data tool ONCE for EACH egg you identify

Quality dimensions to assess for each egg:
- color: Shell color (white, cream, brown, dark brown, blue, green, olive, speckled)
- shape: Overall shape (oval, round, elongated, pointed, asymmetric)
- size: Relative size (small, medium, large, extra-large, jumbo)
- shellTexture: Surface texture (smooth, rough, porous, bumpy, wrinkled, ridged)
- shellIntegrity: Structural condition (intact, hairline crack, cracked, chipped, broken)
- hardness: Estimated hardness based on appearance (hard, normal, soft, thin)
- spotsMarkings: Surface markings (none, light speckles, heavy speckles, calcium deposits)
- bloomCondition: Protective coating (present=matte, partial, absent=shiny)
- cleanliness: How clean (clean, slightly dirty, dirty, debris attached)
- visibleDefects: Array of any defects visible
- overallGrade: Quality grade (A=excellent, B=good, C=acceptable, non-viable)
- notes: Brief observations about this specific egg

IMPORTANT: Call store_egg_data for EVERY egg in the image, even if they look similar."
        .to_string()
}

pub fn intake_user_message() -> String {
    "Analyze this egg image carefully. Identify all eggs visible and assess each one. \
     Then use the store_egg_data tool to save the results for each egg."
        .to_string()
}

// ---------------------------------------------------------------------------
// Viability analysis
// ---------------------------------------------------------------------------

pub fn viability_system_prompt() -> String {
    "You are an expert poultry scientist. Analyze egg characteristics and save your findings using the save_egg_analysis tool.

CRITICAL SCORING GUIDELINES for hatchLikelihood:
- Shell integrity: intact=90-100%, hairline crack=50-70%, cracked=10-30%, broken=0-10%
- Hardness: normal=good, soft/thin=reduce 20-30%
- Bloom condition: present=good, absent=reduce 10-20%
- Visible defects: each defect reduces by 10-15%
- Overall grade: A=+10%, B=0%, C=-10%, non-viable=max 20%

You MUST call the save_egg_analysis tool with your analysis."
        .to_string()
}

/// Render the egg's intake attributes as the bullet list the analysis model
/// scores from. Empty defect lists read as "none".
pub fn viability_user_message(egg: &EggRecord) -> String {
    let defects = if egg.visible_defects.is_empty() {
        "none".to_string()
    } else {
        egg.visible_defects.join(", ")
    };

    format!(
        "Analyze this egg and save your analysis:\n\
         - Color: {}\n\
         - Shape: {}\n\
         - Size: {}\n\
         - Shell Texture: {}\n\
         - Shell Integrity: {}\n\
         - Hardness: {}\n\
         - Spots/Markings: {}\n\
         - Bloom Condition: {}\n\
         - Cleanliness: {}\n\
         - Visible Defects: {}\n\
         - Overall Grade: {}",
        egg.color,
        egg.shape,
        egg.size,
        egg.shell_texture,
        egg.shell_integrity,
        egg.hardness,
        egg.spots_markings,
        egg.bloom_condition,
        egg.cleanliness,
        defects,
        egg.overall_grade,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
