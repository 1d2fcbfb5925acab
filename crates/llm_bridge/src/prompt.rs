//! Dish identification prompt and response parsing

use menupic_core::error::{ServiceError, ServiceResult};
use menupic_core::types::{DishIdentification, ViewportPoint, ViewportTextBlock};

/// Build the grouping prompt for one tap.
///
/// `blocks` should already be limited to the block budget.
pub fn build_identify_prompt(tap: ViewportPoint, blocks: &[ViewportTextBlock]) -> String {
    let data = serde_json::to_string(blocks).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"You are an AI assistant for a food menu app.
A user clicked on a menu at coordinates X:{x}, Y:{y}.

Below is a JSON list of OCR text blocks found on the screen.
These blocks are fragments. You must semantically and spatially group them to find the ONE dish the user selected.

Look at the 'frame' coordinates. Text on the same Y-axis is likely the same line.
Titles are often above descriptions. Prices are often to the right.

DATA:
{data}

TASK:
1. Assemble the Dish Name, Description and Price (if shown).
2. Estimate the main nutrients in one short line.
3. Generate a descriptive prompt for an AI image generator to visualize this specific food.

If no dish is near the clicked point, return null.

RETURN JSON ONLY (No Markdown):
{{
  "dishName": "String",
  "description": "String",
  "price": "String",
  "nutrients": "String",
  "imagePrompt": "String"
}}"#,
        x = tap.x.round(),
        y = tap.y.round(),
    )
}

/// Strip markdown code fences the model sometimes adds
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// Parse the model's answer.
///
/// An empty answer, `null` or a blank dish name means nothing was identified.
pub fn parse_identification(text: &str) -> ServiceResult<Option<DishIdentification>> {
    let json = strip_fences(text);
    if json.is_empty() || json == "null" {
        return Ok(None);
    }

    let identification: DishIdentification = serde_json::from_str(json)
        .map_err(|e| ServiceError::InvalidResponse(format!("unparseable dish JSON ({e}): {json}")))?;

    if identification.dish_name.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(identification))
}
