//! Leftover analysis and the daily kitchen lesson.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::{strip_json_fence, Content, GenerateRequest, GenerationConfig, GenerativeClient, Part};
use crate::error::{DeeliteError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlavorProfile {
    Sweet,
    Sour,
    Salty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeStep {
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: String,
    pub title: String,
    pub description: String,
    pub flavor_profile: FlavorProfile,
    pub ingredients_used: Vec<String>,
    #[serde(default)]
    pub missing_ingredients: Vec<String>,
    pub steps: Vec<RecipeStep>,
    pub prep_time_minutes: f64,
    pub difficulty: Difficulty,
    pub fun_fact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub identified_ingredients: Vec<String>,
    pub recipes: Vec<Recipe>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyLesson {
    pub title: String,
    pub content: String,
    pub emoji: String,
}

impl DailyLesson {
    /// Shown whenever the model cannot produce a lesson.
    pub fn fallback() -> Self {
        Self {
            title: "Chef's Secret".into(),
            content: "A dull knife is more dangerous than a sharp one! Keep them honed.".into(),
            emoji: "🔪".into(),
        }
    }
}

const ANALYSIS_PROMPT: &str = "Look at this photo of leftover food.
1. Identify the ingredients.
2. Create exactly three distinct, creative, and tasty recipes for a teenage home cook.
3. STRICTLY provide: one 'Sweet' recipe, one 'Sour' recipe, and one 'Salty' recipe.
4. Make the recipe titles fun and the descriptions appetizing.
5. Keep the difficulty reasonable for a home kitchen.";

const LESSON_PROMPT: &str = "Give me a fun, short 'Daily Lesson' for a teenage chef about cooking \
techniques, food science, or sustainability.";

fn recipe_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "identifiedIngredients": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "List of food items identified in the image"
            },
            "recipes": {
                "type": "ARRAY",
                "description": "Exactly 3 creative recipes: one Sweet, one Sour, one Salty",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "id": { "type": "STRING" },
                        "title": { "type": "STRING" },
                        "description": { "type": "STRING", "description": "A catchy, fun description" },
                        "flavorProfile": { "type": "STRING", "enum": ["Sweet", "Sour", "Salty"] },
                        "ingredientsUsed": { "type": "ARRAY", "items": { "type": "STRING" } },
                        "missingIngredients": {
                            "type": "ARRAY",
                            "items": { "type": "STRING" },
                            "description": "Common pantry items needed but not seen (e.g., oil, salt, sugar)"
                        },
                        "steps": {
                            "type": "ARRAY",
                            "items": {
                                "type": "OBJECT",
                                "properties": {
                                    "instruction": { "type": "STRING" },
                                    "tip": { "type": "STRING", "description": "A helpful cooking hack or safety tip" }
                                }
                            }
                        },
                        "prepTimeMinutes": { "type": "NUMBER" },
                        "difficulty": { "type": "STRING", "enum": ["Easy", "Medium", "Hard"] },
                        "funFact": { "type": "STRING", "description": "A fun food fact related to this dish" }
                    },
                    "required": ["id", "title", "description", "flavorProfile", "ingredientsUsed",
                                 "steps", "prepTimeMinutes", "difficulty", "funFact"]
                }
            }
        },
        "required": ["identifiedIngredients", "recipes"]
    })
}

fn lesson_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "title": { "type": "STRING" },
            "content": {
                "type": "STRING",
                "description": "A short, fun, 2-sentence lesson about cooking science, history, or sustainability."
            },
            "emoji": { "type": "STRING" }
        },
        "required": ["title", "content", "emoji"]
    })
}

/// Parse and validate the model's analysis JSON.
///
/// # Errors
/// `UpstreamFormat` when the JSON does not match the schema, or when it does
/// not hold exactly one recipe per flavor profile.
pub fn parse_analysis(text: &str) -> Result<AnalysisResult> {
    let result: AnalysisResult = serde_json::from_str(strip_json_fence(text))
        .map_err(|e| DeeliteError::UpstreamFormat(format!("analysis json: {e}")))?;

    if result.recipes.len() != 3 {
        return Err(DeeliteError::UpstreamFormat(format!(
            "expected exactly 3 recipes, got {}",
            result.recipes.len()
        )));
    }
    let flavors: HashSet<FlavorProfile> = result.recipes.iter().map(|r| r.flavor_profile).collect();
    if flavors.len() != 3 {
        return Err(DeeliteError::UpstreamFormat(
            "recipes must cover Sweet, Sour and Salty once each".into(),
        ));
    }
    if let Some(r) = result.recipes.iter().find(|r| r.steps.is_empty()) {
        return Err(DeeliteError::UpstreamFormat(format!(
            "recipe '{}' has no steps",
            r.title
        )));
    }
    Ok(result)
}

pub fn parse_lesson(text: &str) -> Result<DailyLesson> {
    let lesson: DailyLesson = serde_json::from_str(strip_json_fence(text))
        .map_err(|e| DeeliteError::UpstreamFormat(format!("lesson json: {e}")))?;
    if lesson.title.trim().is_empty() || lesson.content.trim().is_empty() {
        return Err(DeeliteError::UpstreamFormat("lesson is empty".into()));
    }
    Ok(lesson)
}

impl GenerativeClient {
    /// Identify ingredients in a photo and propose one recipe per flavor.
    ///
    /// `image_base64` is the standard-base64 image payload.
    pub async fn analyze_leftovers(
        &self,
        image_base64: &str,
        mime_type: &str,
    ) -> Result<AnalysisResult> {
        let request = GenerateRequest {
            contents: vec![Content::user(vec![
                Part::inline(mime_type, image_base64),
                Part::text(ANALYSIS_PROMPT),
            ])],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                temperature: Some(0.7),
                ..GenerationConfig::json(recipe_schema())
            }),
        };
        let text = self.generate(&request).await?;
        let result = parse_analysis(&text)?;
        info!(
            ingredients = result.identified_ingredients.len(),
            "leftover analysis complete"
        );
        Ok(result)
    }

    /// Today's lesson; the fixed fallback lesson on any failure.
    pub async fn daily_lesson(&self) -> DailyLesson {
        let request = GenerateRequest {
            contents: vec![Content::user(vec![Part::text(LESSON_PROMPT)])],
            system_instruction: None,
            generation_config: Some(GenerationConfig::json(lesson_schema())),
        };
        match self.generate(&request).await.and_then(|t| parse_lesson(&t)) {
            Ok(lesson) => lesson,
            Err(e) => {
                warn!("daily lesson unavailable, using fallback: {e}");
                DailyLesson::fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe_json(id: &str, flavor: &str) -> serde_json::Value {
        json!({
            "id": id,
            "title": format!("{flavor} Surprise"),
            "description": "Tasty.",
            "flavorProfile": flavor,
            "ingredientsUsed": ["rice"],
            "steps": [{ "instruction": "Cook it.", "tip": "Stir often." }, { "instruction": "Serve." }],
            "prepTimeMinutes": 15,
            "difficulty": "Easy",
            "funFact": "Rice is a grass."
        })
    }

    fn analysis_json(flavors: &[&str]) -> String {
        let recipes: Vec<_> = flavors
            .iter()
            .enumerate()
            .map(|(i, f)| recipe_json(&format!("r{i}"), f))
            .collect();
        json!({ "identifiedIngredients": ["rice", "egg"], "recipes": recipes }).to_string()
    }

    #[test]
    fn parses_valid_analysis() {
        let result = parse_analysis(&analysis_json(&["Sweet", "Sour", "Salty"])).unwrap();
        assert_eq!(result.identified_ingredients, vec!["rice", "egg"]);
        assert_eq!(result.recipes[1].flavor_profile, FlavorProfile::Sour);
        assert_eq!(result.recipes[0].steps[0].tip.as_deref(), Some("Stir often."));
        assert_eq!(result.recipes[0].steps[1].tip, None);
        assert!(result.recipes[0].missing_ingredients.is_empty());
        assert_eq!(result.recipes[0].prep_time_minutes, 15.0);
    }

    #[test]
    fn rejects_wrong_recipe_count() {
        let err = parse_analysis(&analysis_json(&["Sweet", "Sour"])).unwrap_err();
        assert!(matches!(err, DeeliteError::UpstreamFormat(_)));
    }

    #[test]
    fn rejects_duplicate_flavors() {
        let err = parse_analysis(&analysis_json(&["Sweet", "Sweet", "Salty"])).unwrap_err();
        assert!(err.to_string().contains("Sweet, Sour and Salty"));
    }

    #[test]
    fn rejects_unknown_flavor_and_garbage() {
        assert!(parse_analysis(&analysis_json(&["Sweet", "Umami", "Salty"])).is_err());
        assert!(parse_analysis("not json").is_err());
    }

    #[test]
    fn lesson_parses_and_rejects_blank() {
        let lesson =
            parse_lesson(r#"{"title":"Maillard","content":"Browning is flavor.","emoji":"🥩"}"#)
                .unwrap();
        assert_eq!(lesson.title, "Maillard");
        assert!(parse_lesson(r#"{"title":"","content":"","emoji":""}"#).is_err());
        assert!(parse_lesson("{}").is_err());
    }

    #[test]
    fn fallback_lesson_is_stable() {
        assert_eq!(DailyLesson::fallback().title, "Chef's Secret");
    }

    #[tokio::test]
    async fn daily_lesson_falls_back_when_unreachable() {
        let client = GenerativeClient::with_endpoint("http://127.0.0.1:9", "k", "m").unwrap();
        assert_eq!(client.daily_lesson().await, DailyLesson::fallback());
    }

    #[test]
    fn schema_lists_all_flavors() {
        let schema = recipe_schema();
        let flavors = &schema["properties"]["recipes"]["items"]["properties"]["flavorProfile"]["enum"];
        assert_eq!(flavors, &json!(["Sweet", "Sour", "Salty"]));
    }
}
