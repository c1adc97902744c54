//! Party-planning lookups: menus, caterers and superhero themes.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{FlowError, Result};
use crate::tool::{Tool, ToolRegistry, ToolSpec, ValueType};

const CATERERS: &[(&str, f32)] = &[
    ("Gotham Catering Co.", 4.9),
    ("Wayne Manor Catering", 4.8),
    ("Gotham City Events", 4.7),
];

const THEMES: &[(&str, &str)] = &[
    (
        "classic heroes",
        "Justice League Gala: Guests come dressed as their favorite DC heroes with themed \
         cocktails like 'The Kryptonite Punch'.",
    ),
    (
        "villain masquerade",
        "Gotham Rogues' Ball: A mysterious masquerade where guests dress as classic Batman \
         villains.",
    ),
    (
        "futuristic gotham",
        "Neo-Gotham Night: A cyberpunk-style party inspired by Batman Beyond, with neon \
         decorations and futuristic gadgets.",
    ),
];

pub fn party_toolkit() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register_fn(
        ToolSpec::new("suggest_menu", "Suggests a menu based on the occasion.")
            .input(
                "occasion",
                ValueType::String,
                "The type of occasion for the party: casual, formal, superhero or custom.",
            )
            .output(ValueType::String),
        |input| {
            let occasion = required_str(&input, "suggest_menu", "occasion")?;
            Ok(json!(suggest_menu(occasion)))
        },
    )?;
    registry.register_fn(
        ToolSpec::new(
            "catering_service",
            "Returns the highest-rated catering service in Gotham City.",
        )
        .input(
            "query",
            ValueType::String,
            "A search term for finding catering services.",
        )
        .output(ValueType::String),
        |_input| Ok(json!(best_caterer())),
    )?;
    registry.register(SuperheroPartyThemeTool)?;
    Ok(registry)
}

fn suggest_menu(occasion: &str) -> &'static str {
    match occasion.trim().to_lowercase().as_str() {
        "casual" => "Pizza, snacks, and drinks.",
        "formal" => "3-course dinner with wine and dessert.",
        "superhero" => "Buffet with high-energy and healthy food.",
        _ => "Custom menu for the butler.",
    }
}

fn best_caterer() -> &'static str {
    CATERERS
        .iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(name, _)| *name)
        .unwrap_or_default()
}

struct SuperheroPartyThemeTool;

#[async_trait]
impl Tool for SuperheroPartyThemeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "superhero_party_theme",
            "Suggests a creative superhero-themed party idea for a category.",
        )
        .input(
            "category",
            ValueType::String,
            "The type of superhero party (e.g., 'classic heroes', 'villain masquerade', \
             'futuristic Gotham').",
        )
        .output(ValueType::String)
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let category = required_str(&input, "superhero_party_theme", "category")?
            .trim()
            .to_lowercase();
        let theme = THEMES
            .iter()
            .find(|(key, _)| *key == category)
            .map(|(_, theme)| *theme)
            .unwrap_or(
                "Themed party idea not found. Try 'classic heroes', 'villain masquerade', \
                 or 'futuristic Gotham'.",
            );
        Ok(json!(theme))
    }
}

fn required_str<'a>(input: &'a Value, tool: &str, field: &str) -> Result<&'a str> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| FlowError::argument(tool, format!("missing `{field}`")))
}
