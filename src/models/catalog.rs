//! Static catalog of hosted models.
//!
//! Read-only after construction and shared across runs behind an `Arc`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Types ───────────────────────────────────────────────────────────────────

/// What kind of output a model produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCategory {
    Text,
    Code,
    Image,
    Video,
    Embedding,
}

/// Coarse latency class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedClass {
    Fast,
    Medium,
    Slow,
}

/// One catalog entry.
///
/// Costs are USD per million tokens for text models and per generated
/// asset for media models; they are only ever compared within a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub category: ModelCategory,
    pub context_window: u32,
    pub max_output: u32,
    pub cost_per_input_unit: f64,
    pub cost_per_output_unit: f64,
    pub speed: SpeedClass,
    /// Ordinal 1 (lowest) to 5 (highest).
    pub quality: u8,
    /// Lowercase ISO 639-1 codes.
    pub supported_languages: Vec<String>,
    pub supports_streaming: bool,
    pub supports_tool_calls: bool,
}

impl ModelDescriptor {
    /// Mean of input and output unit cost.
    pub fn average_cost(&self) -> f64 {
        (self.cost_per_input_unit + self.cost_per_output_unit) / 2.0
    }

    /// Whether `lang` is supported. Region subtags are ignored
    /// (`nl-BE` matches `nl`) and matching is case-insensitive.
    pub fn supports_language(&self, lang: &str) -> bool {
        let primary = lang
            .split(|c: char| c == '-' || c == '_')
            .next()
            .unwrap_or(lang)
            .trim()
            .to_ascii_lowercase();
        self.supported_languages
            .iter()
            .any(|l| l.eq_ignore_ascii_case(&primary))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("model catalog must contain at least one model")]
    Empty,

    #[error("duplicate model id in catalog: {id}")]
    DuplicateId { id: String },
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// Ordered, non-empty set of [`ModelDescriptor`]s with unique ids.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    /// Build a catalog. Order is preserved; the first entry is the router's
    /// last-resort model.
    pub fn new(models: Vec<ModelDescriptor>) -> Result<Self, CatalogError> {
        if models.is_empty() {
            return Err(CatalogError::Empty);
        }
        for (i, m) in models.iter().enumerate() {
            if models[..i].iter().any(|other| other.id == m.id) {
                return Err(CatalogError::DuplicateId { id: m.id.clone() });
            }
        }
        Ok(Self { models })
    }

    /// The built-in catalog.
    pub fn builtin() -> Self {
        Self {
            models: builtin_models(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn by_category(&self, category: ModelCategory) -> Vec<&ModelDescriptor> {
        self.models
            .iter()
            .filter(|m| m.category == category)
            .collect()
    }

    /// First entry. The catalog is never empty.
    pub fn first(&self) -> &ModelDescriptor {
        &self.models[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

// ─── Built-in data ───────────────────────────────────────────────────────────

const EU_LANGUAGES: &[&str] = &["en", "nl", "de", "fr", "es", "it", "pt"];

#[allow(clippy::too_many_arguments)]
fn descriptor(
    id: &str,
    category: ModelCategory,
    context_window: u32,
    max_output: u32,
    cost: (f64, f64),
    speed: SpeedClass,
    quality: u8,
    languages: &[&str],
    tools: bool,
) -> ModelDescriptor {
    let streams = matches!(category, ModelCategory::Text | ModelCategory::Code);
    ModelDescriptor {
        id: id.to_string(),
        category,
        context_window,
        max_output,
        cost_per_input_unit: cost.0,
        cost_per_output_unit: cost.1,
        speed,
        quality,
        supported_languages: languages.iter().map(|l| l.to_string()).collect(),
        supports_streaming: streams,
        supports_tool_calls: tools,
    }
}

fn builtin_models() -> Vec<ModelDescriptor> {
    use ModelCategory::*;
    use SpeedClass::*;

    vec![
        // Text
        descriptor("gpt-4o", Text, 128_000, 16_384, (2.5, 10.0), Medium, 5, EU_LANGUAGES, true),
        descriptor("gpt-4o-mini", Text, 128_000, 16_384, (0.15, 0.6), Fast, 4, EU_LANGUAGES, true),
        descriptor("claude-3-5-sonnet", Text, 200_000, 8_192, (3.0, 15.0), Medium, 5, EU_LANGUAGES, true),
        descriptor("claude-3-5-haiku", Text, 200_000, 8_192, (0.8, 4.0), Fast, 4, EU_LANGUAGES, true),
        descriptor("gemini-1.5-flash", Text, 1_000_000, 8_192, (0.075, 0.3), Fast, 3, EU_LANGUAGES, true),
        descriptor("mistral-large", Text, 128_000, 8_192, (2.0, 6.0), Medium, 4, &["en", "fr", "de", "es", "it", "nl"], true),
        descriptor("llama-3.1-70b", Text, 128_000, 4_096, (0.59, 0.79), Fast, 3, &["en", "de", "fr", "es", "it", "pt"], true),
        // Code
        descriptor("deepseek-coder", Code, 128_000, 8_192, (0.14, 0.28), Fast, 4, &["en"], true),
        descriptor("codestral", Code, 32_000, 8_192, (0.3, 0.9), Fast, 4, &["en"], false),
        // Image (cost per image)
        descriptor("flux-pro", Image, 4_000, 1, (0.05, 0.05), Slow, 5, EU_LANGUAGES, false),
        descriptor("dall-e-3", Image, 4_000, 1, (0.04, 0.04), Slow, 4, EU_LANGUAGES, false),
        descriptor("flux-schnell", Image, 4_000, 1, (0.003, 0.003), Fast, 3, &["en"], false),
        // Video (cost per clip)
        descriptor("runway-gen3", Video, 1_000, 1, (0.5, 0.5), Slow, 5, &["en"], false),
        descriptor("kling-1.5", Video, 1_000, 1, (0.28, 0.28), Slow, 4, &["en"], false),
        // Embedding
        descriptor("text-embedding-3-small", Embedding, 8_191, 0, (0.02, 0.0), Fast, 3, EU_LANGUAGES, false),
    ]
}

// ─── Tests ───────────────────────────────────────────────────────────────────
