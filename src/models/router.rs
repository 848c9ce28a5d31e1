//! Task-based model routing.
//!
//! Every task type maps to a preference list (`primary`, `fallback`,
//! optional `budget`). [`ModelRouter::select_model`] picks from that list by
//! priority, then relaxes toward other entries to satisfy budget, quality and
//! language constraints. It never fails: an unmapped task gets
//! [`DEFAULT_MODEL_ID`], and an unresolvable id falls through to the
//! catalog's first entry.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::catalog::{ModelCatalog, ModelDescriptor};

/// Model used for tasks with no routing entry.
pub const DEFAULT_MODEL_ID: &str = "gpt-4o";

// ─── Task types ──────────────────────────────────────────────────────────────

/// Coarse category of work used to pick a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CodeGenerate,
    CodeReview,
    ImageGenerate,
    VideoGenerate,
    VideoScript,
    AffiliateReview,
    Seo,
    SocialPost,
    Translate,
    Summarize,
    BlogLong,
    BlogShort,
    /// Tool-using assistant conversation.
    Chat,
}

impl TaskType {
    pub const ALL: [TaskType; 13] = [
        TaskType::CodeGenerate,
        TaskType::CodeReview,
        TaskType::ImageGenerate,
        TaskType::VideoGenerate,
        TaskType::VideoScript,
        TaskType::AffiliateReview,
        TaskType::Seo,
        TaskType::SocialPost,
        TaskType::Translate,
        TaskType::Summarize,
        TaskType::BlogLong,
        TaskType::BlogShort,
        TaskType::Chat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CodeGenerate => "code_generate",
            TaskType::CodeReview => "code_review",
            TaskType::ImageGenerate => "image_generate",
            TaskType::VideoGenerate => "video_generate",
            TaskType::VideoScript => "video_script",
            TaskType::AffiliateReview => "affiliate_review",
            TaskType::Seo => "seo",
            TaskType::SocialPost => "social_post",
            TaskType::Translate => "translate",
            TaskType::Summarize => "summarize",
            TaskType::BlogLong => "blog_long",
            TaskType::BlogShort => "blog_short",
            TaskType::Chat => "chat",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown task type: {s}"))
    }
}

/// Caller preference when choosing among a route's models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Quality,
    Speed,
    Cost,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quality" => Ok(Priority::Quality),
            "speed" => Ok(Priority::Speed),
            "cost" => Ok(Priority::Cost),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Best-effort constraints, checked in field order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingConstraints {
    /// Upper bound on [`ModelDescriptor::average_cost`].
    pub max_budget: Option<f64>,
    /// Lower bound on [`ModelDescriptor::quality`].
    pub min_quality: Option<u8>,
    /// ISO 639-1 code the output will be written in.
    pub language: Option<String>,
}

/// Preference list for one task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRoutingEntry {
    pub primary: String,
    pub fallback: String,
    #[serde(default)]
    pub budget: Option<String>,
}

impl TaskRoutingEntry {
    pub fn new(primary: &str, fallback: &str, budget: Option<&str>) -> Self {
        Self {
            primary: primary.to_string(),
            fallback: fallback.to_string(),
            budget: budget.map(str::to_string),
        }
    }
}

/// The built-in routing table.
pub fn default_routes() -> HashMap<TaskType, TaskRoutingEntry> {
    use TaskType::*;
    let e = TaskRoutingEntry::new;
    HashMap::from([
        (CodeGenerate, e("claude-3-5-sonnet", "deepseek-coder", Some("codestral"))),
        (CodeReview, e("gpt-4o", "deepseek-coder", None)),
        (ImageGenerate, e("flux-pro", "dall-e-3", Some("flux-schnell"))),
        (VideoGenerate, e("runway-gen3", "kling-1.5", None)),
        (VideoScript, e("gpt-4o", "claude-3-5-haiku", Some("gpt-4o-mini"))),
        (AffiliateReview, e("gpt-4o", "mistral-large", Some("gpt-4o-mini"))),
        (Seo, e("gpt-4o-mini", "gemini-1.5-flash", None)),
        (SocialPost, e("gpt-4o-mini", "claude-3-5-haiku", Some("gemini-1.5-flash"))),
        (Translate, e("mistral-large", "gpt-4o-mini", Some("gemini-1.5-flash"))),
        (Summarize, e("claude-3-5-haiku", "gemini-1.5-flash", None)),
        (BlogLong, e("claude-3-5-sonnet", "gpt-4o", Some("gpt-4o-mini"))),
        (BlogShort, e("gpt-4o", "gpt-4o-mini", Some("gemini-1.5-flash"))),
        (Chat, e("gpt-4o", "claude-3-5-haiku", Some("gpt-4o-mini"))),
    ])
}

// ─── Task detection ──────────────────────────────────────────────────────────

/// Keyword rules for [`detect_task_type`], evaluated top to bottom.
///
/// The order is a contract: code terms win over image terms, image over
/// video, video over the content-specific types, and those over long-form
/// blog terms. Reordering silently changes routing.
///
/// A keyword matches only where a word starts, so "reel" does not fire on
/// "freelance". Keywords of up to [`SHORT_KEYWORD_CHARS`] characters must also
/// end a word, so "rust" does not fire on "trust" or "rustic" while "image"
/// still matches "images".
pub const TASK_RULES: &[(TaskType, &[&str])] = &[
    (TaskType::CodeReview, &["code review", "review this code", "review my code", "refactor"]),
    (
        TaskType::CodeGenerate,
        &[
            "code", "function", "python", "javascript", "typescript", "rust", "html", "css",
            "sql", "regex", "api endpoint", "programmeer",
        ],
    ),
    (
        TaskType::ImageGenerate,
        &["image", "afbeelding", "picture", "photo", "foto", "illustration", "logo", "thumbnail", "banner"],
    ),
    (TaskType::VideoGenerate, &["generate a video", "render a video", "video clip", "animatie"]),
    (TaskType::VideoScript, &["video", "youtube", "tiktok", "reel", "vlog", "voice-over"]),
    (TaskType::AffiliateReview, &["affiliate", "product review", "comparison", "vergelijking", "best buy"]),
    (TaskType::Seo, &["seo", "keyword research", "meta description", "zoekwoord"]),
    (
        TaskType::SocialPost,
        &["social media", "social post", "tweet", "linkedin", "instagram", "facebook"],
    ),
    (TaskType::Translate, &["translate", "translation", "vertaal"]),
    (TaskType::Summarize, &["summarize", "summarise", "summary", "samenvatting", "tl;dr"]),
    (TaskType::BlogLong, &["long-form", "in-depth", "pillar", "ultimate guide", "uitgebreid"]),
];

/// Classify free text into a task type. First matching rule wins; no match
/// yields [`TaskType::BlogShort`].
pub fn detect_task_type(text: &str) -> TaskType {
    let lowered = text.to_lowercase();
    TASK_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| contains_keyword(&lowered, k)))
        .map(|(task, _)| *task)
        .unwrap_or(TaskType::BlogShort)
}

/// Keywords this short must match a whole word.
pub const SHORT_KEYWORD_CHARS: usize = 4;

fn contains_keyword(text: &str, keyword: &str) -> bool {
    let whole_word = keyword.chars().count() <= SHORT_KEYWORD_CHARS;
    text.match_indices(keyword).any(|(start, _)| {
        let end = start + keyword.len();
        let starts_word = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let ends_word = text[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        starts_word && (!whole_word || ends_word)
    })
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Chooses a model per task. Read-only after construction.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    catalog: Arc<ModelCatalog>,
    routes: HashMap<TaskType, TaskRoutingEntry>,
}

impl ModelRouter {
    pub fn new(catalog: Arc<ModelCatalog>, routes: HashMap<TaskType, TaskRoutingEntry>) -> Self {
        Self { catalog, routes }
    }

    /// Built-in catalog with the built-in routing table.
    pub fn builtin() -> Self {
        Self::new(Arc::new(ModelCatalog::builtin()), default_routes())
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn route(&self, task: TaskType) -> Option<&TaskRoutingEntry> {
        self.routes.get(&task)
    }

    /// Look up a model id in the catalog.
    pub fn resolve(&self, id: &str) -> Option<&ModelDescriptor> {
        self.catalog.get(id)
    }

    /// The default model, or the catalog's first entry if it is missing.
    fn default_model(&self) -> &ModelDescriptor {
        self.catalog
            .get(DEFAULT_MODEL_ID)
            .unwrap_or_else(|| self.catalog.first())
    }

    /// Pick a model for `task`.
    ///
    /// 1. Priority picks the candidate id: `cost` → budget (else fallback),
    ///    `speed` → fallback, `quality` → primary.
    /// 2. Unresolvable ids fall back to the route's fallback, then to the
    ///    catalog's first entry.
    /// 3. Budget: over `max_budget` → the budget model, if it fits.
    /// 4. Quality: under `min_quality` → the primary model, if it qualifies.
    /// 5. Language: unsupported → the fallback model, if it supports it.
    pub fn select_model(
        &self,
        task: TaskType,
        priority: Priority,
        constraints: &RoutingConstraints,
    ) -> &ModelDescriptor {
        let Some(entry) = self.routes.get(&task) else {
            let model = self.default_model();
            tracing::debug!(task = %task, model = %model.id, "unmapped task, using default model");
            return model;
        };

        let candidate_id = match priority {
            Priority::Cost => entry.budget.as_deref().unwrap_or(&entry.fallback),
            Priority::Speed => entry.fallback.as_str(),
            Priority::Quality => entry.primary.as_str(),
        };

        let mut candidate = self
            .catalog
            .get(candidate_id)
            .or_else(|| self.catalog.get(&entry.fallback))
            .unwrap_or_else(|| {
                tracing::warn!(task = %task, id = candidate_id, "route references unknown models");
                self.catalog.first()
            });

        if let Some(max) = constraints.max_budget {
            if candidate.average_cost() > max {
                if let Some(budget) = entry.budget.as_deref().and_then(|id| self.catalog.get(id)) {
                    if budget.average_cost() <= max {
                        candidate = budget;
                    }
                }
            }
        }

        if let Some(min) = constraints.min_quality {
            if candidate.quality < min {
                if let Some(primary) = self.catalog.get(&entry.primary) {
                    if primary.quality >= min {
                        candidate = primary;
                    }
                }
            }
        }

        if let Some(lang) = constraints.language.as_deref() {
            if !candidate.supports_language(lang) {
                if let Some(fallback) = self.catalog.get(&entry.fallback) {
                    if fallback.supports_language(lang) {
                        candidate = fallback;
                    }
                }
            }
        }

        tracing::debug!(
            task = %task,
            priority = ?priority,
            model = %candidate.id,
            "model selected"
        );
        candidate
    }

    /// Model for the single retry after `failed_id` errored.
    ///
    /// The route's fallback, then the default model, then the catalog's first
    /// entry; the first of these that differs from `failed_id`.
    pub fn fallback_model(&self, task: TaskType, failed_id: &str) -> &ModelDescriptor {
        let route_fallback = self
            .routes
            .get(&task)
            .and_then(|e| self.catalog.get(&e.fallback));

        [route_fallback, self.catalog.get(DEFAULT_MODEL_ID), Some(self.catalog.first())]
            .into_iter()
            .flatten()
            .find(|m| m.id != failed_id)
            .unwrap_or_else(|| self.default_model())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> ModelRouter {
        ModelRouter::builtin()
    }

    fn none() -> RoutingConstraints {
        RoutingConstraints::default()
    }

    #[test]
    fn test_every_default_route_resolves() {
        let r = router();
        for (task, entry) in default_routes() {
            assert!(r.resolve(&entry.primary).is_some(), "{task}: primary");
            assert!(r.resolve(&entry.fallback).is_some(), "{task}: fallback");
            if let Some(budget) = &entry.budget {
                assert!(r.resolve(budget).is_some(), "{task}: budget");
            }
        }
    }

    #[test]
    fn test_select_deterministic() {
        let r = router();
        let first = r
            .select_model(TaskType::CodeGenerate, Priority::Quality, &none())
            .id
            .clone();
        for _ in 0..50 {
            let again = r.select_model(TaskType::CodeGenerate, Priority::Quality, &none());
            assert_eq!(again.id, first);
        }
        assert_eq!(first, "claude-3-5-sonnet");
    }

    #[test]
    fn test_priority_picks_entry_slot() {
        let r = router();
        let pick = |p| r.select_model(TaskType::BlogShort, p, &none()).id.clone();
        assert_eq!(pick(Priority::Quality), "gpt-4o");
        assert_eq!(pick(Priority::Speed), "gpt-4o-mini");
        assert_eq!(pick(Priority::Cost), "gemini-1.5-flash");
    }

    #[test]
    fn test_cost_without_budget_uses_fallback() {
        let r = router();
        let m = r.select_model(TaskType::Seo, Priority::Cost, &none());
        assert_eq!(m.id, "gemini-1.5-flash");
    }

    #[test]
    fn test_unmapped_task_returns_default() {
        let r = ModelRouter::new(Arc::new(ModelCatalog::builtin()), HashMap::new());
        let m = r.select_model(TaskType::Translate, Priority::Cost, &none());
        assert_eq!(m.id, DEFAULT_MODEL_ID);
    }

    #[test]
    fn test_unmapped_task_without_default_uses_first_entry() {
        let catalog = ModelCatalog::builtin();
        let only: Vec<_> = catalog
            .iter()
            .filter(|m| m.id != DEFAULT_MODEL_ID)
            .cloned()
            .collect();
        let first_id = only[0].id.clone();
        let r = ModelRouter::new(Arc::new(ModelCatalog::new(only).unwrap()), HashMap::new());
        assert_eq!(r.select_model(TaskType::Chat, Priority::Quality, &none()).id, first_id);
    }

    #[test]
    fn test_unknown_ids_fall_through() {
        let routes = HashMap::from([(
            TaskType::BlogShort,
            TaskRoutingEntry::new("ghost-model", "gpt-4o-mini", None),
        )]);
        let r = ModelRouter::new(Arc::new(ModelCatalog::builtin()), routes);
        assert_eq!(
            r.select_model(TaskType::BlogShort, Priority::Quality, &none()).id,
            "gpt-4o-mini"
        );

        let routes = HashMap::from([(
            TaskType::BlogShort,
            TaskRoutingEntry::new("ghost-a", "ghost-b", None),
        )]);
        let r = ModelRouter::new(Arc::new(ModelCatalog::builtin()), routes);
        assert_eq!(
            r.select_model(TaskType::BlogShort, Priority::Quality, &none()).id,
            r.catalog().first().id
        );
    }

    #[test]
    fn test_budget_constraint_swaps_to_budget_model() {
        let r = router();
        let constraints = RoutingConstraints {
            max_budget: Some(1.0),
            ..none()
        };
        let m = r.select_model(TaskType::BlogLong, Priority::Quality, &constraints);
        assert_eq!(m.id, "gpt-4o-mini");
    }

    #[test]
    fn test_unsatisfiable_budget_keeps_candidate() {
        let r = router();
        let constraints = RoutingConstraints {
            max_budget: Some(0.0001),
            ..none()
        };
        let m = r.select_model(TaskType::BlogLong, Priority::Quality, &constraints);
        assert_eq!(m.id, "claude-3-5-sonnet");
    }

    #[test]
    fn test_quality_constraint_upgrades_to_primary() {
        let r = router();
        let constraints = RoutingConstraints {
            min_quality: Some(5),
            ..none()
        };
        let m = r.select_model(TaskType::BlogShort, Priority::Cost, &constraints);
        assert_eq!(m.id, "gpt-4o");
    }

    #[test]
    fn test_budget_checked_before_quality() {
        // Budget downgrades to gpt-4o-mini (q4), then quality 5 upgrades
        // back to the primary.
        let r = router();
        let constraints = RoutingConstraints {
            max_budget: Some(1.0),
            min_quality: Some(5),
            ..none()
        };
        let m = r.select_model(TaskType::BlogLong, Priority::Quality, &constraints);
        assert_eq!(m.id, "claude-3-5-sonnet");
    }

    #[test]
    fn test_language_constraint_substitutes_fallback() {
        let routes = HashMap::from([(
            TaskType::Translate,
            TaskRoutingEntry::new("llama-3.1-70b", "mistral-large", None),
        )]);
        let r = ModelRouter::new(Arc::new(ModelCatalog::builtin()), routes);
        let constraints = RoutingConstraints {
            language: Some("nl".into()),
            ..none()
        };
        assert_eq!(
            r.select_model(TaskType::Translate, Priority::Quality, &constraints).id,
            "mistral-large"
        );
    }

    #[test]
    fn test_language_unsupported_everywhere_keeps_candidate() {
        let r = router();
        let constraints = RoutingConstraints {
            language: Some("ja".into()),
            ..none()
        };
        let m = r.select_model(TaskType::CodeGenerate, Priority::Quality, &constraints);
        assert_eq!(m.id, "claude-3-5-sonnet");
    }

    #[test]
    fn test_fallback_model_differs_from_failed() {
        let r = router();
        assert_eq!(r.fallback_model(TaskType::Chat, "gpt-4o").id, "claude-3-5-haiku");
        assert_eq!(
            r.fallback_model(TaskType::Chat, "claude-3-5-haiku").id,
            DEFAULT_MODEL_ID
        );
    }

    #[test]
    fn test_detect_task_type_precedence() {
        assert_eq!(
            detect_task_type("Write Python code that resizes an image"),
            TaskType::CodeGenerate
        );
        assert_eq!(detect_task_type("Make a thumbnail for my YouTube video"), TaskType::ImageGenerate);
        assert_eq!(detect_task_type("Script for a TikTok reel"), TaskType::VideoScript);
        assert_eq!(detect_task_type("Please review my code"), TaskType::CodeReview);
        assert_eq!(detect_task_type("LinkedIn update about our launch"), TaskType::SocialPost);
        assert_eq!(detect_task_type("Vertaal deze tekst naar het Engels"), TaskType::Translate);
        assert_eq!(detect_task_type("An in-depth pillar article on composting"), TaskType::BlogLong);
    }

    #[test]
    fn test_detect_task_type_ignores_keywords_inside_words() {
        assert_eq!(
            detect_task_type("a blog about building customer trust"),
            TaskType::BlogShort
        );
        assert_eq!(detect_task_type("tips for freelance designers"), TaskType::BlogShort);
        assert_eq!(detect_task_type("a rustic bakery opening"), TaskType::BlogShort);
        assert_eq!(detect_task_type("port a CLI to Rust"), TaskType::CodeGenerate);
        assert_eq!(detect_task_type("three images for the homepage"), TaskType::ImageGenerate);
        assert_eq!(detect_task_type("Instagram (reel) idea"), TaskType::VideoScript);
    }

    #[test]
    fn test_detect_task_type_default() {
        assert_eq!(detect_task_type("list clients named Jansen"), TaskType::BlogShort);
        assert_eq!(detect_task_type(""), TaskType::BlogShort);
    }

    #[test]
    fn test_task_type_round_trips_through_str() {
        for task in TaskType::ALL {
            assert_eq!(task.as_str().parse::<TaskType>().unwrap(), task);
        }
        assert!("poetry".parse::<TaskType>().is_err());
    }
}
