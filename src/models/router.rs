//! Profile-based model routing.
//!
//! Maps an abstract usage profile (`fast`, `general`, `code`, `creative`)
//! to a concrete model from the currently available set. Capability facts
//! come from the model database when it knows the model, falling back to
//! provider-reported metadata otherwise.

use super::database;
use crate::provider::{ModelCapabilities, ModelInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Preferred size for the `general` profile (~8 GB weights).
const GENERAL_TARGET_BYTES: i64 = 8 * 1024 * 1024 * 1024;

/// Score bonus for code-tuned families under the `code` profile.
const CODE_FAMILY_BONUS: i64 = 100_000;

const CODE_FAMILIES: &[&str] = &["llama", "codellama", "qwen"];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoutingProfile {
    Fast,
    #[default]
    General,
    Code,
    Creative,
}

impl fmt::Display for RoutingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fast => "fast",
            Self::General => "general",
            Self::Code => "code",
            Self::Creative => "creative",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub enabled: bool,
    pub default_profile: RoutingProfile,
    /// Pinned model per profile; wins whenever the model is available.
    pub overrides: HashMap<RoutingProfile, String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_profile: RoutingProfile::General,
            overrides: HashMap::new(),
        }
    }
}

/// Routing facts for one model: database wins, provider metadata otherwise.
struct Effective<'a> {
    model: &'a ModelInfo,
    family: &'a str,
    context_window: u32,
    capabilities: ModelCapabilities,
    score: u32,
}

fn effective(model: &ModelInfo) -> Effective<'_> {
    match database::lookup(&model.name) {
        Some(entry) => Effective {
            model,
            family: entry.family,
            context_window: entry.context_window,
            capabilities: entry.capabilities,
            score: entry.score,
        },
        None => Effective {
            model,
            family: model.family.as_str(),
            context_window: model.context_window,
            capabilities: model.capabilities,
            score: 0,
        },
    }
}

pub struct ModelRouter {
    config: RouterConfig,
}

impl ModelRouter {
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Pick a model for `profile` out of `available`.
    ///
    /// A configured override wins when present in `available`. Otherwise
    /// the hard predicate filters the set and the preference score ranks
    /// it, ties broken lexicographically by name. Returns `None` when no
    /// available model satisfies the predicate; any further fallback is
    /// the caller's decision.
    #[must_use]
    pub fn select_model(
        &self,
        profile: RoutingProfile,
        available: &[ModelInfo],
    ) -> Option<String> {
        if let Some(pinned) = self.config.overrides.get(&profile)
            && available.iter().any(|m| &m.name == pinned)
        {
            return Some(pinned.clone());
        }

        let mut candidates: Vec<(Effective<'_>, i64)> = available
            .iter()
            .map(effective)
            .filter(|e| hard_predicate(profile, e))
            .map(|e| {
                let score = preference_score(profile, &e);
                (e, score)
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| a.0.model.name.cmp(&b.0.model.name))
        });
        candidates.first().map(|(e, _)| e.model.name.clone())
    }

    /// Route the configured default profile.
    #[must_use]
    pub fn select_default(&self, available: &[ModelInfo]) -> Option<String> {
        self.select_model(self.config.default_profile, available)
    }
}

fn hard_predicate(profile: RoutingProfile, e: &Effective<'_>) -> bool {
    match profile {
        RoutingProfile::Fast | RoutingProfile::General => e.capabilities.streaming,
        RoutingProfile::Code => e.context_window >= 16_384,
        RoutingProfile::Creative => true,
    }
}

#[allow(clippy::cast_possible_wrap)] // model sizes are far below i64::MAX
fn preference_score(profile: RoutingProfile, e: &Effective<'_>) -> i64 {
    match profile {
        RoutingProfile::Fast => -(e.model.size as i64),
        RoutingProfile::General => -(e.model.size as i64 - GENERAL_TARGET_BYTES).abs(),
        RoutingProfile::Code => {
            let family_bonus = if CODE_FAMILIES.contains(&e.family) {
                CODE_FAMILY_BONUS
            } else {
                0
            };
            i64::from(e.context_window) + family_bonus + i64::from(e.score)
        }
        RoutingProfile::Creative => i64::from(e.context_window) + i64::from(e.score),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn model(name: &str, size: u64, context_window: u32, streaming: bool) -> ModelInfo {
        ModelInfo {
            name: name.to_string(),
            size,
            modified_at: Utc::now(),
            family: String::new(),
            context_window,
            capabilities: ModelCapabilities {
                tool_calling: false,
                vision: false,
                streaming,
            },
        }
    }

    const GB: u64 = 1024 * 1024 * 1024;

    fn available() -> Vec<ModelInfo> {
        vec![
            // Database entries override the bare metadata given here
            model("llama3.1:8b", 5 * GB, 131_072, true),
            model("phi3:mini", 2 * GB, 4_096, false),
            model("codellama:7b", 4 * GB, 16_384, false),
        ]
    }

    #[test]
    fn test_fast_prefers_smallest() {
        let router = ModelRouter::new(RouterConfig::default());
        let selected = router.select_model(RoutingProfile::Fast, &available());
        assert_eq!(selected.as_deref(), Some("phi3:mini"));
    }

    #[test]
    fn test_code_requires_large_context() {
        let router = ModelRouter::new(RouterConfig::default());
        let selected = router
            .select_model(RoutingProfile::Code, &available())
            .unwrap();
        assert!(selected == "codellama:7b" || selected == "llama3.1:8b");
    }

    #[test]
    fn test_code_with_only_tiny_models_is_none() {
        let router = ModelRouter::new(RouterConfig::default());
        let tiny = vec![model("tiny:1b", GB, 2_048, true)];
        assert_eq!(router.select_model(RoutingProfile::Code, &tiny), None);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let router = ModelRouter::new(RouterConfig::default());
        let models = available();
        let first = router.select_model(RoutingProfile::Creative, &models);
        for _ in 0..5 {
            assert_eq!(router.select_model(RoutingProfile::Creative, &models), first);
        }
    }

    #[test]
    fn test_ties_break_lexicographically() {
        let router = ModelRouter::new(RouterConfig::default());
        // Identical unknown models except for the name
        let models = vec![
            model("zeta:7b", 4 * GB, 32_768, true),
            model("alpha:7b", 4 * GB, 32_768, true),
        ];
        let selected = router.select_model(RoutingProfile::Creative, &models);
        assert_eq!(selected.as_deref(), Some("alpha:7b"));
    }

    #[test]
    fn test_override_wins_when_available() {
        let mut config = RouterConfig::default();
        config
            .overrides
            .insert(RoutingProfile::Fast, "llama3.1:8b".to_string());
        let router = ModelRouter::new(config);
        let selected = router.select_model(RoutingProfile::Fast, &available());
        assert_eq!(selected.as_deref(), Some("llama3.1:8b"));
    }

    #[test]
    fn test_override_ignored_when_model_absent() {
        let mut config = RouterConfig::default();
        config
            .overrides
            .insert(RoutingProfile::Fast, "not-pulled:70b".to_string());
        let router = ModelRouter::new(config);
        let selected = router.select_model(RoutingProfile::Fast, &available());
        assert_eq!(selected.as_deref(), Some("phi3:mini"));
    }

    #[test]
    fn test_unknown_model_uses_provider_metadata() {
        let router = ModelRouter::new(RouterConfig::default());
        // Not in the database; provider claims a big context window
        let models = vec![model("custom-finetune:34b", 20 * GB, 65_536, true)];
        let selected = router.select_model(RoutingProfile::Code, &models);
        assert_eq!(selected.as_deref(), Some("custom-finetune:34b"));
    }
}
