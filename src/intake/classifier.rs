//! Priority classification for interaction events.

use crate::config::{BasePriorities, GiftTier, IntakeConfig};
use crate::events::Interaction;

/// Result of classifying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub priority: u32,
    pub gift_total_value: Option<u64>,
    pub keyword_boost: bool,
}

/// Computes priorities from a per-kind base adjusted by gift value and keywords.
#[derive(Debug, Clone)]
pub struct Classifier {
    base: BasePriorities,
    tiers: Vec<GiftTier>,
    urgent_keywords: Vec<String>,
    keyword_bonus: u32,
}

impl Classifier {
    pub fn new(config: &IntakeConfig) -> Self {
        Self {
            base: config.base_priority.clone(),
            tiers: config.gift_value_tiers.clone(),
            urgent_keywords: config
                .urgent_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            keyword_bonus: config.keyword_bonus,
        }
    }

    pub fn classify(&self, interaction: &Interaction) -> Classification {
        let base = self.base.for_kind(interaction.kind());
        let gift_total_value = interaction.gift_total_value();
        let gift_bonus = gift_total_value.map_or(0, |total| self.gift_bonus(total));

        let keyword_boost = match interaction {
            Interaction::Comment { text } => {
                let lowered = text.to_lowercase();
                self.urgent_keywords.iter().any(|k| lowered.contains(k))
            }
            _ => false,
        };
        let keyword_bonus = if keyword_boost { self.keyword_bonus } else { 0 };

        Classification {
            priority: base.saturating_sub(gift_bonus).saturating_sub(keyword_bonus),
            gift_total_value,
            keyword_boost,
        }
    }

    fn gift_bonus(&self, total: u64) -> u32 {
        self.tiers
            .iter()
            .rev()
            .find(|tier| total >= tier.min_total_value)
            .map_or(0, |tier| tier.bonus)
    }
}
