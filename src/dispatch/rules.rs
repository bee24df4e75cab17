//! Deterministic templated replies and keyword-matched product answers.

use crate::config::{ProductConfig, ReplyTemplates};
use crate::events::{Interaction, InteractionEvent};

/// Builds replies without any external calls.
#[derive(Debug, Clone)]
pub struct RuleResponder {
    templates: ReplyTemplates,
    product: ProductConfig,
}

impl RuleResponder {
    pub fn new(templates: ReplyTemplates, product: ProductConfig) -> Self {
        Self { templates, product }
    }

    /// Templated reply for any event. Comments get a product-knowledge answer.
    pub fn reply(&self, event: &InteractionEvent) -> String {
        let nickname = event.user.nickname.as_str();
        match &event.interaction {
            Interaction::Comment { text } => self.knowledge_answer(nickname, text),
            Interaction::Gift { name, count, .. } => render(
                &self.templates.gift,
                &[
                    ("nickname", nickname),
                    ("gift", name),
                    ("count", &count.to_string()),
                    ("product", &self.product.name),
                ],
            ),
            Interaction::Follow => self.simple(&self.templates.follow, nickname),
            Interaction::Enter => self.simple(&self.templates.enter, nickname),
            Interaction::Like { count } => render(
                &self.templates.like,
                &[
                    ("nickname", nickname),
                    ("count", &count.to_string()),
                    ("product", &self.product.name),
                ],
            ),
        }
    }

    /// Answer from the first knowledge category whose keyword appears in the comment.
    pub fn knowledge_answer(&self, nickname: &str, comment: &str) -> String {
        let lowered = comment.to_lowercase();
        let template = self
            .product
            .categories
            .iter()
            .find(|c| {
                c.keywords
                    .iter()
                    .any(|k| !k.is_empty() && lowered.contains(&k.to_lowercase()))
            })
            .map_or(self.product.default_answer.as_str(), |c| c.answer.as_str());
        render(
            template,
            &[
                ("nickname", nickname),
                ("content", comment.trim()),
                ("product", &self.product.name),
            ],
        )
    }

    /// Fill `{nickname}`-style placeholders in an arbitrary template.
    pub fn render_for(&self, template: &str, event: &InteractionEvent) -> String {
        render(
            template,
            &[
                ("nickname", &event.user.nickname),
                ("content", &event.content),
                ("product", &self.product.name),
            ],
        )
    }

    pub fn product_name(&self) -> &str {
        &self.product.name
    }

    fn simple(&self, template: &str, nickname: &str) -> String {
        render(
            template,
            &[("nickname", nickname), ("product", &self.product.name)],
        )
    }
}

fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_owned(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}
