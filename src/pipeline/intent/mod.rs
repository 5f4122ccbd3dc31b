
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Completer, bounded};
use crate::BotError;

/// What the visitor wants to know about a product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Benefits,
    Ingredients,
    Pricing,
    Usage,
    IdealFor,
    Link,
}

const CLASSIFY_PROMPT: &str = "Classify the customer's message about a product into exactly one of these labels: benefits, ingredients, pricing, usage, ideal_for, link. If none applies, answer other. Reply with the label only.";

impl Intent {
    /// Declaration order is also the local matching order
    pub const ALL: [Self; 6] = [
        Self::Benefits,
        Self::Ingredients,
        Self::Pricing,
        Self::Usage,
        Self::IdealFor,
        Self::Link,
    ];

    #[inline]
    pub fn label(self) -> &'static str {
        match self {
            Self::Benefits => "benefits",
            Self::Ingredients => "ingredients",
            Self::Pricing => "pricing",
            Self::Usage => "usage",
            Self::IdealFor => "ideal_for",
            Self::Link => "link",
        }
    }

    fn triggers(self) -> &'static [&'static str] {
        match self {
            Self::Benefits => &["benefit", "advantage", "good for", "helps with", "help with"],
            Self::Ingredients => &["ingredient", "contain", "made of", "made from", "composition"],
            Self::Pricing => &["price", "cost", "how much", "mrp", "discount", "offer"],
            Self::Usage => &[
                "how to use",
                "how to take",
                "how do i take",
                "dosage",
                "dose",
                "usage",
                "when to take",
            ],
            Self::IdealFor => &[
                "who should",
                "ideal for",
                "suitable",
                "who can",
                "recommended for",
            ],
            Self::Link => &[
                "link",
                "buy",
                "purchase",
                "place an order",
                "order online",
                "website",
                "where can i get",
            ],
        }
    }

    /// First intent (in declaration order) with any trigger in the message
    #[inline]
    pub fn detect(message: &str) -> Option<Self> {
        let lowered = message.to_lowercase();
        Self::ALL.into_iter().find(|intent| {
            intent
                .triggers()
                .iter()
                .any(|trigger| lowered.contains(trigger))
        })
    }

    /// Validate a model-produced label; anything outside the fixed set is `None`
    #[inline]
    pub fn parse_label(raw: &str) -> Option<Self> {
        let cleaned = raw
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
            .to_lowercase()
            .replace([' ', '-'], "_");
        cleaned.parse().ok()
    }
}

impl fmt::Display for Intent {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Intent {
    type Err = BotError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|intent| intent.label() == s)
            .ok_or_else(|| BotError::InvalidInput(format!("unknown intent '{s}'")))
    }
}

/// Local trigger match with a single model call on a miss
pub struct IntentClassifier<'a> {
    completer: &'a dyn Completer,
    timeout: Duration,
}

impl<'a> IntentClassifier<'a> {
    #[inline]
    pub fn new(completer: &'a dyn Completer, timeout: Duration) -> Self {
        Self { completer, timeout }
    }

    /// Never fails the turn; model errors and junk labels mean "unknown"
    #[inline]
    pub async fn classify(&self, message: &str) -> Option<Intent> {
        if let Some(intent) = Intent::detect(message) {
            debug!("Intent {} matched locally", intent);
            return Some(intent);
        }

        match bounded(
            self.timeout,
            "intent classification",
            self.completer.complete(CLASSIFY_PROMPT, &[], message),
        )
        .await
        {
            Ok(raw) => {
                let intent = Intent::parse_label(&raw);
                debug!("Model labelled intent {:?} (raw {:?})", intent, raw);
                intent
            }
            Err(e) => {
                warn!("Intent classification failed, treating as unknown: {}", e);
                None
            }
        }
    }
}
