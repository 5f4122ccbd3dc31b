
use std::time::Duration;
use tracing::{debug, info};

use super::{Completer, Intent, KeywordIndex, bounded};
use crate::Result;
use crate::database::sqlite::models::SessionState;

pub const UNIDENTIFIED_REPLY: &str = "Sorry, I couldn't tell which product you're asking about. Please mention the product name, or contact support and we'll be happy to help.";

const INFER_PROMPT: &str = "Extract the single main health concern or product need from the customer's message as one short lowercase keyword or phrase (for example: sleep, heart, energy). Reply with the keyword only, or none if there is no clear concern.";

/// Which rule settled the active products
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    /// Message names the product already in the session
    SessionMention,
    KeywordMatch,
    SessionFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Products to retrieve context for, in order
    Products {
        products: Vec<String>,
        tier: ResolutionTier,
    },
    /// Weighted inference picked a product; reply asks what to know about it
    Recommended { product: String, reply: String },
    /// Terminal: nothing could be identified
    Unidentified { reply: String },
}

/// Tiered product resolution: session mention, keyword scan, session
/// fallback, then weighted inference over the keyword table.
pub struct ProductResolver<'a> {
    completer: &'a dyn Completer,
    timeout: Duration,
}

impl<'a> ProductResolver<'a> {
    #[inline]
    pub fn new(completer: &'a dyn Completer, timeout: Duration) -> Self {
        Self { completer, timeout }
    }

    #[inline]
    pub async fn resolve(
        &self,
        message: &str,
        intent: Option<Intent>,
        index: &KeywordIndex,
        session: &SessionState,
    ) -> Result<Resolution> {
        if let Some(resolution) = resolve_direct(message, intent, index, session) {
            return Ok(resolution);
        }

        if index.is_empty() {
            debug!("No keywords to infer from");
            return Ok(unidentified());
        }

        let raw = bounded(
            self.timeout,
            "keyword inference",
            self.completer.complete(INFER_PROMPT, &[], message),
        )
        .await?;
        let keyword = normalize_inferred(&raw);
        debug!("Inferred keyword {:?} from model output {:?}", keyword, raw);

        let Some(keyword) = keyword else {
            return Ok(unidentified());
        };

        match score_products(index, &keyword).into_iter().next() {
            Some((product, score)) => {
                info!(
                    "Recommending {} for inferred keyword '{}' (score {})",
                    product, keyword, score
                );
                let reply = recommendation_reply(&product);
                Ok(Resolution::Recommended { product, reply })
            }
            None => Ok(unidentified()),
        }
    }
}

/// Tiers that need no model call
#[inline]
pub fn resolve_direct(
    message: &str,
    intent: Option<Intent>,
    index: &KeywordIndex,
    session: &SessionState,
) -> Option<Resolution> {
    let lowered = message.to_lowercase();
    let pricing = intent == Some(Intent::Pricing);

    if let Some(last) = session
        .last_product
        .as_ref()
        .filter(|last| lowered.contains(&last.to_lowercase()))
    {
        return Some(Resolution::Products {
            products: vec![last.clone()],
            tier: ResolutionTier::SessionMention,
        });
    }

    let mut candidates = index.scan(message);
    if !candidates.is_empty() {
        if candidates.len() > 1 && !pricing {
            debug!(
                "Ambiguous match {:?}, using first candidate",
                candidates
            );
            candidates.truncate(1);
        }
        return Some(Resolution::Products {
            products: candidates,
            tier: ResolutionTier::KeywordMatch,
        });
    }

    let last = session.last_product.as_ref()?;
    let products = if pricing && !session.last_matched_products.is_empty() {
        session.last_matched_products.clone()
    } else {
        vec![last.clone()]
    };
    Some(Resolution::Products {
        products,
        tier: ResolutionTier::SessionFallback,
    })
}

/// Trim, lowercase and unquote a model keyword; "none"-style answers are `None`
#[inline]
pub fn normalize_inferred(raw: &str) -> Option<String> {
    let keyword = raw
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase();
    match keyword.as_str() {
        "" | "none" | "null" | "n/a" | "other" => None,
        _ => Some(keyword),
    }
}

/// Products ranked by Σ weight × score, where score is 1.0 when the phrase
/// contains the keyword and 0.5 when the keyword contains the phrase.
/// Ties keep first appearance in index order; zero scores are dropped.
#[inline]
pub fn score_products(index: &KeywordIndex, keyword: &str) -> Vec<(String, f64)> {
    let mut totals: Vec<(String, f64)> = Vec::new();

    for entry in index.entries() {
        let score = if entry.phrase.contains(keyword) {
            1.0
        } else if keyword.contains(entry.phrase.as_str()) {
            0.5
        } else {
            continue;
        };
        let contribution = entry.weight as f64 * score;

        match totals.iter_mut().find(|(product, _)| *product == entry.product) {
            Some((_, total)) => *total += contribution,
            None => totals.push((entry.product.clone(), contribution)),
        }
    }

    totals.retain(|(_, total)| *total > 0.0);
    totals.sort_by(|a, b| b.1.total_cmp(&a.1));
    totals
}

fn recommendation_reply(product: &str) -> String {
    format!(
        "It sounds like {product} could help. Would you like to know about its benefits, ingredients, pricing or how to use it?"
    )
}

fn unidentified() -> Resolution {
    Resolution::Unidentified {
        reply: UNIDENTIFIED_REPLY.to_string(),
    }
}
