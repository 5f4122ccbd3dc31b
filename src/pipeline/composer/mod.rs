
use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ChatMessage, Completer, ProductContext, bounded};
use crate::Result;

pub const NO_CONTEXT_REPLY: &str = "Sorry, I couldn't find relevant information about that product. Please contact support for more details.";
pub const REPLY_SEPARATOR: &str = "\n\n---\n\n";
pub const DIFFERENT_PRODUCT_PROMPT: &str =
    "Would you like to know about a different product? Just ask.";

/// Final text of a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Composition {
    Answer(String),
    /// No product had stored context; nothing was sent to the model
    NoContext(String),
}

impl Composition {
    #[inline]
    pub fn text(&self) -> &str {
        match self {
            Self::Answer(text) | Self::NoContext(text) => text,
        }
    }
}

pub struct ReplyComposer<'a> {
    completer: &'a dyn Completer,
    timeout: Duration,
}

impl<'a> ReplyComposer<'a> {
    #[inline]
    pub fn new(completer: &'a dyn Completer, timeout: Duration) -> Self {
        Self { completer, timeout }
    }

    /// One completion per product with context, replies kept in product order.
    /// `history` is expected to be bounded by the caller.
    #[inline]
    pub async fn compose(
        &self,
        contexts: &[ProductContext],
        history: &[ChatMessage],
        message: &str,
    ) -> Result<Composition> {
        let grounded: Vec<(&str, &str)> = contexts
            .iter()
            .filter_map(|c| c.context.as_deref().map(|ctx| (c.product.as_str(), ctx)))
            .collect();

        if grounded.is_empty() {
            warn!("No product context available, answering with the support fallback");
            return Ok(Composition::NoContext(NO_CONTEXT_REPLY.to_string()));
        }

        let calls = grounded.iter().map(|(product, context)| {
            let system = system_prompt(product);
            let user = user_prompt(context, message);
            async move {
                debug!("Composing reply for {}", product);
                bounded(
                    self.timeout,
                    "completion",
                    self.completer.complete(&system, history, &user),
                )
                .await
            }
        });

        let replies = join_all(calls)
            .await
            .into_iter()
            .map(|reply| reply.map(|text| text.trim().to_string()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Composition::Answer(merge_replies(replies)))
    }
}

/// Pins the answer to a single product
#[inline]
pub fn system_prompt(product: &str) -> String {
    format!(
        "You are a helpful sales assistant for the product \"{product}\".\n\
         Answer ONLY about {product} using the provided context.\n\
         Do NOT mention any other product unless the user explicitly asks about it.\n\
         If the context does not contain the answer, say you are not sure.\n\
         Be concise."
    )
}

#[inline]
pub fn user_prompt(context: &str, message: &str) -> String {
    format!("Context: {context}\n\nQuestion: {message}")
}

fn merge_replies(mut replies: Vec<String>) -> String {
    if replies.len() == 1 {
        return replies.pop().unwrap_or_default();
    }
    format!(
        "{}{}{}",
        replies.join(REPLY_SEPARATOR),
        REPLY_SEPARATOR,
        DIFFERENT_PRODUCT_PROMPT
    )
}
