//! Order-email classification.
//!
//! A tiered keyword heuristic. Tiers are evaluated in a fixed order and the
//! first satisfied tier decides:
//!
//! | Tier | Rule |
//! |------|------|
//! | [`SignalTier::StrongPhrase`] | any strong phrase in subject + body |
//! | [`SignalTier::MediumWithSender`] | >= 2 medium hits and >= 1 sender pattern hit |
//! | [`SignalTier::MediumVolume`] | >= 3 medium hits |
//! | [`SignalTier::Contextual`] | `"pdf"` in the text and >= 1 medium hit |
//!
//! Medium hits count every occurrence of every medium keyword, so
//! `"order order order"` is three hits. Keyword lists are data
//! ([`KeywordSet`]) and can be replaced from configuration.

use serde::{Deserialize, Serialize};

const MEDIUM_WITH_SENDER_MIN: usize = 2;
const MEDIUM_VOLUME_MIN: usize = 3;
const CONTEXTUAL_MEDIUM_MIN: usize = 1;
const CONTEXTUAL_MARKER: &str = "pdf";

/// The rule that produced a positive classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalTier {
    StrongPhrase,
    MediumWithSender,
    MediumVolume,
    Contextual,
}

/// Verdict plus the evidence that led to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    pub is_order: bool,
    pub tier: Option<SignalTier>,
    pub medium_hits: usize,
    pub sender_hits: usize,
}

/// Keyword lists driving the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeywordSet {
    /// High-precision phrases; one is enough.
    pub strong_phrases: Vec<String>,
    /// Weak single-word indicators, counted by occurrence.
    pub medium_keywords: Vec<String>,
    /// Substrings of transactional sender addresses.
    pub sender_patterns: Vec<String>,
}

impl Default for KeywordSet {
    fn default() -> Self {
        Self {
            strong_phrases: to_strings(&[
                "order confirmation",
                "purchase confirmation",
                "order receipt",
                "payment confirmation",
                "order number",
                "tracking number",
                "delivery confirmation",
                "purchase order",
                "order details",
                "payment successful",
                "order complete",
            ]),
            medium_keywords: to_strings(&[
                "order",
                "purchase",
                "payment",
                "billing",
                "invoice",
                "receipt",
                "transaction",
                "confirmation",
                "delivery",
                "shipping",
                "shipped",
                "tracking",
                "checkout",
                "paid",
                "bought",
                "sale",
            ]),
            sender_patterns: to_strings(&[
                "noreply", "no-reply", "orders", "billing", "payments", "invoices", "receipts",
                "confirmation", "shop", "store", "amazon", "flipkart", "myntra", "meesho",
                "zomato", "swiggy", "uber", "ola", "paytm", "razorpay",
            ]),
        }
    }
}

fn to_strings(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

/// Decides whether an email is about an order.
#[derive(Debug, Clone, Default)]
pub struct OrderClassifier {
    keywords: KeywordSet,
}

impl OrderClassifier {
    /// Builds a classifier; keywords are lowercased once here.
    pub fn new(keywords: KeywordSet) -> Self {
        let lower = |list: Vec<String>| -> Vec<String> {
            list.into_iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        };
        Self {
            keywords: KeywordSet {
                strong_phrases: lower(keywords.strong_phrases),
                medium_keywords: lower(keywords.medium_keywords),
                sender_patterns: lower(keywords.sender_patterns),
            },
        }
    }

    pub fn keywords(&self) -> &KeywordSet {
        &self.keywords
    }

    /// Convenience wrapper returning only the verdict.
    pub fn is_order(&self, subject: &str, sender: &str, body_text: &str, body_html: &str) -> bool {
        self.classify(subject, sender, body_text, body_html).is_order
    }

    pub fn classify(
        &self,
        subject: &str,
        sender: &str,
        body_text: &str,
        body_html: &str,
    ) -> ClassificationResult {
        let content = format!("{} {} {}", subject, body_text, body_html).to_lowercase();

        if self
            .keywords
            .strong_phrases
            .iter()
            .any(|phrase| content.contains(phrase.as_str()))
        {
            return ClassificationResult {
                is_order: true,
                tier: Some(SignalTier::StrongPhrase),
                medium_hits: 0,
                sender_hits: 0,
            };
        }

        let medium_hits: usize = self
            .keywords
            .medium_keywords
            .iter()
            .map(|kw| content.matches(kw.as_str()).count())
            .sum();
        let sender = sender.to_lowercase();
        let sender_hits = self
            .keywords
            .sender_patterns
            .iter()
            .filter(|pattern| sender.contains(pattern.as_str()))
            .count();

        let tier = if medium_hits >= MEDIUM_WITH_SENDER_MIN && sender_hits >= 1 {
            Some(SignalTier::MediumWithSender)
        } else if medium_hits >= MEDIUM_VOLUME_MIN {
            Some(SignalTier::MediumVolume)
        } else if medium_hits >= CONTEXTUAL_MEDIUM_MIN && content.contains(CONTEXTUAL_MARKER) {
            Some(SignalTier::Contextual)
        } else {
            None
        };

        ClassificationResult {
            is_order: tier.is_some(),
            tier,
            medium_hits,
            sender_hits,
        }
    }
}
