//! Keyword-based fallback analyzer, used when no classification endpoint
//! is configured.

use crate::taxonomy::FINANCIAL_TOPICS;
use crate::TextInsights;

const POSITIVE_WORDS: &[&str] = &[
    "good",
    "great",
    "excellent",
    "love",
    "amazing",
    "perfect",
    "best",
    "happy",
    "satisfied",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad",
    "terrible",
    "awful",
    "hate",
    "worst",
    "horrible",
    "angry",
    "frustrated",
    "disappointed",
];

const SEVERE_WORDS: &[&str] = &[
    "fraud", "scam", "stolen", "hack", "security", "breach", "locked", "frozen", "emergency",
];

/// Fallback confidence is fixed below the hosted service's typical output.
const FALLBACK_CONFIDENCE: f64 = 0.6;

/// Score a text with keyword counts. Coarse by design; the hosted service
/// is the real analyzer.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn analyze(text: &str) -> TextInsights {
    let lower = text.to_lowercase();

    let pos = POSITIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();
    let neg = NEGATIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();
    let severe = SEVERE_WORDS.iter().filter(|w| lower.contains(*w)).count();

    let sentiment = if pos > neg {
        (pos as f64 * 0.2).min(0.8)
    } else if neg > pos {
        (-(neg as f64) * 0.2).max(-0.8)
    } else {
        0.0
    };

    let severity = (severe as f64 * 0.3).min(0.8);

    let topics: Vec<String> = FINANCIAL_TOPICS
        .iter()
        .filter(|t| {
            let spaced = t.replace('_', " ");
            lower.contains(&spaced) || lower.contains(*t)
        })
        .take(3)
        .map(|t| (*t).to_string())
        .collect();

    TextInsights {
        sentiment,
        severity,
        topics,
        language: "en".to_string(),
        confidence: FALLBACK_CONFIDENCE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_text_scores_positive() {
        let insights = analyze("great app, love the rewards, best bank");
        assert!(insights.sentiment > 0.0);
        assert_eq!(insights.confidence, 0.6);
    }

    #[test]
    fn negative_text_scores_negative() {
        let insights = analyze("terrible service, worst experience, so frustrated");
        assert!(insights.sentiment < 0.0);
    }

    #[test]
    fn severe_keywords_raise_severity() {
        let insights = analyze("my account was locked after fraud and a security breach");
        assert!(insights.severity >= 0.8);
    }

    #[test]
    fn topics_come_from_taxonomy_and_cap_at_three() {
        let insights =
            analyze("the mobile app crashed, fees went up, overdraft hit, and the atm was down");
        assert!(insights.topics.len() <= 3);
        for topic in &insights.topics {
            assert!(FINANCIAL_TOPICS.contains(&topic.as_str()));
        }
    }

    #[test]
    fn balanced_text_is_neutral() {
        let insights = analyze("good rates but bad support");
        assert_eq!(insights.sentiment, 0.0);
    }
}
