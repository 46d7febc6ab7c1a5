//! Brand-mention detection.
//!
//! Scores a block of free text against every brand's alias list and
//! reports the single highest-confidence brand. Matching is plain
//! case-insensitive substring search (no regex), with a word-boundary
//! check at each occurrence. Short aliases (three characters or fewer,
//! e.g. "TD") are too ambiguous to count unless they sit on clean word
//! boundaries; longer aliases keep non-boundary occurrences at reduced
//! confidence. Aliases are scanned longest-first per brand, and an
//! occurrence nested inside an already-accepted longer alias of the same
//! brand is suppressed, so "TD Bank" does not also count as "TD".
//!
//! Deterministic: identical text and brand catalog always produce an
//! identical [`MatchResult`]. When two brands score exactly equal, the
//! brand listed first in the catalog wins.

use std::cmp::Reverse;

use serde::Serialize;

use crate::brands::BrandConfig;

/// Texts shorter than this (after trimming) never match anything.
const MIN_TEXT_LEN: usize = 2;

/// Aliases at or below this many characters require clean word boundaries.
const SHORT_ALIAS_MAX_CHARS: usize = 3;

/// Per-occurrence confidence for boundary-clean and embedded matches.
const BOUNDARY_CONFIDENCE: f64 = 1.0;
const EMBEDDED_CONFIDENCE: f64 = 0.7;

/// Minimum confidence a [`MatchResult`] must reach before callers treat
/// it as a positive detection.
pub const ACCEPT_THRESHOLD: f64 = 0.3;

/// One occurrence of an alias inside the scanned text.
///
/// `offset` and `length` are byte positions into the lowercase-folded
/// text that was actually searched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchPosition {
    pub term: String,
    pub offset: usize,
    pub length: usize,
    pub is_word_boundary: bool,
    pub confidence: f64,
}

/// Outcome of scoring one text against the whole brand catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Winning brand id, or `None` when no alias occurred at all.
    pub brand_id: Option<String>,
    /// Distinct alias strings that matched, ordered by first occurrence.
    pub matched_terms: Vec<String>,
    /// All accepted occurrences, ordered by offset.
    pub match_positions: Vec<MatchPosition>,
    /// Blended confidence in `[0, 1]`.
    pub confidence_score: f64,
}

impl MatchResult {
    fn none() -> Self {
        Self {
            brand_id: None,
            matched_terms: Vec::new(),
            match_positions: Vec::new(),
            confidence_score: 0.0,
        }
    }

    /// True when the result clears the caller-facing acceptance threshold.
    #[must_use]
    pub fn is_detection(&self) -> bool {
        self.brand_id.is_some() && self.confidence_score >= ACCEPT_THRESHOLD
    }
}

/// Score `text` against every brand in `brands`.
///
/// Pure function, no side effects. The brand with the strictly highest
/// confidence wins; equal scores resolve to the earlier catalog entry.
#[must_use]
pub fn score(text: &str, brands: &[BrandConfig]) -> MatchResult {
    if text.trim().chars().count() < MIN_TEXT_LEN {
        return MatchResult::none();
    }

    let folded = text.to_lowercase();
    let mut best = MatchResult::none();

    for brand in brands {
        let (positions, matched) = scan_brand(&folded, brand);
        if positions.is_empty() {
            continue;
        }

        let confidence = blend_confidence(&matched, &positions);
        if confidence > best.confidence_score {
            best = MatchResult {
                brand_id: Some(brand.id.clone()),
                matched_terms: matched,
                match_positions: positions,
                confidence_score: confidence,
            };
        }
    }

    best
}

/// Collect accepted occurrences of one brand's aliases in `folded`.
///
/// Aliases are scanned longest-first; an occurrence whose span intersects
/// a previously accepted (longer) occurrence is suppressed. Returned
/// positions are sorted by offset and `matched` lists distinct terms in
/// first-occurrence order.
fn scan_brand(folded: &str, brand: &BrandConfig) -> (Vec<MatchPosition>, Vec<String>) {
    let mut aliases: Vec<&String> = brand.aliases.iter().collect();
    aliases.sort_by_key(|a| Reverse(a.chars().count()));

    let mut positions: Vec<MatchPosition> = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::new();

    for alias in aliases {
        let alias_folded = alias.to_lowercase();
        if alias_folded.is_empty() {
            continue;
        }
        let short_alias = alias_folded.chars().count() <= SHORT_ALIAS_MAX_CHARS;

        for (offset, boundary) in occurrences(folded, &alias_folded) {
            let end = offset + alias_folded.len();

            // Short aliases embedded in a longer token are discarded
            // outright; they are too ambiguous to count at all.
            if short_alias && !boundary {
                continue;
            }
            // Nested inside an already-accepted longer alias of this brand.
            if spans.iter().any(|&(s, e)| offset < e && end > s) {
                continue;
            }

            spans.push((offset, end));
            positions.push(MatchPosition {
                term: alias.clone(),
                offset,
                length: alias_folded.len(),
                is_word_boundary: boundary,
                confidence: if boundary {
                    BOUNDARY_CONFIDENCE
                } else {
                    EMBEDDED_CONFIDENCE
                },
            });
        }
    }

    positions.sort_by_key(|p| p.offset);
    let mut matched: Vec<String> = Vec::new();
    for pos in &positions {
        if !matched.contains(&pos.term) {
            matched.push(pos.term.clone());
        }
    }
    (positions, matched)
}

/// Weighted blend rewarding alias diversity, boundary-clean matches, and
/// longer (more specific) aliases over short ambiguous ones.
#[allow(clippy::cast_precision_loss)]
fn blend_confidence(matched: &[String], positions: &[MatchPosition]) -> f64 {
    let distinct = matched.len() as f64;
    let avg_confidence =
        positions.iter().map(|p| p.confidence).sum::<f64>() / positions.len() as f64;
    let avg_term_len = matched.iter().map(|t| t.chars().count() as f64).sum::<f64>() / distinct;

    0.4 * (distinct / 3.0).min(1.0) + 0.4 * avg_confidence + 0.2 * (avg_term_len / 10.0).min(1.0)
}

/// All occurrences of `needle` in `haystack`, with a word-boundary flag.
///
/// An occurrence is boundary-clean when neither adjacent character (when
/// present) is alphanumeric. Overlapping occurrences are found by
/// advancing one character at a time past each hit.
fn occurrences(haystack: &str, needle: &str) -> Vec<(usize, bool)> {
    let mut found = Vec::new();
    let mut start = 0;

    while let Some(rel) = haystack[start..].find(needle) {
        let pos = start + rel;
        let end = pos + needle.len();

        let before_alnum = haystack[..pos]
            .chars()
            .next_back()
            .is_some_and(char::is_alphanumeric);
        let after_alnum = haystack[end..]
            .chars()
            .next()
            .is_some_and(char::is_alphanumeric);

        found.push((pos, !before_alnum && !after_alnum));

        // Advance one full character so overlapping hits are still seen.
        let step = haystack[pos..].chars().next().map_or(1, char::len_utf8);
        start = pos + step;
    }

    found
}
