use crate::normalize::{self, keywords, tokens};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

/// Weight table for the overlap scorer. Person/staff words dominate, work and
/// domain words follow, temporal words stay at base weight but are listed so
/// the table documents the vocabulary it was tuned on.
fn keyword_weight(word: &str) -> f64 {
    match word {
        "qui" | "personne" | "personnel" | "staff" | "employe" => 2.0,
        "travaille" | "projet" | "quels" | "quelles" | "chantier" => 1.5,
        "mois" | "semaine" | "prochain" | "prochaine" => 1.0,
        _ => 1.0,
    }
}

/// Temporal vocabulary for the match ladder. Checked by containment so
/// inflected forms (prochaine, derniers) count too.
const TEMPORAL_KEYWORDS: [&str; 12] = [
    "mois", "semaine", "annee", "jour", "courant", "cours", "actuel", "current", "prochain",
    "precedent", "dernier", "passe",
];

fn is_temporal(word: &str) -> bool {
    TEMPORAL_KEYWORDS.iter().any(|t| word.contains(t))
}

/// Fine-grained day markers, matched on normalized text (the apostrophe in
/// "aujourd'hui" normalizes to a space).
const DAY_MARKERS: [&str; 3] = ["aujourd hui", "demain", "hier"];

lazy_static! {
    static ref MONTH_CURRENT: Regex = Regex::new(r"mois\s+en\s+cours|ce\s+mois").unwrap();
    static ref WEEK_CURRENT: Regex = Regex::new(r"semaine\s+en\s+cours|cette\s+semaine").unwrap();
    static ref YEAR_CURRENT: Regex = Regex::new(r"annee\s+en\s+cours|cette\s+annee").unwrap();
    static ref NEXT_MARKER: Regex = Regex::new(r"prochain|prochaine").unwrap();
    static ref PAST_MARKER: Regex = Regex::new(r"dernier|derniere|passe|precedent").unwrap();
}

/// Weighted-keyword overlap: weighted match ratio (70%) blended with plain
/// Jaccard (30%) over tokens longer than 2 chars.
pub fn keyword_overlap(a: &str, b: &str) -> f64 {
    let words_a = tokens(a);
    let words_b = tokens(b);
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let set_b: HashSet<&str> = words_b.iter().map(String::as_str).collect();
    let mut total_weight = 0.0;
    let mut matched_weight = 0.0;
    for word in &words_a {
        let weight = keyword_weight(word);
        total_weight += weight;
        if set_b.contains(word.as_str()) {
            matched_weight += weight;
        }
    }
    let weighted = if total_weight > 0.0 {
        matched_weight / total_weight
    } else {
        0.0
    };

    let set_a: HashSet<&str> = words_a.iter().map(String::as_str).collect();
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    let jaccard = if union > 0.0 { intersection / union } else { 0.0 };

    weighted * 0.7 + jaccard * 0.3
}

/// Keyword similarity with the match ladder: identical tokens score above
/// their weight, prefix/abbreviation pairs (both sides ≥ 3 chars) score
/// between, and a temporal keyword missing from the other side costs 30% of
/// the final ratio.
pub fn keyword_ladder(keywords_a: &[String], keywords_b: &[String]) -> f64 {
    if keywords_a.is_empty() || keywords_b.is_empty() {
        return 0.0;
    }

    let mut match_score = 0.0;
    let mut possible = 0.0;
    let mut temporal_miss = false;

    for kw1 in keywords_a {
        let weight = if is_temporal(kw1) { 1.5 } else { 1.0 };
        let mut found = false;
        for kw2 in keywords_b {
            if kw1 == kw2 {
                match_score += weight * 1.5;
                possible += weight;
                found = true;
                break;
            }
            if kw1.len() >= 3
                && kw2.len() >= 3
                && (kw1.starts_with(kw2.as_str()) || kw2.starts_with(kw1.as_str()))
            {
                match_score += weight;
                possible += weight * 0.7;
                found = true;
                break;
            }
        }
        if !found {
            possible += weight;
            if is_temporal(kw1) {
                temporal_miss = true;
            }
        }
    }

    let mut score: f64 = if possible > 0.0 {
        match_score / possible
    } else {
        0.0
    };
    if temporal_miss {
        score *= 0.7;
    }
    score.min(1.0)
}

/// Exact/near-exact detector over normalized text. Containment with a close
/// length ratio counts as near-exact.
pub fn exact_match_score(a: &str, b: &str) -> f64 {
    let na = normalize::normalize(a);
    let nb = normalize::normalize(b);
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    if na == nb {
        return 1.0;
    }
    if na.contains(&nb) || nb.contains(&na) {
        let ratio = na.len().min(nb.len()) as f64 / na.len().max(nb.len()) as f64;
        return if ratio > 0.8 { 0.95 } else { 0.85 };
    }
    0.0
}

/// Classic edit distance normalized to [0, 1] on normalized text.
pub fn levenshtein_ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize::normalize(a), &normalize::normalize(b))
}

/// Multiplicative temporal-coherence factor between a normalized question
/// and a normalized stored question. Coarse period markers penalize only
/// when the question carries one the stored side lacks; next/past and
/// day markers must agree on both sides, and a shared day marker earns a
/// single boost (the caller caps at 1.0).
pub fn temporal_coherence(norm_question: &str, norm_stored: &str) -> f64 {
    let mut factor = 1.0;

    for re in [&*MONTH_CURRENT, &*WEEK_CURRENT, &*YEAR_CURRENT] {
        if re.is_match(norm_question) && !re.is_match(norm_stored) {
            factor *= 0.7;
        }
    }
    if NEXT_MARKER.is_match(norm_question) != NEXT_MARKER.is_match(norm_stored) {
        factor *= 0.8;
    }
    if PAST_MARKER.is_match(norm_question) != PAST_MARKER.is_match(norm_stored) {
        factor *= 0.8;
    }

    let mut shared_day = false;
    for marker in DAY_MARKERS {
        let in_question = norm_question.contains(marker);
        let in_stored = norm_stored.contains(marker);
        if in_question != in_stored {
            factor *= 0.3;
        } else if in_question {
            shared_day = true;
        }
    }
    if shared_day {
        factor *= 1.5;
    }

    factor
}

/// Combined lexical score used by full scans and disambiguation entry:
/// keyword ladder (70%) + Levenshtein ratio (30%), then temporal coherence,
/// clamped to [0, 1].
pub fn combined_similarity(a: &str, b: &str) -> f64 {
    let na = normalize::normalize(a);
    let nb = normalize::normalize(b);
    let kw = keyword_ladder(&keywords(a), &keywords(b));
    let lev = strsim::normalized_levenshtein(&na, &nb);
    let base = kw * 0.7 + lev * 0.3;
    (base * temporal_coherence(&na, &nb)).clamp(0.0, 1.0)
}

/// Vector-store distances land in [0, 2]; similarity is their complement.
pub fn distance_to_similarity(distance: f64) -> f64 {
    (1.0 - distance).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_overlap_weighted() {
        let score = keyword_overlap(
            "Qui travaille sur le chantier ?",
            "Qui travaille sur le projet ?",
        );
        // qui + travaille + sur match (4.5 of 6.0 weighted), jaccard 3/5
        assert!(score > 0.65 && score < 0.8, "score = {}", score);

        assert_eq!(keyword_overlap("", "Qui travaille ?"), 0.0);
    }

    #[test]
    fn test_keyword_ladder_identical_and_disjoint() {
        let a = keywords("Quels sont les projets en cours ?");
        assert_eq!(keyword_ladder(&a, &a), 1.0);

        let b = keywords("Montant des factures impayées");
        assert!(keyword_ladder(&a, &b) < 0.2);
    }

    #[test]
    fn test_keyword_ladder_prefix_match() {
        let a = vec!["factur".to_string()];
        let b = vec!["factures".to_string()];
        let score = keyword_ladder(&a, &b);
        assert!(score > 0.9, "prefix pairs should score high, got {}", score);
    }

    #[test]
    fn test_exact_match_score_variants() {
        // case/accent/punctuation variants normalize identically
        assert_eq!(
            exact_match_score("Quels sont les projets en cours ?", "quels sont les PROJETS en cours"),
            1.0
        );
        // containment with close lengths
        assert_eq!(
            exact_match_score("la liste des factures du mois", "liste des factures du mois"),
            0.95
        );
        // containment with a large length gap
        assert_eq!(
            exact_match_score("quels sont les projets en cours actuellement chez nous", "projets en cours"),
            0.85
        );
        assert_eq!(exact_match_score("devis acceptés", "factures impayées"), 0.0);
    }

    #[test]
    fn test_levenshtein_ratio_bounds() {
        assert_eq!(levenshtein_ratio("projets", "projets"), 1.0);
        assert!(levenshtein_ratio("projets", "projet") > 0.8);
        assert!(levenshtein_ratio("abc", "xyz") < 0.01);
    }

    #[test]
    fn test_temporal_mismatch_collapses_score() {
        // Scenario: day marker on one side only, "prochaine" on the other
        let score = combined_similarity(
            "Qui travaille demain ?",
            "Qui travaille la semaine prochaine ?",
        );
        assert!(score < 0.3, "temporal mismatch must collapse, got {}", score);
        assert!(score < 0.65);
    }

    #[test]
    fn test_shared_day_marker_boosts() {
        let factor = temporal_coherence(
            "qui travaille demain",
            "quels employes travaillent demain",
        );
        assert!((factor - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_coarse_period_mismatch() {
        let factor = temporal_coherence(
            "factures du mois en cours",
            "factures de la semaine",
        );
        // month-current on one side only
        assert!((factor - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_normalization_invariance() {
        let a = "Quels sont les projets en cours ?";
        let a_variant = "quels   sont les PROJETS en cours";
        let b = "Liste des projets actifs";
        assert_eq!(combined_similarity(a, b), combined_similarity(a_variant, b));
        assert_eq!(keyword_overlap(a, b), keyword_overlap(a_variant, b));
    }

    #[test]
    fn test_distance_to_similarity() {
        assert!((distance_to_similarity(0.15) - 0.85).abs() < 1e-9);
        assert_eq!(distance_to_similarity(1.4), 0.0);
        assert_eq!(distance_to_similarity(0.0), 1.0);
    }
}
