use crate::normalize;
use crate::repair;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info};

lazy_static! {
    static ref LIST_MARKERS: Regex =
        Regex::new(r"(?i)individuel|chaque|liste|d[ée]tail|tous les").unwrap();
    static ref TOTAL_MARKERS: Regex =
        Regex::new(r"(?i)total|somme|cumul|montant global|tout").unwrap();
    static ref CUMUL_MARKER: Regex = Regex::new(r"(?i)cumul").unwrap();
    static ref SUM_CALL: Regex = Regex::new(r"(?i)SUM\(").unwrap();
    static ref GROUP_BY: Regex = Regex::new(r"(?i)GROUP BY").unwrap();
    static ref DESC_LIST: Regex = Regex::new(r"(?i)individuel|chaque|liste|d[ée]tail").unwrap();
    static ref DESC_TOTAL: Regex = Regex::new(r"(?i)total|somme|cumul").unwrap();
    static ref DESC_CUMUL: Regex = Regex::new(r"(?i)cumul|total").unwrap();
    static ref YEAR: Regex = Regex::new(r"\b(20\d{2})\b").unwrap();
}

const MONTHS: [&str; 12] = [
    "janvier", "fevrier", "mars", "avril", "mai", "juin", "juillet", "aout",
    "septembre", "octobre", "novembre", "decembre",
];

/// Month/year pulled lexically out of a question, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExtractedDate {
    pub month: Option<u32>,
    pub year: Option<i32>,
}

impl ExtractedDate {
    pub fn is_empty(&self) -> bool {
        self.month.is_none() && self.year.is_none()
    }
}

/// A cached query competing for an ambiguous question.
#[derive(Debug, Clone)]
pub struct QueryCandidate {
    pub id: String,
    pub question: String,
    pub final_query: String,
    pub description: String,
    /// Raw similarity from the matching tier.
    pub similarity: f64,
    /// Similarity plus intent bonuses; may exceed 1.0, used for ranking only.
    pub score: f64,
}

impl QueryCandidate {
    pub fn new(id: &str, question: &str, final_query: &str, similarity: f64) -> Self {
        Self {
            id: id.to_string(),
            question: question.to_string(),
            final_query: final_query.to_string(),
            description: String::new(),
            similarity,
            score: similarity,
        }
    }
}

/// Detect an explicit month (word-level, accent-insensitive) and year in the
/// question. Month names are tried in calendar order, first hit wins.
pub fn extract_date_info(question: &str) -> ExtractedDate {
    let normalized = normalize::normalize(question);
    let words: Vec<&str> = normalized.split_whitespace().collect();

    let month = MONTHS
        .iter()
        .position(|name| words.iter().any(|w| w == name))
        .map(|idx| idx as u32 + 1);

    let year = YEAR
        .captures(question)
        .and_then(|caps| caps[1].parse::<i32>().ok());

    let date = ExtractedDate { month, year };
    if !date.is_empty() {
        debug!(month = ?date.month, year = ?date.year, "date info extracted from question");
    }
    date
}

/// How strongly the question leans towards per-row listings versus a single
/// aggregated figure. "cumulé" dominates every other signal.
#[derive(Debug, Clone, Copy, Default)]
struct IntentLean {
    individual: i32,
    total: i32,
}

fn question_lean(question: &str) -> IntentLean {
    let mut lean = IntentLean::default();
    if LIST_MARKERS.is_match(question) {
        lean.individual += 2;
    }
    if TOTAL_MARKERS.is_match(question) {
        lean.total += 2;
    }
    if CUMUL_MARKER.is_match(question) {
        lean.total += 5;
        info!("\"cumulé\" detected, strongly favouring aggregation candidates");
    }
    lean
}

/// Re-rank near-tied candidates with intent-specific bonuses and return the
/// winner, its SQL already adjusted for any explicit month/year in the
/// question. The aggregation-versus-listing distinction is the safety
/// critical one: a total answered with a listing (or vice versa) is wrong in
/// a way similarity alone cannot see.
pub fn disambiguate(question: &str, mut candidates: Vec<QueryCandidate>) -> Option<QueryCandidate> {
    if candidates.is_empty() {
        return None;
    }

    let lean = question_lean(question);
    let wants_cumulative = CUMUL_MARKER.is_match(question);

    for candidate in &mut candidates {
        let has_sum = SUM_CALL.is_match(&candidate.final_query);
        let has_group_by = GROUP_BY.is_match(&candidate.final_query);

        candidate.score = if has_sum && wants_cumulative {
            candidate.similarity * 0.5 + 0.5
        } else if has_group_by {
            candidate.similarity * 0.7 + 0.3
        } else if has_sum {
            candidate.similarity * 0.6 + 0.4
        } else if lean.individual > lean.total {
            candidate.similarity * 0.8 + 0.2
        } else {
            candidate.similarity
        };

        if !candidate.description.is_empty() {
            let aligned = (lean.individual > lean.total && DESC_LIST.is_match(&candidate.description))
                || (lean.total > lean.individual && DESC_TOTAL.is_match(&candidate.description));
            if aligned {
                candidate.score += 0.05;
            }
            if wants_cumulative && DESC_CUMUL.is_match(&candidate.description) {
                candidate.score += 0.1;
            }
        }

        if lean.total > 0 && candidate.id.to_lowercase().contains("total") {
            candidate.score += 0.1;
        }

        debug!(
            id = %candidate.id,
            similarity = candidate.similarity,
            adjusted = candidate.score,
            "candidate re-scored"
        );
    }

    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut best = candidates.into_iter().next()?;

    let date = extract_date_info(question);
    if !date.is_empty() {
        best.final_query = repair::apply_date_filters(&best.final_query, &date);
    }

    info!(id = %best.id, score = best.score, "disambiguation winner");
    Some(best)
}
