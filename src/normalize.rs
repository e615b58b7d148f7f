use crate::error::{EngineError, Result};
use lazy_static::lazy_static;
use regex::Regex;

/// French stopwords excluded from keyword extraction.
const STOPWORDS: [&str; 14] = [
    "le", "la", "les", "un", "une", "des", "et", "ou", "qui", "que", "quoi", "dont", "est", "sont",
];

/// Inbound questions longer than this are rejected before any matching.
const MAX_QUESTION_CHARS: usize = 500;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Fold a French accented letter to its ASCII base letter.
fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'â' | 'ä' | 'á' | 'ã' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'î' | 'ï' | 'í' => 'i',
        'ô' | 'ö' | 'ó' | 'õ' => 'o',
        'ù' | 'û' | 'ü' | 'ú' => 'u',
        'ý' | 'ÿ' => 'y',
        'ç' => 'c',
        'ñ' => 'n',
        _ => c,
    }
}

/// Normalize a question for comparison: lowercase, strip accents, turn
/// punctuation into spaces, collapse whitespace. Two paraphrases differing
/// only in case/accents/spacing normalize to the same string.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase().replace('œ', "oe").replace('æ', "ae");
    let folded: String = lowered
        .chars()
        .map(fold_diacritic)
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect();
    WHITESPACE.replace_all(&folded, " ").trim().to_string()
}

/// Tokens longer than 2 chars, stopwords removed. Used by the catalog-side
/// keyword scorer.
pub fn keywords(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Tokens longer than 2 chars, stopwords kept ("qui", "que"... carry weight
/// in the overlap scorer).
pub fn tokens(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect()
}

/// Inbound guard: empty, oversized or SQL-hostile questions are rejected
/// before any matching or generation. The ASCII apostrophe stays allowed
/// since French elision (l'année, aujourd'hui) is ordinary question text.
pub fn validate_question(text: &str) -> Result<()> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidQuestion("empty question".to_string()));
    }
    if trimmed.chars().count() > MAX_QUESTION_CHARS {
        return Err(EngineError::InvalidQuestion(format!(
            "question exceeds {} characters",
            MAX_QUESTION_CHARS
        )));
    }
    if trimmed.chars().any(|c| matches!(c, ';' | '"' | '\\')) || trimmed.contains("--") {
        return Err(EngineError::InvalidQuestion(
            "question contains forbidden characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_accents_and_case() {
        assert_eq!(
            normalize("Quels PROJETS sont EN COURS ?"),
            "quels projets sont en cours"
        );
        assert_eq!(normalize("énergie   déjà-vu"), "energie deja vu");
        assert_eq!(normalize("Été à Besançon"), "ete a besancon");
    }

    #[test]
    fn test_normalize_elision() {
        assert_eq!(
            normalize("Qui travaille aujourd'hui ?"),
            "qui travaille aujourd hui"
        );
    }

    #[test]
    fn test_keywords_filter_stopwords_and_short_tokens() {
        assert_eq!(
            keywords("Quels sont les projets en cours ?"),
            vec!["quels", "projets", "cours"]
        );
    }

    #[test]
    fn test_tokens_keep_weighted_stopwords() {
        assert_eq!(
            tokens("Qui travaille sur le projet ?"),
            vec!["qui", "travaille", "sur", "projet"]
        );
    }

    #[test]
    fn test_validate_question_limits() {
        assert!(validate_question("Quels sont les projets en cours ?").is_ok());
        assert!(validate_question("Qui travaille aujourd'hui ?").is_ok());
        assert!(validate_question("").is_err());
        assert!(validate_question("DROP TABLE projects; --").is_err());
        assert!(validate_question(&"a".repeat(501)).is_err());
    }
}
