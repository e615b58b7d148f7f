use crate::intent::{AgentKind, StructuredIntent};
use tracing::{debug, warn};

/// Minimum confidence for an intent to be cached.
pub const CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Outcome of plausibility scoring for a generated intent.
#[derive(Debug, Clone)]
pub struct Validation {
    pub valid: bool,
    pub confidence: f64,
    /// Human-readable trail of every penalty and bonus applied.
    pub reasons: Vec<String>,
}

fn apply_penalty(score: f64, penalty: f64, reason: &str, reasons: &mut Vec<String>) -> f64 {
    warn!("{}", reason);
    reasons.push(reason.to_string());
    (score - penalty).max(0.0)
}

/// Score how plausible a generated intent is, starting from 1.0 and applying
/// subtractive penalties. Each penalty floors at 0 on its own; the final
/// score is clamped to [0, 1].
pub fn validate_intent(intent: &StructuredIntent) -> Validation {
    if intent.original_question.trim().is_empty()
        || intent.reformulated_question.trim().is_empty()
    {
        return Validation {
            valid: false,
            confidence: 0.0,
            reasons: vec!["missing question or reformulation".to_string()],
        };
    }

    let mut score = 1.0_f64;
    let mut reasons = Vec::new();
    let original_len = intent.original_question.chars().count() as f64;
    let reformulated_len = intent.reformulated_question.chars().count() as f64;

    if intent.original_question.trim() == intent.reformulated_question.trim() {
        score = apply_penalty(score, 0.6, "no reformulation performed", &mut reasons);
    }

    if original_len < 15.0 && reformulated_len < original_len * 2.0 {
        score = apply_penalty(
            score,
            0.4,
            "reformulation too thin for a short question",
            &mut reasons,
        );
    }

    match intent.agent {
        AgentKind::QueryBuilder => {
            if intent.tables.is_empty() {
                score = apply_penalty(score, 0.4, "no tables for a querybuilder intent", &mut reasons);
            }
            if intent.fields.is_empty() {
                score = apply_penalty(score, 0.3, "no fields to display", &mut reasons);
            }
            if intent.conditions.trim().is_empty() {
                score = apply_penalty(score, 0.3, "no conditions specified", &mut reasons);
            }
            if intent.final_query.as_deref().map_or(true, |q| q.trim().is_empty()) {
                score = apply_penalty(score, 0.1, "no synthesized query", &mut reasons);
            }
        }
        AgentKind::Workflow => {
            if intent.action.as_deref().map_or(true, |a| a.trim().is_empty()) {
                score = apply_penalty(score, 0.2, "no action for a workflow intent", &mut reasons);
            }
            if intent.entities.is_empty() {
                score = apply_penalty(score, 0.15, "no entities for a workflow intent", &mut reasons);
            }
            if intent.parameters.is_empty() {
                score = apply_penalty(score, 0.1, "no parameters for a workflow intent", &mut reasons);
            }
        }
    }

    if reformulated_len < original_len * 0.5 {
        score = apply_penalty(
            score,
            0.2,
            "reformulation much shorter than the question",
            &mut reasons,
        );
    }
    if reformulated_len > original_len * 1.5 {
        score += 0.1;
        debug!("detailed reformulation, confidence bonus applied");
        reasons.push("detailed reformulation, confidence bonus applied".to_string());
    }

    let confidence = score.clamp(0.0, 1.0);
    Validation {
        valid: confidence >= CONFIDENCE_THRESHOLD,
        confidence,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_query_intent() -> StructuredIntent {
        let mut intent = StructuredIntent::new(
            "Quels sont les projets en cours ?",
            AgentKind::QueryBuilder,
        );
        intent.reformulated_question =
            "Liste des projets dont le statut courant est en cours d'exécution".to_string();
        intent.tables = vec!["projects".to_string(), "ref_status".to_string()];
        intent.fields = vec!["projects.name".to_string()];
        intent.conditions = "ref_status.code = 'en_cours'".to_string();
        intent.final_query = Some("SELECT projects.name FROM projects".to_string());
        intent
    }

    #[test]
    fn test_complete_intent_is_valid() {
        let validation = validate_intent(&full_query_intent());
        assert!(validation.valid);
        assert!((validation.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_reformulation_is_a_hard_failure() {
        let mut intent = full_query_intent();
        intent.reformulated_question = String::new();
        let validation = validate_intent(&intent);
        assert!(!validation.valid);
        assert_eq!(validation.confidence, 0.0);
    }

    #[test]
    fn test_identical_reformulation_is_heavily_penalized() {
        let mut intent = full_query_intent();
        intent.reformulated_question = intent.original_question.clone();
        let validation = validate_intent(&intent);
        assert!(!validation.valid);
        assert!((validation.confidence - 0.4).abs() < 1e-9);
        assert!(validation.reasons.iter().any(|r| r.contains("no reformulation")));
    }

    #[test]
    fn test_short_question_needs_expanded_reformulation() {
        let mut intent = full_query_intent();
        intent.original_question = "Projets ?".to_string();
        intent.reformulated_question = "Liste projets".to_string();
        let validation = validate_intent(&intent);
        assert!(!validation.valid);
        assert!((validation.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_empty_querybuilder_fields_stack_to_zero() {
        let mut intent = full_query_intent();
        // length within [0.5x, 1.5x] of the original, no length adjustment
        intent.reformulated_question = "Liste des projets actuellement en cours".to_string();
        intent.tables.clear();
        intent.fields.clear();
        intent.conditions.clear();
        intent.final_query = None;
        let validation = validate_intent(&intent);
        assert!(!validation.valid);
        assert_eq!(validation.confidence, 0.0);
        assert_eq!(validation.reasons.len(), 4);
    }

    #[test]
    fn test_workflow_intent_penalties() {
        let mut intent = StructuredIntent::new(
            "Créer un devis pour le client Martin",
            AgentKind::Workflow,
        );
        intent.reformulated_question = "Créer un nouveau devis pour Martin".to_string();
        let validation = validate_intent(&intent);
        assert!(!validation.valid);
        assert!((validation.confidence - 0.55).abs() < 1e-9);

        intent.action = Some("create_quotation".to_string());
        intent.entities = vec!["quotations".to_string()];
        intent.parameters = vec!["client_id".to_string()];
        let validation = validate_intent(&intent);
        assert!(validation.valid);
    }

    #[test]
    fn test_detailed_reformulation_bonus_can_rescue() {
        let mut intent = full_query_intent();
        intent.conditions.clear();
        intent.original_question = "Liste des projets ?".to_string();
        intent.reformulated_question =
            "Liste complète de tous les projets enregistrés avec leur nom".to_string();
        let validation = validate_intent(&intent);
        assert!(validation.valid);
        assert!((validation.confidence - 0.8).abs() < 1e-9);
    }
}
