use crate::error::{EngineError, Result};
use crate::normalize;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which downstream agent a question belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    QueryBuilder,
    Workflow,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::QueryBuilder => "querybuilder",
            AgentKind::Workflow => "workflow",
        }
    }
}

/// Structured representation of a question's meaning, prior to SQL text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredIntent {
    pub original_question: String,
    pub reformulated_question: String,
    pub agent: AgentKind,
    /// Query-builder only; order matters, the first table anchors the joins.
    #[serde(default)]
    pub tables: Vec<String>,
    /// Defaults to `*` at synthesis time when empty.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Free-form WHERE body, pre-sanitization.
    #[serde(default)]
    pub conditions: String,
    /// Aggregation hints, informational only.
    #[serde(default)]
    pub operations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_query: Option<String>,
    /// Workflow-side fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<String>,
}

impl StructuredIntent {
    pub fn new(original_question: &str, agent: AgentKind) -> Self {
        Self {
            original_question: original_question.to_string(),
            reformulated_question: String::new(),
            agent,
            tables: Vec::new(),
            fields: Vec::new(),
            conditions: String::new(),
            operations: Vec::new(),
            final_query: None,
            action: None,
            entities: Vec::new(),
            parameters: Vec::new(),
        }
    }
}

/// Parse the model's analysis response into an intent. The expected shape is
/// a JSON object with the French keys the prompt asks for; a line-oriented
/// fallback handles models that answer in labelled plain text.
pub fn parse_model_response(original_question: &str, raw: &str) -> Result<StructuredIntent> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if let Some(block) = extract_json_block(cleaned) {
        if let Ok(value) = serde_json::from_str::<Value>(block) {
            if value.is_object() {
                return Ok(intent_from_json(original_question, &value));
            }
        }
    }
    parse_text_response(original_question, cleaned)
}

/// Locate the outermost JSON object in a response that may carry prose
/// around it.
fn extract_json_block(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end > start {
        Some(&raw[start..=end])
    } else {
        None
    }
}

/// Accent-insensitive key lookup: models drift between "Question reformulée"
/// and "Question reformulee".
fn get_key<'a>(value: &'a Value, label: &str) -> Option<&'a Value> {
    let obj = value.as_object()?;
    if let Some(v) = obj.get(label) {
        return Some(v);
    }
    let want = normalize::normalize(label);
    obj.iter()
        .find(|(k, _)| normalize::normalize(k) == want)
        .map(|(_, v)| v)
}

fn string_or_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn optional_text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !is_none_marker(s))
}

fn is_none_marker(s: &str) -> bool {
    matches!(
        normalize::normalize(s).as_str(),
        "aucun" | "aucune" | "none" | "n a"
    )
}

fn intent_from_json(original_question: &str, value: &Value) -> StructuredIntent {
    let agent_raw = get_key(value, "Agent").and_then(Value::as_str).unwrap_or("querybuilder");
    let agent = if agent_raw.to_lowercase().contains("workflow") {
        AgentKind::Workflow
    } else {
        AgentKind::QueryBuilder
    };

    let mut intent = StructuredIntent::new(original_question, agent);
    intent.reformulated_question = get_key(value, "Question reformulée")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    intent.tables = get_key(value, "Tables concernées").map(string_or_list).unwrap_or_default();
    intent.fields = get_key(value, "Champs à afficher").map(string_or_list).unwrap_or_default();
    intent.operations = get_key(value, "Opérations").map(string_or_list).unwrap_or_default();

    intent.conditions = match get_key(value, "Conditions et filtres") {
        Some(Value::String(s)) if !is_none_marker(s) => s.trim().to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty() && !is_none_marker(s))
            .join(" AND "),
        _ => String::new(),
    };

    intent.action = optional_text(get_key(value, "Action à effectuer"));
    intent.entities = get_key(value, "Entités concernées").map(string_or_list).unwrap_or_default();
    intent.parameters = get_key(value, "Paramètres nécessaires").map(string_or_list).unwrap_or_default();

    intent
}

/// Line-oriented fallback: scan for `Label: value` pairs.
fn parse_text_response(original_question: &str, text: &str) -> Result<StructuredIntent> {
    let mut intent = StructuredIntent::new(original_question, AgentKind::QueryBuilder);

    for raw_line in text.lines() {
        let line = raw_line.trim().trim_start_matches('-').trim();
        if let Some(rest) = strip_label(line, "Question reformulée") {
            intent.reformulated_question = rest;
        } else if let Some(rest) = strip_label(line, "Agent") {
            if rest.to_lowercase().contains("workflow") {
                intent.agent = AgentKind::Workflow;
            }
        } else if let Some(rest) = strip_label(line, "Tables concernées") {
            intent.tables = split_list(&rest);
        } else if let Some(rest) = strip_label(line, "Champs à afficher") {
            intent.fields = split_list(&rest);
        } else if let Some(rest) = strip_label(line, "Conditions et filtres") {
            intent.conditions = if is_none_marker(&rest) { String::new() } else { rest };
        } else if let Some(rest) = strip_label(line, "Opérations") {
            intent.operations = split_list(&rest);
        } else if let Some(rest) = strip_label(line, "Action à effectuer") {
            intent.action = Some(rest).filter(|s| !s.is_empty() && !is_none_marker(s));
        } else if let Some(rest) = strip_label(line, "Entités concernées") {
            intent.entities = split_list(&rest);
        } else if let Some(rest) = strip_label(line, "Paramètres nécessaires") {
            intent.parameters = split_list(&rest);
        }
    }

    if intent.reformulated_question.is_empty() && intent.tables.is_empty() {
        return Err(EngineError::Generation(format!(
            "unparseable model response: {}",
            text.chars().take(200).collect::<String>()
        )));
    }
    Ok(intent)
}

fn strip_label(line: &str, label: &str) -> Option<String> {
    let idx = line.find(':')?;
    let (head, tail) = line.split_at(idx);
    if normalize::normalize(head) == normalize::normalize(label) {
        Some(tail[1..].trim().trim_matches('"').to_string())
    } else {
        None
    }
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(|p| p.trim().trim_matches('"').to_string())
        .filter(|p| !p.is_empty() && !is_none_marker(p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_json_response() {
        let raw = r#"```json
{
  "Question originale": "Quels sont les projets en cours ?",
  "Question reformulée": "Liste des projets dont le statut est en cours",
  "Agent": "querybuilder",
  "Tables concernées": ["projects", "ref_status"],
  "Champs à afficher": ["projects.name", "ref_status.code"],
  "Conditions et filtres": "ref_status.code = 'en_cours'",
  "Opérations": []
}
```"#;
        let intent = parse_model_response("Quels sont les projets en cours ?", raw).unwrap();
        assert_eq!(intent.agent, AgentKind::QueryBuilder);
        assert_eq!(intent.tables, vec!["projects", "ref_status"]);
        assert_eq!(intent.fields.len(), 2);
        assert_eq!(intent.conditions, "ref_status.code = 'en_cours'");
        assert!(intent.reformulated_question.starts_with("Liste des projets"));
    }

    #[test]
    fn test_parse_accentless_keys_and_comma_lists() {
        let raw = r#"{"Question reformulee": "Factures impayées du mois",
                      "Agent": "QueryBuilder",
                      "Tables concernees": "invoices, projects",
                      "Champs a afficher": "invoices.total_ttc",
                      "Conditions et filtres": "Aucune"}"#;
        let intent = parse_model_response("factures impayées ?", raw).unwrap();
        assert_eq!(intent.tables, vec!["invoices", "projects"]);
        assert!(intent.conditions.is_empty());
    }

    #[test]
    fn test_parse_workflow_agent() {
        let raw = r#"{"Question reformulée": "Créer un devis pour le client Martin",
                      "Agent": "workflow",
                      "Action à effectuer": "create_quotation",
                      "Entités concernées": ["quotations", "clients"],
                      "Paramètres nécessaires": ["client_id", "montant"]}"#;
        let intent = parse_model_response("créer un devis", raw).unwrap();
        assert_eq!(intent.agent, AgentKind::Workflow);
        assert_eq!(intent.action.as_deref(), Some("create_quotation"));
        assert_eq!(intent.entities.len(), 2);
        assert_eq!(intent.parameters, vec!["client_id", "montant"]);
    }

    #[test]
    fn test_parse_text_fallback() {
        let raw = "Question reformulée: Liste des employés présents demain\n\
                   Agent: querybuilder\n\
                   Tables concernées: staff, timesheet_entries\n\
                   Champs à afficher: staff.firstname, staff.lastname\n\
                   Conditions et filtres: timesheet_entries.date = CURRENT_DATE + INTERVAL '1 day'";
        let intent = parse_model_response("qui travaille demain ?", raw).unwrap();
        assert_eq!(intent.tables, vec!["staff", "timesheet_entries"]);
        assert!(intent.conditions.contains("INTERVAL '1 day'"));
    }

    #[test]
    fn test_unparseable_response_is_an_error() {
        assert!(parse_model_response("q", "je ne sais pas").is_err());
    }

    #[test]
    fn test_conditions_array_joined_with_and() {
        let raw = r#"{"Question reformulée": "Devis acceptés de 2025",
                      "Agent": "querybuilder",
                      "Tables concernées": ["quotations"],
                      "Conditions et filtres": ["status = 'accepté'", "EXTRACT(YEAR FROM issue_date) = 2025"]}"#;
        let intent = parse_model_response("devis acceptés 2025", raw).unwrap();
        assert_eq!(
            intent.conditions,
            "status = 'accepté' AND EXTRACT(YEAR FROM issue_date) = 2025"
        );
    }
}
