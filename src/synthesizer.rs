use crate::intent::{AgentKind, StructuredIntent};
use crate::join_graph::{resolve_table_name, JoinGraph};
use crate::repair;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

lazy_static! {
    static ref IDENTIFIER_REJECT: Regex = Regex::new(r"[^a-zA-Z0-9_.]").unwrap();
    static ref MUTATING_KEYWORD: Regex =
        Regex::new(r"(?i)\b(DROP|DELETE|UPDATE|INSERT|ALTER|TRUNCATE)\b").unwrap();
    static ref SINGLE_QUOTED: Regex = Regex::new(r#"'([^'"]*)'"#).unwrap();
    static ref DOUBLE_QUOTED: Regex = Regex::new(r#""([^'"]*)""#).unwrap();
    static ref QUOTE_WORTHY: Regex = Regex::new(r"[\s(),=<>]").unwrap();
}

/// Keep only characters legal in a table or column reference.
pub fn sanitize_identifier(identifier: &str) -> String {
    IDENTIFIER_REJECT.replace_all(identifier.trim(), "").into_owned()
}

/// Strip injection vectors from a free-form condition string: the characters
/// `;`, `'` and `\`, comment markers, and mutating keywords in any casing.
pub fn sanitize_conditions(conditions: &str) -> String {
    if conditions.is_empty() {
        return String::new();
    }
    let mut sanitized: String = conditions
        .chars()
        .filter(|c| !matches!(c, ';' | '\'' | '\\'))
        .collect();
    sanitized = sanitized.replace("--", "").replace("/*", "");
    MUTATING_KEYWORD.replace_all(&sanitized, "").into_owned()
}

/// Drop quotes around single-token values (models over-quote identifiers);
/// values containing whitespace or operator characters keep theirs.
pub fn normalize_quoted_values(conditions: &str) -> String {
    let unquote = |caps: &regex::Captures| -> String {
        let inner = &caps[1];
        if QUOTE_WORTHY.is_match(inner) {
            caps[0].to_string()
        } else {
            inner.to_string()
        }
    };
    let pass = DOUBLE_QUOTED.replace_all(conditions, &unquote).into_owned();
    SINGLE_QUOTED.replace_all(&pass, &unquote).trim().to_string()
}

/// Build a SELECT statement from a structured intent. Returns the empty
/// string when synthesis is impossible, never an invalid statement.
pub fn synthesize(intent: &StructuredIntent, graph: &JoinGraph) -> String {
    if intent.agent == AgentKind::Workflow {
        debug!("workflow intent carries no SQL, skipping synthesis");
        return String::new();
    }
    if intent.tables.is_empty() {
        warn!("no tables in intent, aborting synthesis");
        return String::new();
    }

    let tables: Vec<String> = intent
        .tables
        .iter()
        .map(|t| sanitize_identifier(&resolve_table_name(t)))
        .filter(|t| !t.is_empty())
        .collect();

    if tables.is_empty() || !tables.iter().all(|t| graph.contains(t)) {
        warn!(tables = ?intent.tables, "unknown tables, aborting synthesis");
        return String::new();
    }

    let fields: Vec<String> = intent
        .fields
        .iter()
        .map(|f| sanitize_identifier(f))
        .filter(|f| !f.is_empty())
        .collect();
    let select_list = if fields.is_empty() {
        "*".to_string()
    } else {
        fields.join(", ")
    };

    let primary = &tables[0];
    let mut query = format!("SELECT {} FROM {}", select_list, primary);
    if tables.len() > 1 {
        query = graph.append_joins(&query, primary, &tables[1..]);
    }

    let conditions = normalize_quoted_values(&sanitize_conditions(&intent.conditions));
    if !conditions.is_empty() {
        if conditions.to_uppercase().starts_with("WHERE") {
            query = format!("{} {}", query, conditions);
        } else {
            query = format!("{} WHERE {}", query, conditions);
        }
    }

    repair::correct_status_references(&query)
}
