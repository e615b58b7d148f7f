use crate::disambiguate::ExtractedDate;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info};

lazy_static! {
    // quotation status codes that models compare as if they were stored text
    static ref STATUS_EQ_GUARD: Regex =
        Regex::new(r#"(?i)status\s*=\s*['"]?(en_attente|accepté|refusé)"#).unwrap();
    static ref STATUS_EQ_QUOTED: Regex =
        Regex::new(r#"(?i)(\w+\.)?status\s*=\s*['"]([^'"]+)['"]"#).unwrap();
    static ref STATUS_EQ_BARE: Regex =
        Regex::new(r"(?i)(\w+\.)?status\s*=\s*(en_attente|accepté|refusé)\b").unwrap();
    static ref STATUS_IN_GUARD: Regex =
        Regex::new(r#"(?i)status\s+IN\s*\(\s*['"]?(en_attente|accepté|refusé)"#).unwrap();
    static ref STATUS_IN_LIST: Regex =
        Regex::new(r"(?i)(\w+\.)?status\s+IN\s*\(\s*([^)]*)\)").unwrap();
    static ref EXPLICIT_MONTH: Regex =
        Regex::new(r"(?i)EXTRACT\(MONTH FROM [^)]*\)\s*=\s*\d+").unwrap();
    static ref EXPLICIT_YEAR: Regex =
        Regex::new(r"(?i)EXTRACT\(YEAR FROM [^)]*\)\s*=\s*\d+").unwrap();
    static ref RELATIVE_MONTH: Regex = Regex::new(
        r"(?i)EXTRACT\(MONTH FROM\s+(\w+\.\w+|\w+)\)\s*=\s*EXTRACT\(MONTH FROM CURRENT_DATE\)"
    )
    .unwrap();
    static ref RELATIVE_YEAR: Regex = Regex::new(
        r"(?i)EXTRACT\(YEAR FROM\s+(\w+\.\w+|\w+)\)\s*=\s*EXTRACT\(YEAR FROM CURRENT_DATE\)"
    )
    .unwrap();
    static ref PLACEHOLDER: Regex = Regex::new(r"\[([A-Z_]+)\]").unwrap();
}

/// Rewrite literal comparisons against the `status` column into subqueries on
/// the reference table. `status` is physically a foreign key, so cached or
/// generated SQL comparing it to a code string would return nothing.
/// Idempotent: already-rewritten subqueries are left alone.
pub fn correct_status_references(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }
    let mut corrected = query.to_string();

    if STATUS_IN_GUARD.is_match(&corrected) {
        info!("direct status reference detected (IN), rewriting to subquery");
        corrected = STATUS_IN_LIST
            .replace_all(&corrected, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                let list = caps[2].trim().to_string();
                if list.to_uppercase().starts_with("SELECT") {
                    return caps[0].to_string();
                }
                let quoted = list
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(|item| {
                        if item.starts_with('\'') || item.starts_with('"') {
                            item.to_string()
                        } else {
                            format!("'{}'", item)
                        }
                    })
                    .join(", ");
                format!(
                    "{}status IN (SELECT id FROM ref_quotation_status WHERE code IN ({}))",
                    prefix, quoted
                )
            })
            .into_owned();
    }

    if STATUS_EQ_GUARD.is_match(&corrected) {
        info!("direct status reference detected (=), rewriting to subquery");
        corrected = STATUS_EQ_QUOTED
            .replace_all(&corrected, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!(
                    "{}status = (SELECT id FROM ref_quotation_status WHERE code = '{}')",
                    prefix, &caps[2]
                )
            })
            .into_owned();
        corrected = STATUS_EQ_BARE
            .replace_all(&corrected, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!(
                    "{}status = (SELECT id FROM ref_quotation_status WHERE code = '{}')",
                    prefix,
                    caps[2].to_lowercase()
                )
            })
            .into_owned();
    }

    corrected
}

/// Substitute relative month/year comparisons with the literal values
/// extracted from the question. A query that already pins a numeric month or
/// year is left untouched.
pub fn apply_date_filters(query: &str, date: &ExtractedDate) -> String {
    let mut modified = query.to_string();

    if let Some(month) = date.month {
        if !EXPLICIT_MONTH.is_match(&modified) {
            modified = RELATIVE_MONTH
                .replace_all(&modified, |caps: &regex::Captures| {
                    format!("EXTRACT(MONTH FROM {}) = {}", &caps[1], month)
                })
                .into_owned();
        }
    }
    if let Some(year) = date.year {
        if !EXPLICIT_YEAR.is_match(&modified) {
            modified = RELATIVE_YEAR
                .replace_all(&modified, |caps: &regex::Captures| {
                    format!("EXTRACT(YEAR FROM {}) = {}", &caps[1], year)
                })
                .into_owned();
        }
    }

    if modified != query {
        debug!(query = %modified, "date filters applied");
    }
    modified
}

/// Placeholders the caller must fill before execution, e.g. `[CLIENT_ID]`.
pub fn required_parameters(query: &str) -> Vec<String> {
    let mut parameters = Vec::new();
    for caps in PLACEHOLDER.captures_iter(query) {
        let name = caps[1].to_string();
        if !parameters.contains(&name) {
            parameters.push(name);
        }
    }
    parameters
}
