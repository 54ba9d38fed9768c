//! "Top N" question detection.
//!
//! Ranking questions bypass fuzzy metric matching entirely: they ask for the
//! most frequent values of a dimension, not for a dictionary metric. Detection
//! needs both a ranking marker and a recognizable entity that maps to a
//! column of an available table (dictionary-described or caller-supplied
//! schema); otherwise the question falls through to normal resolution.

use std::sync::OnceLock;

use regex::Regex;

use super::ResolveRequest;
use crate::dictionary::Dictionary;
use crate::plan::{
    MetricMatch, OrderBy, PlanOperation, ResolvedPlan, SortDirection,
};

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;

const RANK_MARKERS: &[&str] = &[
    "top ",
    "ranking",
    "mejores",
    "mas escuchad",
    "popular",
    "mayores",
    "mayor ",
];

/// Entity wordings and the column-name fragment they map to.
const ENTITY_GROUPS: &[(&[&str], &str)] = &[
    (&["artista", "artist"], "artist"),
    (&["cancion", "canciones", "track", "tema", "song"], "track"),
    (&["cliente", "customer"], "customer"),
    (&["producto", "familia", "product"], "product"),
];

fn limit_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"top\s+(\d+)").unwrap(),
            Regex::new(r"(\d+)\s+mejores").unwrap(),
            Regex::new(r"los\s+(\d+)").unwrap(),
        ]
    })
}

/// Detect a ranking question over a normalized (lowercased, accent-folded)
/// question. Returns None when this is not a ranking question or no entity
/// column can be located among the caller's tables.
pub fn detect(
    normalized: &str,
    dictionary: &Dictionary,
    request: &ResolveRequest,
) -> Option<ResolvedPlan> {
    let marker = RANK_MARKERS
        .iter()
        .find(|m| normalized.contains(*m))?;
    let candidates = candidate_tables(dictionary, request);
    let (table, column) = find_entity_column(normalized, &candidates)?;

    let limit = parse_limit(normalized);
    // Count rows per group via the primary key where the dictionary knows
    // one, otherwise via the entity column itself.
    let count_column = dictionary
        .get_table(&table)
        .map(|t| t.primary_key.clone())
        .unwrap_or_else(|_| column.clone());
    let expression = format!("COUNT({})", count_column);

    Some(ResolvedPlan {
        tables: vec![table],
        metrics: vec![MetricMatch {
            name: "count".to_string(),
            alias_matched: marker.trim().to_string(),
            expression,
            requires: vec![column.clone()],
            filters: Vec::new(),
            format: "number".to_string(),
            match_score: 100.0,
            base_score: 100.0,
            context_boost: 0.0,
            context_boost_reasons: Vec::new(),
            matched_phrase: normalized.to_string(),
        }],
        filters: Vec::new(),
        group_by: vec![column],
        order_by: vec![OrderBy {
            column: "count".to_string(),
            direction: SortDirection::Desc,
        }],
        limit: Some(limit),
        time_column: None,
        time_grain: None,
        baseline_period: None,
        compare_period: None,
        confidence: 0.95,
        operation: PlanOperation::Rank,
        dictionary_version: dictionary.version.clone(),
    })
}

fn parse_limit(normalized: &str) -> usize {
    for pattern in limit_patterns() {
        if let Some(caps) = pattern.captures(normalized) {
            if let Ok(n) = caps[1].parse::<usize>() {
                if n > 0 {
                    return n.min(MAX_LIMIT);
                }
            }
        }
    }
    DEFAULT_LIMIT
}

/// The tables ranking detection may target: dictionary tables first, then
/// caller-supplied schemas for tables the dictionary does not describe,
/// both restricted to `available_tables` when the request names them.
fn candidate_tables(
    dictionary: &Dictionary,
    request: &ResolveRequest,
) -> Vec<(String, Vec<String>)> {
    let available = request.available_tables.as_deref();
    let allowed = |name: &str| available.is_none_or(|a| a.iter().any(|t| t == name));

    let mut tables = Vec::new();
    for name in dictionary.list_tables() {
        if !allowed(name) {
            continue;
        }
        if let Ok(table) = dictionary.get_table(name) {
            tables.push((name.to_string(), table.columns.keys().cloned().collect()));
        }
    }
    if let Some(schemas) = &request.table_schemas {
        for (name, columns) in schemas {
            if allowed(name) && !tables.iter().any(|(n, _)| n == name) {
                tables.push((name.clone(), columns.clone()));
            }
        }
    }
    tables
}

/// Map the first recognized entity wording to a (table, column) pair by
/// scanning candidate tables for a column name containing the fragment.
fn find_entity_column(
    normalized: &str,
    candidates: &[(String, Vec<String>)],
) -> Option<(String, String)> {
    for (keywords, fragment) in ENTITY_GROUPS {
        if !keywords.iter().any(|k| normalized.contains(k)) {
            continue;
        }
        for (table, columns) in candidates {
            for column in columns {
                if column.to_lowercase().contains(fragment) {
                    return Some((table.clone(), column.clone()));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn dict() -> Dictionary {
        Dictionary::from_default().unwrap()
    }

    fn any_request() -> ResolveRequest {
        ResolveRequest::new("")
    }

    #[test]
    fn test_top_n_artists() {
        let plan = detect("top 5 artistas mas escuchados", &dict(), &any_request()).unwrap();
        assert_eq!(plan.tables, vec!["listening_history".to_string()]);
        assert_eq!(plan.group_by, vec!["ARTIST_NAME".to_string()]);
        assert_eq!(plan.limit, Some(5));
        assert_eq!(plan.operation, PlanOperation::Rank);
        assert_eq!(plan.confidence, 0.95);
        assert_eq!(plan.order_by[0].direction, SortDirection::Desc);
        assert_eq!(plan.metrics[0].expression, "COUNT(PLAY_ID)");
    }

    #[test]
    fn test_default_and_capped_limits() {
        let plan = detect("mejores clientes", &dict(), &any_request()).unwrap();
        assert_eq!(plan.limit, Some(10));
        assert_eq!(plan.tables, vec!["orders".to_string()]);
        assert_eq!(plan.group_by, vec!["CUSTOMER_ID".to_string()]);

        let plan = detect("top 500 canciones", &dict(), &any_request()).unwrap();
        assert_eq!(plan.limit, Some(50));
        assert_eq!(plan.group_by, vec!["TRACK_NAME".to_string()]);
    }

    #[test]
    fn test_non_ranking_question_falls_through() {
        assert!(detect("ingresos totales este mes", &dict(), &any_request()).is_none());
    }

    #[test]
    fn test_marker_without_entity_falls_through() {
        assert!(detect("top 10 sucursales", &dict(), &any_request()).is_none());
    }

    #[test]
    fn test_detection_honors_available_tables() {
        let mut request = any_request();
        request.available_tables = Some(vec!["orders".to_string()]);
        // The artist column lives in a table the caller does not have.
        assert!(detect("top 5 artistas", &dict(), &request).is_none());
    }

    #[test]
    fn test_caller_schema_enables_non_dictionary_table() {
        let mut request = any_request();
        request.available_tables = Some(vec!["tickets".to_string()]);
        request.table_schemas = Some(BTreeMap::from([(
            "tickets".to_string(),
            vec!["TICKET_ID".to_string(), "CUSTOMER_EMAIL".to_string()],
        )]));

        let plan = detect("mejores clientes", &dict(), &request).unwrap();
        assert_eq!(plan.tables, vec!["tickets".to_string()]);
        assert_eq!(plan.group_by, vec!["CUSTOMER_EMAIL".to_string()]);
        // No dictionary primary key, so the entity column is counted.
        assert_eq!(plan.metrics[0].expression, "COUNT(CUSTOMER_EMAIL)");
    }
}
