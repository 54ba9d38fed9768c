//! Intent classification.
//!
//! The trait models an external classifier; [`KeywordClassifier`] is the
//! deterministic substring fallback used when none is configured, so the
//! rest of the pipeline stays testable offline. Intent only steers which
//! downstream path runs; it never overrides semantic resolution.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    QueryData,
    Aggregate,
    Compare,
    Forecast,
    Explain,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentResolution {
    pub intent: Intent,
    pub confidence: f64,
    /// Downstream capabilities the question needs, e.g. "time_comparison".
    pub needs: Vec<String>,
}

pub trait IntentClassifier: Send + Sync {
    fn classify(&self, question: &str) -> IntentResolution;
}

const COMPARE_MARKERS: &[&str] = &[
    "compar",
    " vs ",
    "versus",
    "frente a",
    "anterior",
    "pasado",
    "pasada",
    "last month",
    "last year",
    "last week",
];

const AGGREGATE_MARKERS: &[&str] = &[
    "total",
    "suma",
    "sum",
    "promedio",
    "average",
    "avg",
    "cuanto",
    "cuantos",
    "cuantas",
    "how many",
    "how much",
    "ingresos",
    "revenue",
];

const QUERY_MARKERS: &[&str] = &[
    "muestra",
    "dame",
    "lista",
    "show",
    "list",
    "ver",
    "top",
    "mejores",
    "ranking",
];

/// Deterministic substring-based classifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, question: &str) -> IntentResolution {
        let q: String = question
            .to_lowercase()
            .chars()
            .map(|c| match c {
                'á' => 'a',
                'é' => 'e',
                'í' => 'i',
                'ó' => 'o',
                'ú' | 'ü' => 'u',
                c => c,
            })
            .collect();
        if COMPARE_MARKERS.iter().any(|m| q.contains(m)) {
            return IntentResolution {
                intent: Intent::Compare,
                confidence: 0.6,
                needs: vec!["time_comparison".to_string()],
            };
        }
        if AGGREGATE_MARKERS.iter().any(|m| q.contains(m)) {
            return IntentResolution {
                intent: Intent::Aggregate,
                confidence: 0.6,
                needs: vec!["table_query".to_string()],
            };
        }
        if QUERY_MARKERS.iter().any(|m| q.contains(m)) {
            return IntentResolution {
                intent: Intent::QueryData,
                confidence: 0.6,
                needs: vec!["table_query".to_string()],
            };
        }
        IntentResolution {
            intent: Intent::Unknown,
            confidence: 0.2,
            needs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_beats_aggregate() {
        let r = KeywordClassifier::new().classify("ingresos vs mes anterior");
        assert_eq!(r.intent, Intent::Compare);
        assert_eq!(r.confidence, 0.6);
        assert!(r.needs.contains(&"time_comparison".to_string()));
    }

    #[test]
    fn test_aggregate_and_query_markers() {
        let r = KeywordClassifier::new().classify("¿cuántos pedidos?");
        assert_eq!(r.intent, Intent::Aggregate);
        let r = KeywordClassifier::new().classify("muestra los pedidos");
        assert_eq!(r.intent, Intent::QueryData);
    }

    #[test]
    fn test_unknown_has_floor_confidence() {
        let r = KeywordClassifier::new().classify("hola");
        assert_eq!(r.intent, Intent::Unknown);
        assert_eq!(r.confidence, 0.2);
        assert!(r.needs.is_empty());
    }
}
