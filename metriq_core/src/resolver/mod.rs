//! Semantic resolution: mapping natural-language questions onto canonical
//! dictionary metrics.
//!
//! Resolution is fuzzy but closed: a question either lands on a dictionary
//! metric above the acceptance threshold or fails with a typed error carrying
//! near-miss suggestions. The resolver never invents a metric and never
//! silently picks one of two near-tied candidates.

pub mod fuzzy;
pub mod ranking;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dictionary::Dictionary;
use crate::error::{ResolveError, Suggestion};
use crate::intent::Intent;
use crate::plan::{MetricMatch, PeriodToken, PlanOperation, ResolvedPlan, TimeGrain};

/// Minimum combined score for a metric to be accepted.
const ACCEPT_THRESHOLD: f64 = 85.0;
/// Two candidates above the threshold, closer than this, are ambiguous.
const AMBIGUITY_MARGIN: f64 = 3.0;
/// How many near-misses a failure carries back to the caller.
const SUGGESTION_LIMIT: usize = 5;
/// Context boosts only apply to candidates already scoring at least this.
const BOOST_FLOOR: f64 = 70.0;

const METRIC_BOOST: f64 = 3.0;
const TABLE_BOOST: f64 = 1.5;

/// Filler words excluded from candidate phrases. The whole-question phrase
/// keeps them so multi-word aliases like "numero de pedidos" still line up.
const STOPWORDS: &[&str] = &[
    "el", "la", "los", "las", "un", "una", "de", "del", "en", "por", "para",
    "con", "que", "cual", "cuanto", "cuantos", "cuanta", "cuantas", "como",
    "este", "esta", "estos", "estas", "mes", "dia", "semana", "the", "a",
    "an", "of", "in", "on", "for", "what", "how", "many", "much", "show",
    "me", "dame", "dime", "muestra", "ver", "fue", "son", "es", "was",
    "were", "is", "are", "mi", "mis", "tus", "nuestro", "nuestra",
];

/// Carry-over state from the previous successful resolution, used to bias
/// follow-up questions toward the same metric or table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub last_metric: Option<String>,
    pub last_table: Option<String>,
}

/// One resolution request.
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    pub question: String,
    pub context: Option<ConversationContext>,
    /// Caller-classified intent. When absent, comparison wording in the
    /// question decides whether period-comparison fields attach.
    pub intent: Option<Intent>,
    /// When set, the resolved metric's table must be in this list.
    pub available_tables: Option<Vec<String>>,
    /// Column names per available table, consulted by ranking detection
    /// for tables the dictionary does not describe.
    pub table_schemas: Option<BTreeMap<String, Vec<String>>>,
}

impl ResolveRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            context: None,
            intent: None,
            available_tables: None,
            table_schemas: None,
        }
    }

    pub fn with_context(mut self, context: ConversationContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }
}

#[derive(Debug, Clone)]
struct ScoredCandidate {
    metric: String,
    base_score: f64,
    boost: f64,
    boost_reasons: Vec<String>,
    alias: String,
    phrase: String,
}

impl ScoredCandidate {
    /// Base score plus context boost, capped at 100.
    fn total(&self) -> f64 {
        (self.base_score + self.boost).min(100.0)
    }
}

#[derive(Debug, PartialEq)]
enum Decision {
    Resolved(usize),
    Ambiguous(Vec<usize>),
    Unresolved,
}

/// Pick a winner from candidates sorted descending by total score.
fn decide(totals: &[f64], threshold: f64, margin: f64) -> Decision {
    let Some(&top) = totals.first() else {
        return Decision::Unresolved;
    };
    if top < threshold {
        return Decision::Unresolved;
    }
    let contenders: Vec<usize> = totals
        .iter()
        .enumerate()
        .filter(|(_, &s)| s >= threshold && top - s <= margin)
        .map(|(i, _)| i)
        .collect();
    if contenders.len() > 1 {
        Decision::Ambiguous(contenders)
    } else {
        Decision::Resolved(0)
    }
}

pub struct SemanticResolver {
    dictionary: Arc<Dictionary>,
    /// (lowercased alias, canonical metric name), names included as aliases.
    alias_index: Vec<(String, String)>,
}

impl SemanticResolver {
    pub fn new(dictionary: Arc<Dictionary>) -> Self {
        let mut alias_index = Vec::new();
        for name in dictionary.list_metrics(None) {
            let metric = dictionary
                .get_metric(name)
                .expect("listed metric must exist");
            alias_index.push((name.replace('_', " "), name.to_string()));
            for alias in &metric.aliases {
                alias_index.push((alias.to_lowercase(), name.to_string()));
            }
        }
        Self {
            dictionary,
            alias_index,
        }
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// Resolve a question to a single-metric plan.
    pub fn resolve(&self, request: &ResolveRequest) -> Result<ResolvedPlan, ResolveError> {
        let normalized = normalize(&request.question);

        if let Some(plan) = ranking::detect(&normalized, &self.dictionary, request) {
            debug!(question = %request.question, "resolved as ranking query");
            return self.check_table(plan, request);
        }

        let phrases = candidate_phrases(&normalized);
        let mut candidates = self.score_phrases(&phrases);
        self.apply_context_boost(&mut candidates, &normalized, request.context.as_ref());

        let mut ranked: Vec<ScoredCandidate> = candidates.into_values().collect();
        ranked.sort_by(|a, b| {
            b.total()
                .partial_cmp(&a.total())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let totals: Vec<f64> = ranked.iter().map(|c| c.total()).collect();

        match decide(&totals, ACCEPT_THRESHOLD, AMBIGUITY_MARGIN) {
            Decision::Unresolved => Err(ResolveError::UnresolvedMetric {
                question: request.question.clone(),
                suggestions: suggestions(&ranked, SUGGESTION_LIMIT),
            }),
            Decision::Ambiguous(indices) => Err(ResolveError::AmbiguousMetric {
                question: request.question.clone(),
                candidates: indices
                    .into_iter()
                    .map(|i| Suggestion {
                        metric: ranked[i].metric.clone(),
                        score: ranked[i].total(),
                        alias_matched: ranked[i].alias.clone(),
                    })
                    .collect(),
            }),
            Decision::Resolved(i) => {
                let winner = &ranked[i];
                debug!(
                    metric = %winner.metric,
                    score = winner.total(),
                    phrase = %winner.phrase,
                    "metric resolved"
                );
                let plan = self.build_plan(winner, &normalized, compare_intent(request, &normalized));
                self.check_table(plan, request)
            }
        }
    }

    fn score_phrases(&self, phrases: &[String]) -> HashMap<String, ScoredCandidate> {
        let mut best: HashMap<String, ScoredCandidate> = HashMap::new();
        for phrase in phrases {
            for (alias, metric) in &self.alias_index {
                let score = fuzzy::weighted_ratio(phrase, alias);
                let entry = best.get(metric);
                if entry.map_or(true, |c| score > c.base_score) {
                    best.insert(
                        metric.clone(),
                        ScoredCandidate {
                            metric: metric.clone(),
                            base_score: score,
                            boost: 0.0,
                            boost_reasons: Vec::new(),
                            alias: alias.clone(),
                            phrase: phrase.clone(),
                        },
                    );
                }
            }
        }
        best
    }

    fn apply_context_boost(
        &self,
        candidates: &mut HashMap<String, ScoredCandidate>,
        normalized: &str,
        context: Option<&ConversationContext>,
    ) {
        let Some(ctx) = context else { return };
        if !is_followup(normalized) {
            return;
        }
        for candidate in candidates.values_mut() {
            if candidate.base_score < BOOST_FLOOR {
                continue;
            }
            if ctx.last_metric.as_deref() == Some(candidate.metric.as_str()) {
                candidate.boost += METRIC_BOOST;
                candidate
                    .boost_reasons
                    .push("same metric as previous question".to_string());
            }
            if let Ok(metric) = self.dictionary.get_metric(&candidate.metric) {
                if ctx.last_table.as_deref() == Some(metric.table.as_str()) {
                    candidate.boost += TABLE_BOOST;
                    candidate
                        .boost_reasons
                        .push("same table as previous question".to_string());
                }
            }
        }
    }

    fn build_plan(
        &self,
        winner: &ScoredCandidate,
        normalized: &str,
        compare: bool,
    ) -> ResolvedPlan {
        let metric = self
            .dictionary
            .get_metric(&winner.metric)
            .expect("winning candidate comes from the dictionary");
        let table = self
            .dictionary
            .get_table(&metric.table)
            .expect("dictionary validated metric tables at load");

        // Period handling needs a declared time column on the table.
        let (baseline, compare) = if table.time_column.is_some() {
            infer_periods(normalized, compare)
        } else {
            (None, None)
        };
        let mut time_grain = infer_grain(normalized);
        // Comparisons need a bucket per period, so the period token's own
        // grain applies when the question names none.
        if time_grain.is_none() && compare.is_some() {
            time_grain = baseline.map(grain_of);
        }
        let needs_time = time_grain.is_some() || baseline.is_some();

        // A time grain turns into a group-by on the derived bucket column.
        let group_by = match (time_grain, &table.time_column) {
            (Some(grain), Some(col)) => vec![format!("{}__{}", col, grain.suffix())],
            _ => Vec::new(),
        };

        ResolvedPlan {
            tables: vec![metric.table.clone()],
            metrics: vec![MetricMatch {
                name: metric.name.clone(),
                alias_matched: winner.alias.clone(),
                expression: metric.expression.clone(),
                requires: metric.requires.clone(),
                filters: metric.filters.clone(),
                format: metric.format.clone(),
                match_score: winner.total(),
                base_score: winner.base_score,
                context_boost: winner.boost,
                context_boost_reasons: winner.boost_reasons.clone(),
                matched_phrase: winner.phrase.clone(),
            }],
            filters: metric.filters.clone(),
            group_by,
            order_by: Vec::new(),
            limit: None,
            time_column: if needs_time {
                table.time_column.clone()
            } else {
                None
            },
            time_grain,
            baseline_period: baseline,
            compare_period: compare,
            confidence: confidence(winner, normalized),
            operation: PlanOperation::Aggregate,
            dictionary_version: self.dictionary.version.clone(),
        }
    }

    fn check_table(
        &self,
        plan: ResolvedPlan,
        request: &ResolveRequest,
    ) -> Result<ResolvedPlan, ResolveError> {
        if let Some(available) = &request.available_tables {
            for table in &plan.tables {
                if !available.contains(table) {
                    return Err(ResolveError::NoTableMatch {
                        table: table.clone(),
                        available_tables: available.clone(),
                    });
                }
            }
        }
        Ok(plan)
    }
}

fn suggestions(ranked: &[ScoredCandidate], limit: usize) -> Vec<Suggestion> {
    ranked
        .iter()
        .take(limit)
        .map(|c| Suggestion {
            metric: c.metric.clone(),
            score: c.total(),
            alias_matched: c.alias.clone(),
        })
        .collect()
}

/// Confidence is the match score on a 0..=1 scale with small deductions for
/// match shapes that historically produce false positives.
fn confidence(winner: &ScoredCandidate, whole_question: &str) -> f64 {
    let total = winner.total();
    let mut confidence = total / 100.0;
    if winner.alias.chars().count() <= 5 {
        confidence -= 0.05;
    }
    if total >= 99.5 && winner.phrase.chars().count() <= 10 {
        confidence -= 0.05;
    }
    if winner.phrase != whole_question {
        confidence -= 0.03;
    }
    if winner.boost > 0.0 {
        confidence -= (0.06 + winner.boost / 100.0).min(0.18);
    }
    confidence.clamp(0.0, 1.0)
}

/// Lowercase, fold Spanish diacritics, strip punctuation, collapse spaces.
pub(crate) fn normalize(question: &str) -> String {
    let folded: String = question
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            c if c.is_alphanumeric() => c,
            _ => ' ',
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The phrases matched against the alias index: the whole question, then
/// content-word unigrams (length >= 3), bigrams, and trigrams.
fn candidate_phrases(normalized: &str) -> Vec<String> {
    let content: Vec<&str> = normalized
        .split_whitespace()
        .filter(|t| !STOPWORDS.contains(t))
        .collect();
    let mut phrases = vec![normalized.to_string()];
    for token in &content {
        if token.chars().count() >= 3 {
            phrases.push(token.to_string());
        }
    }
    for window in content.windows(2) {
        phrases.push(window.join(" "));
    }
    for window in content.windows(3) {
        phrases.push(window.join(" "));
    }
    let mut seen = HashSet::new();
    phrases.retain(|p| seen.insert(p.clone()));
    phrases
}

/// Short questions and continuation wordings are treated as follow-ups.
fn is_followup(normalized: &str) -> bool {
    normalized.chars().count() <= 14
        || normalized.starts_with("y ")
        || normalized.contains("lo mismo")
        || normalized.contains("tambien")
        || normalized.contains("ahora")
        || normalized.contains("que tal")
        || normalized.contains("how about")
}

fn infer_grain(normalized: &str) -> Option<TimeGrain> {
    if normalized.contains("por dia")
        || normalized.contains("diario")
        || normalized.contains("daily")
        || normalized.contains("by day")
    {
        Some(TimeGrain::Day)
    } else if normalized.contains("por semana")
        || normalized.contains("semanal")
        || normalized.contains("weekly")
        || normalized.contains("by week")
    {
        Some(TimeGrain::Week)
    } else if normalized.contains("por mes")
        || normalized.contains("mensual")
        || normalized.contains("monthly")
        || normalized.contains("by month")
    {
        Some(TimeGrain::Month)
    } else {
        None
    }
}

/// Does the caller want a period comparison? An explicit intent wins;
/// otherwise comparison wording in the question decides.
fn compare_intent(request: &ResolveRequest, normalized: &str) -> bool {
    match request.intent {
        Some(Intent::Compare) => true,
        Some(Intent::Unknown) | None => has_compare_wording(normalized),
        Some(_) => false,
    }
}

fn has_compare_wording(normalized: &str) -> bool {
    normalized.contains(" vs ")
        || normalized.ends_with(" vs")
        || normalized.contains("comparado")
        || normalized.contains("comparar")
        || normalized.contains("compared")
        || normalized.contains("frente a")
}

/// Map period wording to a baseline token and, when comparing, a full
/// (baseline, compare) pair. A comparison never leaves the compare side
/// empty: a lone "mes pasado" pairs with the current month.
fn infer_periods(normalized: &str, compare: bool) -> (Option<PeriodToken>, Option<PeriodToken>) {
    let baseline = if normalized.contains("hoy") || normalized.contains("today") {
        Some(PeriodToken::CurrentDay)
    } else if normalized.contains("ayer") || normalized.contains("yesterday") {
        Some(PeriodToken::PreviousDay)
    } else if normalized.contains("esta semana") || normalized.contains("this week") {
        Some(PeriodToken::CurrentWeek)
    } else if normalized.contains("semana pasada") || normalized.contains("last week") {
        Some(PeriodToken::PreviousWeek)
    } else if normalized.contains("este mes") || normalized.contains("this month") {
        Some(PeriodToken::CurrentMonth)
    } else if normalized.contains("mes pasado")
        || normalized.contains("mes anterior")
        || normalized.contains("last month")
    {
        Some(PeriodToken::PreviousMonth)
    } else {
        None
    };

    let wants_year_ago = normalized.contains("ano pasado") || normalized.contains("last year");
    if !compare && !wants_year_ago {
        return (baseline, None);
    }

    match (baseline, wants_year_ago) {
        (Some(base), true) => (Some(base), Some(PeriodToken::SameMonthLastYear)),
        (None, true) => (
            Some(PeriodToken::CurrentMonth),
            Some(PeriodToken::SameMonthLastYear),
        ),
        (Some(base), false) => (Some(base), Some(counterpart_of(base))),
        (None, false) => (
            Some(PeriodToken::CurrentMonth),
            Some(PeriodToken::PreviousMonth),
        ),
    }
}

fn grain_of(token: PeriodToken) -> TimeGrain {
    match token {
        PeriodToken::CurrentDay | PeriodToken::PreviousDay => TimeGrain::Day,
        PeriodToken::CurrentWeek | PeriodToken::PreviousWeek => TimeGrain::Week,
        PeriodToken::CurrentMonth
        | PeriodToken::PreviousMonth
        | PeriodToken::SameMonthLastYear => TimeGrain::Month,
    }
}

/// The other half of a comparison pair for a single named period.
fn counterpart_of(token: PeriodToken) -> PeriodToken {
    match token {
        PeriodToken::CurrentDay => PeriodToken::PreviousDay,
        PeriodToken::PreviousDay => PeriodToken::CurrentDay,
        PeriodToken::CurrentWeek => PeriodToken::PreviousWeek,
        PeriodToken::PreviousWeek => PeriodToken::CurrentWeek,
        PeriodToken::CurrentMonth => PeriodToken::PreviousMonth,
        PeriodToken::PreviousMonth | PeriodToken::SameMonthLastYear => PeriodToken::CurrentMonth,
    }
}
