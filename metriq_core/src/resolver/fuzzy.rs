//! Fuzzy string scoring for alias matching.
//!
//! Scores are on a 0..=100 scale. `weighted_ratio` is the scorer the
//! resolver uses: plain indel similarity, token-order-insensitive
//! similarity, and a discounted substring similarity when the two inputs
//! differ enough in length that a window match is meaningful.

/// Longest common subsequence length, rolling single-row DP.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Indel similarity: 100 * (1 - indel_distance / (len_a + len_b)).
pub fn ratio(a: &str, b: &str) -> f64 {
    let ac: Vec<char> = a.chars().collect();
    let bc: Vec<char> = b.chars().collect();
    let total = ac.len() + bc.len();
    if total == 0 {
        return 100.0;
    }
    let lcs = lcs_len(&ac, &bc);
    100.0 * (2.0 * lcs as f64) / total as f64
}

/// `ratio` after sorting whitespace-separated tokens, so word order
/// does not matter ("totales ingresos" ~ "ingresos totales").
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sort_tokens(a), &sort_tokens(b))
}

fn sort_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Best `ratio` of the shorter string against every contiguous window of
/// the longer string with the shorter string's length.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let ac: Vec<char> = a.chars().collect();
    let bc: Vec<char> = b.chars().collect();
    let (short, long) = if ac.len() <= bc.len() { (&ac, &bc) } else { (&bc, &ac) };
    if short.is_empty() {
        return if long.is_empty() { 100.0 } else { 0.0 };
    }
    if short.len() == long.len() {
        return ratio(a, b);
    }
    let mut best = 0.0f64;
    for start in 0..=(long.len() - short.len()) {
        let window = &long[start..start + short.len()];
        let lcs = lcs_len(short, window);
        let score = 100.0 * (2.0 * lcs as f64) / (2.0 * short.len() as f64);
        if score > best {
            best = score;
        }
        if best >= 100.0 {
            break;
        }
    }
    best
}

/// Combined scorer. Substring matching only participates, discounted,
/// when one input is at least 1.5x longer than the other; otherwise a
/// short alias buried in a long question would score too generously.
pub fn weighted_ratio(a: &str, b: &str) -> f64 {
    let plain = ratio(a, b);
    let sorted = token_sort_ratio(a, b);
    let mut best = plain.max(sorted);
    let (la, lb) = (a.chars().count().max(1), b.chars().count().max(1));
    let len_ratio = la.max(lb) as f64 / la.min(lb) as f64;
    if len_ratio >= 1.5 {
        best = best.max(partial_ratio(a, b) * 0.9);
    }
    best
}

/// Score `query` against every choice and return the best `limit` matches,
/// highest first.
pub fn extract(query: &str, choices: &[String], limit: usize) -> Vec<(String, f64)> {
    let mut scored: Vec<(String, f64)> = choices
        .iter()
        .map(|c| (c.clone(), weighted_ratio(query, c)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}
