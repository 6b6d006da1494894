//! String similarity and distance algorithms.
//!
//! The catalog is closed: every algorithm is a variant of [`Algorithm`] carrying its own
//! threshold, and [`AlgorithmSet`] keeps at most one configured instance per
//! [`AlgorithmKind`], iterated in kind order.

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Score reported by Hamming when the two inputs differ in length.
pub const HAMMING_LENGTH_MISMATCH: i64 = -1;

/// Word tokens for cosine distance (ASCII word characters, like a `\w+` tokenizer).
static WORD_TOKENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9_]+").unwrap());

// ============================================================================
// Kinds and Scores
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum AlgorithmKind {
    JaroDistance,
    LevenshteinDistance,
    HammingDistance,
    JaccardDistance,
    CosineDistance,
    FuzzySimilarity,
}

/// Numeric type an algorithm reports its score in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Integer,
    Real,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 6] = [
        AlgorithmKind::JaroDistance,
        AlgorithmKind::LevenshteinDistance,
        AlgorithmKind::HammingDistance,
        AlgorithmKind::JaccardDistance,
        AlgorithmKind::CosineDistance,
        AlgorithmKind::FuzzySimilarity,
    ];

    pub fn numeric_kind(self) -> NumericKind {
        match self {
            AlgorithmKind::LevenshteinDistance
            | AlgorithmKind::HammingDistance
            | AlgorithmKind::FuzzySimilarity => NumericKind::Integer,
            AlgorithmKind::JaroDistance
            | AlgorithmKind::JaccardDistance
            | AlgorithmKind::CosineDistance => NumericKind::Real,
        }
    }

    /// Column holding this kind's score in the persisted score table
    pub fn column_name(self) -> &'static str {
        match self {
            AlgorithmKind::JaroDistance => "jaro_distance",
            AlgorithmKind::LevenshteinDistance => "levenshtein_distance",
            AlgorithmKind::HammingDistance => "hamming_distance",
            AlgorithmKind::JaccardDistance => "jaccard_distance",
            AlgorithmKind::CosineDistance => "cosine_distance",
            AlgorithmKind::FuzzySimilarity => "fuzzy_similarity",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlgorithmKind::JaroDistance => "Jaro Distance",
            AlgorithmKind::LevenshteinDistance => "Levenshtein Distance",
            AlgorithmKind::HammingDistance => "Hamming Distance",
            AlgorithmKind::JaccardDistance => "Jaccard Distance",
            AlgorithmKind::CosineDistance => "Cosine Distance",
            AlgorithmKind::FuzzySimilarity => "Fuzzy Similarity",
        };
        f.write_str(name)
    }
}

/// A score in the algorithm's declared numeric type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Score {
    Integer(i64),
    Real(f64),
}

impl Score {
    pub fn as_f64(self) -> f64 {
        match self {
            Score::Integer(v) => v as f64,
            Score::Real(v) => v,
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Integer(v) => write!(f, "{}", v),
            Score::Real(v) => write!(f, "{}", v),
        }
    }
}

// ============================================================================
// Algorithms
// ============================================================================

/// A configured algorithm with its qualification threshold.
///
/// | Variant | Score | Qualifies when |
/// |---|---|---|
/// | `JaroDistance` | Jaro-Winkler similarity x 100 | score >= threshold |
/// | `LevenshteinDistance` | edit distance | score <= threshold |
/// | `HammingDistance` | length - differing positions, `-1` on length mismatch | score >= threshold, never on mismatch |
/// | `JaccardDistance` | 1 - Jaccard index of character sets | score <= threshold |
/// | `CosineDistance` | (1 - cosine similarity of word counts) x 100 | score <= threshold |
/// | `FuzzySimilarity` | fuzzy subsequence score | score >= threshold |
#[derive(Debug, Clone, PartialEq)]
pub enum Algorithm {
    JaroDistance { threshold: f64 },
    LevenshteinDistance { threshold: i64 },
    HammingDistance { threshold: i64 },
    JaccardDistance { threshold: f64 },
    CosineDistance { threshold: f64 },
    FuzzySimilarity { threshold: i64 },
}

impl Algorithm {
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            Algorithm::JaroDistance { .. } => AlgorithmKind::JaroDistance,
            Algorithm::LevenshteinDistance { .. } => AlgorithmKind::LevenshteinDistance,
            Algorithm::HammingDistance { .. } => AlgorithmKind::HammingDistance,
            Algorithm::JaccardDistance { .. } => AlgorithmKind::JaccardDistance,
            Algorithm::CosineDistance { .. } => AlgorithmKind::CosineDistance,
            Algorithm::FuzzySimilarity { .. } => AlgorithmKind::FuzzySimilarity,
        }
    }

    /// Score `left` against `right`.
    pub fn apply(&self, left: &str, right: &str) -> Score {
        match self {
            Algorithm::JaroDistance { .. } => Score::Real(strsim::jaro_winkler(left, right) * 100.0),
            Algorithm::LevenshteinDistance { .. } => {
                Score::Integer(strsim::levenshtein(left, right) as i64)
            }
            Algorithm::HammingDistance { .. } => Score::Integer(hamming_matches(left, right)),
            Algorithm::JaccardDistance { .. } => Score::Real(jaccard_distance(left, right)),
            Algorithm::CosineDistance { .. } => Score::Real(cosine_distance(left, right) * 100.0),
            Algorithm::FuzzySimilarity { .. } => Score::Integer(fuzzy_score(left, right)),
        }
    }

    /// Whether `score` meets this algorithm's threshold.
    pub fn qualifies(&self, score: Score) -> bool {
        let value = score.as_f64();
        match *self {
            Algorithm::JaroDistance { threshold } => value >= threshold,
            Algorithm::LevenshteinDistance { threshold } => threshold as f64 >= value,
            Algorithm::HammingDistance { threshold } => {
                score != Score::Integer(HAMMING_LENGTH_MISMATCH) && threshold as f64 <= value
            }
            Algorithm::JaccardDistance { threshold } => threshold >= value,
            Algorithm::CosineDistance { threshold } => threshold >= value,
            Algorithm::FuzzySimilarity { threshold } => value >= threshold as f64,
        }
    }

    /// Apply and qualify in one step, tagging the result with the pair's row ids.
    pub fn evaluate<'a>(
        &self,
        left: &str,
        right: &str,
        left_row_id: &'a str,
        right_row_id: &'a str,
    ) -> AlgorithmResult<'a> {
        let score = self.apply(left, right);
        AlgorithmResult {
            kind: self.kind(),
            qualifies: self.qualifies(score),
            score,
            left_row_id,
            right_row_id,
        }
    }
}

/// Outcome of one algorithm on one row pair.
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmResult<'a> {
    pub kind: AlgorithmKind,
    pub qualifies: bool,
    pub score: Score,
    pub left_row_id: &'a str,
    pub right_row_id: &'a str,
}

impl fmt::Display for AlgorithmResult<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} scored {} for {} vs {} (qualifies: {})",
            self.kind, self.score, self.left_row_id, self.right_row_id, self.qualifies
        )
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Configured algorithms keyed by kind. Inserting a kind twice replaces the first entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlgorithmSet {
    algorithms: BTreeMap<AlgorithmKind, Algorithm>,
}

impl AlgorithmSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an algorithm, returning the one it replaced if the kind was already present.
    pub fn insert(&mut self, algorithm: Algorithm) -> Option<Algorithm> {
        self.algorithms.insert(algorithm.kind(), algorithm)
    }

    pub fn get(&self, kind: AlgorithmKind) -> Option<&Algorithm> {
        self.algorithms.get(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Algorithm> {
        self.algorithms.values()
    }

    pub fn kinds(&self) -> impl Iterator<Item = AlgorithmKind> + '_ {
        self.algorithms.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.algorithms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }
}

impl FromIterator<Algorithm> for AlgorithmSet {
    fn from_iter<I: IntoIterator<Item = Algorithm>>(iter: I) -> Self {
        let mut set = AlgorithmSet::new();
        for algorithm in iter {
            set.insert(algorithm);
        }
        set
    }
}

// ============================================================================
// Score Functions
// ============================================================================

/// Number of positions at which two equal-length strings agree.
fn hamming_matches(left: &str, right: &str) -> i64 {
    match strsim::hamming(left, right) {
        Ok(differing) => left.chars().count() as i64 - differing as i64,
        Err(_) => HAMMING_LENGTH_MISMATCH,
    }
}

/// Jaccard distance over the character sets of both strings.
fn jaccard_distance(left: &str, right: &str) -> f64 {
    if left.is_empty() || right.is_empty() {
        return 1.0;
    }

    let chars_left: FxHashSet<char> = left.chars().collect();
    let chars_right: FxHashSet<char> = right.chars().collect();

    let intersection = chars_left.intersection(&chars_right).count();
    let union = chars_left.union(&chars_right).count();

    1.0 - intersection as f64 / union as f64
}

fn term_frequencies(text: &str) -> FxHashMap<&str, usize> {
    let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
    for token in WORD_TOKENS.find_iter(text) {
        *counts.entry(token.as_str()).or_default() += 1;
    }
    counts
}

/// Cosine distance between the word-count vectors of both strings (0.0 to 1.0).
fn cosine_distance(left: &str, right: &str) -> f64 {
    let tf_left = term_frequencies(left);
    let tf_right = term_frequencies(right);

    let dot: f64 = tf_left
        .iter()
        .filter_map(|(token, &count)| tf_right.get(token).map(|&other| (count * other) as f64))
        .sum();
    let norm_left: f64 = tf_left.values().map(|&c| (c * c) as f64).sum::<f64>().sqrt();
    let norm_right: f64 = tf_right.values().map(|&c| (c * c) as f64).sum::<f64>().sqrt();

    let similarity = if norm_left <= 0.0 || norm_right <= 0.0 {
        0.0
    } else {
        dot / (norm_left * norm_right)
    };
    1.0 - similarity
}

/// Fuzzy subsequence score of `query` against `term`.
///
/// Each query character found (in order) in the term earns one point; a match directly
/// after the previous match earns two more. Comparison is case-insensitive.
fn fuzzy_score(term: &str, query: &str) -> i64 {
    let term: Vec<char> = term.to_lowercase().chars().collect();
    let query = query.to_lowercase();

    let mut score = 0;
    let mut term_index = 0;
    let mut previous_match: Option<usize> = None;

    for query_char in query.chars() {
        while term_index < term.len() {
            let position = term_index;
            term_index += 1;
            if term[position] == query_char {
                score += 1;
                if previous_match.map_or(false, |p| p + 1 == position) {
                    score += 2;
                }
                previous_match = Some(position);
                break;
            }
        }
    }

    score
}
