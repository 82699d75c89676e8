//! Query classification.
//!
//! Tags a query as structured (temporal, aggregation, filtering or ordering
//! language, concrete dates), semantic (conceptual or definitional phrasing),
//! both, or neither. The tag is advisory: callers use it to pick tools and a
//! retrieval strategy.
//!
//! Some vocabulary is shared between the two sets ("difference between"
//! contains "between"), so a conceptual question can come back as `Hybrid`
//! instead of `Semantic`. Both answers are acceptable for such inputs.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Classification tag for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryClassification {
    Structured,
    Semantic,
    Hybrid,
    Unknown,
}

impl QueryClassification {
    pub const ALL: [QueryClassification; 4] = [
        QueryClassification::Structured,
        QueryClassification::Semantic,
        QueryClassification::Hybrid,
        QueryClassification::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryClassification::Structured => "structured",
            QueryClassification::Semantic => "semantic",
            QueryClassification::Hybrid => "hybrid",
            QueryClassification::Unknown => "unknown",
        }
    }
}

impl fmt::Display for QueryClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Temporal references, aggregation verbs, filter and ordering language.
const STRUCTURED_TERMS: &[&str] = &[
    // temporal
    "today",
    "yesterday",
    "tomorrow",
    "last week",
    "last month",
    "last year",
    "this week",
    "this month",
    "this year",
    "recent",
    "recently",
    "latest",
    "since",
    "before",
    "after",
    "between",
    "during",
    "ago",
    // aggregation
    "how many",
    "how much",
    "count",
    "total",
    "sum",
    "average",
    "mean",
    "maximum",
    "minimum",
    "number of",
    "top",
    // filtering and ordering
    "where",
    "filter",
    "filtered",
    "sort",
    "sorted",
    "order by",
    "ordered by",
    "greater than",
    "less than",
    "more than",
    "fewer than",
    "at least",
    "at most",
    "list all",
    "show all",
    "ranked",
];

/// Conceptual and definitional phrasing.
const SEMANTIC_TERMS: &[&str] = &[
    "what is",
    "what are",
    "what's",
    "explain",
    "tell me about",
    "describe",
    "how does",
    "how do",
    "why",
    "meaning of",
    "definition",
    "define",
    "overview",
    "concept",
    "understand",
    "difference between",
    "similar to",
];

/// Concrete dates and periods.
const DATE_PATTERNS: &[&str] = &[
    r"\b\d{4}-\d{1,2}-\d{1,2}\b",
    r"\b\d{1,2}/\d{1,2}/\d{2,4}\b",
    r"\b(19|20)\d{2}\b",
    r"\bq[1-4]\b",
    r"\b(january|february|march|april|june|july|august|september|october|november|december)\s+\d{1,2}(st|nd|rd|th)?\b",
    r"\b\d{1,2}(st|nd|rd|th)?\s+(january|february|march|april|may|june|july|august|september|october|november|december)\b",
];

fn date_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        DATE_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// How many indicators of each kind a query hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndicatorHits {
    pub structured: Vec<String>,
    pub semantic: Vec<String>,
}

impl IndicatorHits {
    pub fn classification(&self) -> QueryClassification {
        match (self.structured.is_empty(), self.semantic.is_empty()) {
            (false, true) => QueryClassification::Structured,
            (true, false) => QueryClassification::Semantic,
            (false, false) => QueryClassification::Hybrid,
            (true, true) => QueryClassification::Unknown,
        }
    }
}

/// Score a query against both indicator sets (case-insensitive).
pub fn indicator_hits(text: &str) -> IndicatorHits {
    let lower = text.to_lowercase();

    let mut structured: Vec<String> = STRUCTURED_TERMS
        .iter()
        .filter(|term| contains_term(&lower, term))
        .map(|term| term.to_string())
        .collect();

    structured.extend(
        date_patterns()
            .iter()
            .filter_map(|re| re.find(&lower))
            .map(|m| m.as_str().to_string()),
    );

    let semantic = SEMANTIC_TERMS
        .iter()
        .filter(|term| contains_term(&lower, term))
        .map(|term| term.to_string())
        .collect();

    IndicatorHits {
        structured,
        semantic,
    }
}

/// Classify a query.
pub fn classify(text: &str) -> QueryClassification {
    let classification = indicator_hits(text).classification();
    tracing::trace!(%classification, "Classified query");
    classification
}

/// Tools worth offering for a classification, most useful first.
pub fn recommend_tools(classification: QueryClassification) -> &'static [&'static str] {
    match classification {
        QueryClassification::Structured => &["sql_query", "metadata_filter", "vector_search"],
        QueryClassification::Semantic => &["vector_search", "knowledge_graph"],
        QueryClassification::Hybrid => &[
            "vector_search",
            "sql_query",
            "metadata_filter",
            "knowledge_graph",
        ],
        QueryClassification::Unknown => &["vector_search"],
    }
}

/// Human-readable retrieval strategy for a classification.
pub fn describe(classification: QueryClassification) -> &'static str {
    match classification {
        QueryClassification::Structured => {
            "Structured query: answer from filtered, sorted or aggregated records"
        }
        QueryClassification::Semantic => {
            "Semantic query: answer from the most similar passages in the knowledge base"
        }
        QueryClassification::Hybrid => {
            "Hybrid query: narrow records with structured filters, then rank passages by similarity"
        }
        QueryClassification::Unknown => {
            "Unclassified query: fall back to similarity search over linked collections"
        }
    }
}

/// Substring match that only accepts hits on word boundaries.
fn contains_term(haystack: &str, term: &str) -> bool {
    haystack.match_indices(term).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + term.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_date_patterns_compile() {
        assert_eq!(date_patterns().len(), DATE_PATTERNS.len());
    }

    #[test]
    fn test_structured_queries() {
        assert_eq!(
            classify("How many orders were placed last month?"),
            QueryClassification::Structured
        );
        assert_eq!(
            classify("List all tickets sorted by priority"),
            QueryClassification::Structured
        );
        assert_eq!(
            classify("Invoices from 2024-03-15"),
            QueryClassification::Structured
        );
    }

    #[test]
    fn test_semantic_queries() {
        assert_eq!(
            classify("What is retrieval augmented generation?"),
            QueryClassification::Semantic
        );
        assert_eq!(
            classify("Explain the refund policy"),
            QueryClassification::Semantic
        );
        assert_eq!(
            classify("TELL ME ABOUT your onboarding"),
            QueryClassification::Semantic
        );
    }

    #[test]
    fn test_hybrid_query() {
        assert_eq!(
            classify("Explain the sales trend since January 5"),
            QueryClassification::Hybrid
        );
    }

    #[test]
    fn test_unknown_query() {
        assert_eq!(classify("hello there"), QueryClassification::Unknown);
        assert_eq!(classify(""), QueryClassification::Unknown);
    }

    #[test]
    fn test_overlapping_vocabulary_is_semantic_or_hybrid() {
        let result = classify("What is the difference between TCP and UDP?");
        assert!(
            matches!(
                result,
                QueryClassification::Semantic | QueryClassification::Hybrid
            ),
            "unexpected classification {:?}",
            result
        );
    }

    #[test]
    fn test_word_boundaries() {
        // "summary" must not trigger "sum", "topic" must not trigger "top"
        assert_eq!(
            classify("summary of the topic"),
            QueryClassification::Unknown
        );
        assert!(contains_term("the top results", "top"));
        assert!(!contains_term("stopwatch", "top"));
    }

    #[test]
    fn test_tools_and_descriptions_are_total() {
        for classification in QueryClassification::ALL {
            assert!(!recommend_tools(classification).is_empty());
            assert!(!describe(classification).is_empty());
        }
        assert_eq!(
            recommend_tools(QueryClassification::Structured)[0],
            "sql_query"
        );
        assert_eq!(
            recommend_tools(QueryClassification::Semantic)[0],
            "vector_search"
        );
    }
}
