//! Merge ordering and prompt-ready formatting of retrieved chunks.

use crate::types::RetrievalResult;

/// Header placed above the formatted sources.
pub const CONTEXT_HEADER: &str = "Relevant information from the knowledge base:";

/// Sort by similarity, highest first. Stable; NaN sorts last.
pub fn sort_by_similarity(results: &mut [RetrievalResult]) {
    results.sort_by(|a, b| {
        let a = if a.similarity.is_nan() { f32::NEG_INFINITY } else { a.similarity };
        let b = if b.similarity.is_nan() { f32::NEG_INFINITY } else { b.similarity };
        b.total_cmp(&a)
    });
}

/// Render chunks as a numbered source list.
///
/// Each section label is `[Source N]` followed by whichever of title,
/// collection name and score are present, separated by ` | `. An empty slice
/// renders as an empty string.
pub fn format_context(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return String::new();
    }

    let sections: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let mut label = vec![format!("[Source {}]", i + 1)];

            let mut details = Vec::new();
            if let Some(title) = non_blank(result.document_title.as_deref()) {
                details.push(title.to_string());
            }
            if let Some(collection) = non_blank(Some(&result.collection_name)) {
                details.push(collection.to_string());
            }
            details.push(format!("similarity: {:.2}", result.similarity));
            label.push(details.join(" | "));

            format!("{}\n{}", label.join(" "), result.content.trim())
        })
        .collect();

    format!("{}\n\n{}", CONTEXT_HEADER, sections.join("\n\n---\n\n"))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
