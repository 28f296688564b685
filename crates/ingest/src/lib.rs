pub mod hierarchy;
pub mod section;
pub mod summarizer;

pub use hierarchy::HierarchyExtractor;
pub use section::{Document, Section};
pub use summarizer::{SectionSummarizer, SectionSummary};

/// Strip markdown code fences from a model response, leaving the fenced
/// body. Responses frequently arrive as ```json ... ``` despite the
/// prompt asking for raw JSON.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();

    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Skip an optional language tag on the opening fence line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };

    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }
}
