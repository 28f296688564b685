use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::section::Section;

const FALLBACK_SUMMARY_CHARS: usize = 400;

#[derive(Clone)]
pub struct SectionSummarizer {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    system: String,
    prompt: String,
    stream: bool,
    format: String,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    response: String,
}

/// Structured summary of one section, embedded into the section-summary
/// index and used by guide search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionSummary {
    pub section_id: String,
    pub title: String,
    pub summary: String,
    pub subjects: Vec<String>,
    pub key_topics: Vec<String>,
    /// True when the LLM response could not be parsed and the summary is
    /// just truncated section text. Retrieval metrics read this.
    pub is_fallback: bool,
}

#[derive(Deserialize)]
struct SummaryPayload {
    summary: String,
    #[serde(default)]
    subjects: Vec<String>,
    #[serde(default)]
    key_topics: Vec<String>,
}

impl SectionSummarizer {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }

    /// Summarize one section. Independent per section; failures to parse
    /// the model output degrade to a truncated-text summary rather than
    /// failing the section.
    pub async fn summarize(&self, section: &Section) -> Result<SectionSummary> {
        let prompt = build_summary_prompt(&section.title, &section.content);

        let response = self
            .generate(&prompt)
            .await
            .context("Failed to request section summary")?;

        match parse_summary(&response) {
            Some(payload) => Ok(SectionSummary {
                section_id: section.section_id.clone(),
                title: section.title.clone(),
                summary: payload.summary,
                subjects: payload.subjects,
                key_topics: payload.key_topics,
                is_fallback: false,
            }),
            None => {
                warn!(
                    section_id = %section.section_id,
                    "Unparsable summary response, falling back to truncated text"
                );
                Ok(fallback_summary(section))
            }
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = ChatRequest {
            model: self.model.clone(),
            system: "You summarize sections of technical documents. Output only JSON."
                .to_string(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json".to_string(),
            options: ChatOptions {
                temperature: 0.1,
                num_predict: 512,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send summary request")?;

        if !response.status().is_success() {
            anyhow::bail!("Summary request failed: {}", response.status());
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse summary response body")?;

        Ok(chat_response.response)
    }
}

fn build_summary_prompt(title: &str, content: &str) -> String {
    format!(
        r#"Summarize the following document section.

Return ONLY a JSON object with this shape:
{{
  "summary": "comprehensive summary of the section",
  "subjects": ["main subject 1", "main subject 2"],
  "key_topics": ["topic 1", "topic 2", "topic 3"]
}}

SECTION TITLE: {}

SECTION TEXT:
{}

JSON OUTPUT:"#,
        title, content
    )
}

fn parse_summary(response: &str) -> Option<SummaryPayload> {
    let cleaned = crate::strip_code_fences(response);
    serde_json::from_str::<SummaryPayload>(cleaned.trim()).ok()
}

/// Heuristic summary used when the model output is unusable: the first
/// FALLBACK_SUMMARY_CHARS of the section, cut at a char boundary.
pub fn fallback_summary(section: &Section) -> SectionSummary {
    let text = section.content.trim();
    let mut cut = text.len().min(FALLBACK_SUMMARY_CHARS);
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }

    SectionSummary {
        section_id: section.section_id.clone(),
        title: section.title.clone(),
        summary: text[..cut].to_string(),
        subjects: Vec::new(),
        key_topics: vec![section.title.clone()],
        is_fallback: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::Section;

    #[test]
    fn test_parse_summary_accepts_plain_json() {
        let payload = parse_summary(
            r#"{"summary": "s", "subjects": ["a"], "key_topics": ["t1", "t2"]}"#,
        )
        .unwrap();

        assert_eq!(payload.summary, "s");
        assert_eq!(payload.key_topics.len(), 2);
    }

    #[test]
    fn test_parse_summary_accepts_fenced_json() {
        let fenced = "```json\n{\"summary\": \"s\", \"subjects\": [], \"key_topics\": []}\n```";
        assert!(parse_summary(fenced).is_some());
    }

    #[test]
    fn test_parse_summary_rejects_prose() {
        assert!(parse_summary("The section is about transformers.").is_none());
    }

    #[test]
    fn test_fallback_is_flagged_and_truncated() {
        let mut section = Section::new("doc", 0, "Cooling", 2);
        section.content = "x".repeat(2000);

        let summary = fallback_summary(&section);

        assert!(summary.is_fallback);
        assert_eq!(summary.summary.len(), FALLBACK_SUMMARY_CHARS);
        assert_eq!(summary.key_topics, vec!["Cooling".to_string()]);
    }
}
