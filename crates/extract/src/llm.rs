use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Client for the language-model collaborator. The request shape is
/// system prompt + user prompt + sampling options; the response is plain
/// text that the callers parse per their own prompt contract.
#[derive(Clone)]
pub struct LlmClient {
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    system: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl LlmClient {
    pub fn new(base_url: String, model: String, temperature: f32, max_tokens: u32) -> Self {
        Self {
            base_url,
            model,
            temperature,
            max_tokens,
            client: reqwest::Client::new(),
        }
    }

    pub async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: self.model.clone(),
            system: system_prompt.to_string(),
            prompt: user_prompt.to_string(),
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send LLM request")?;

        if !response.status().is_success() {
            anyhow::bail!("LLM request failed: {}", response.status());
        }

        let body: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse LLM response body")?;

        Ok(body.response)
    }
}

/// Locate the outermost JSON object in a model response, tolerating code
/// fences and leading/trailing prose. Returns None when no balanced
/// object is present.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let cleaned = strip_code_fences(text);

    let start = cleaned.find('{')?;
    let bytes = cleaned.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&cleaned[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
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
    fn test_extract_plain_object() {
        assert_eq!(extract_json_object(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn test_extract_fenced_object() {
        let text = "```json\n{\"entities\": []}\n```";
        assert_eq!(extract_json_object(text), Some("{\"entities\": []}"));
    }

    #[test]
    fn test_extract_object_with_surrounding_prose() {
        let text = "Here is the result: {\"a\": {\"b\": 2}} hope that helps";
        assert_eq!(extract_json_object(text), Some("{\"a\": {\"b\": 2}}"));
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_depth() {
        let text = r#"{"note": "a } inside", "n": 1}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn test_no_object_returns_none() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{unclosed"), None);
    }
}
