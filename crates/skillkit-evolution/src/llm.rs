//! LLM-backed [`SkillProvider`].

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use skillkit_core::config::LlmConfig;
use skillkit_fs::{FileWrite, WriteAllowlist};

use crate::provider::{GenerationRequest, ProviderOutput, SkillProvider};
use crate::report::RepairReport;

const GENERATION_PROMPT: &str = include_str!("seed/skill_generation.seed.md");
const REPAIR_PROMPT: &str = include_str!("seed/skill_repair.seed.md");

const SYSTEM_PROMPT: &str =
    "You are a careful software engineer. Answer with a single JSON object and no prose.";

// ─── Completion interface ───────────────────────────────────────────────────

/// Minimal chat message (no tool calling).
#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }

    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }
}

/// Non-streaming chat completion. Returns the assistant's text content.
#[async_trait::async_trait]
pub trait CompletionLlm: Send + Sync {
    async fn complete(&self, messages: &[LlmMessage], model: &str, temperature: f64)
        -> Result<String>;
}

// ─── OpenAI-compatible client ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// `POST {api_base}/chat/completions` with a bearer key.
pub struct OpenAiCompatLlm {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl OpenAiCompatLlm {
    pub fn new(api_base: &str, api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::new(&config.api_base, &config.api_key)
    }
}

#[async_trait::async_trait]
impl CompletionLlm for OpenAiCompatLlm {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        model: &str,
        temperature: f64,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = json!({
            "model": model,
            "temperature": temperature,
            "messages": messages
                .iter()
                .map(|m| json!({"role": m.role, "content": m.content}))
                .collect::<Vec<_>>(),
        });

        let mut req = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let resp = req.send().await.context("LLM API request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            bail!("LLM API error ({}): {}", status, body_text);
        }

        let parsed: ChatCompletionResponse = resp
            .json()
            .await
            .context("Failed to parse LLM response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .context("LLM response has no content")
    }
}

// ─── Provider ───────────────────────────────────────────────────────────────

/// Renders prompts, calls the model and turns its answer into a [`ProviderOutput`].
pub struct LlmSkillProvider<L> {
    llm: L,
    model: String,
    temperature: f64,
    allowlist: WriteAllowlist,
}

impl<L: CompletionLlm> LlmSkillProvider<L> {
    pub fn new(llm: L, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature: 0.2,
            allowlist: WriteAllowlist::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_allowlist(mut self, allowlist: WriteAllowlist) -> Self {
        self.allowlist = allowlist;
        self
    }

    fn allowed_paths(&self) -> String {
        self.allowlist
            .files
            .iter()
            .cloned()
            .chain(self.allowlist.dirs.iter().map(|d| format!("{}/**", d)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn ask(&self, prompt: String) -> Result<ProviderOutput> {
        let messages = [LlmMessage::system(SYSTEM_PROMPT), LlmMessage::user(&prompt)];
        let reply = self
            .llm
            .complete(&messages, &self.model, self.temperature)
            .await?;
        parse_provider_response(&reply)
    }
}

impl LlmSkillProvider<OpenAiCompatLlm> {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(Self::new(OpenAiCompatLlm::from_config(config)?, config.model.clone()))
    }

    /// Provider for the endpoint configured in the environment.
    pub fn from_env() -> Result<Self> {
        let config = LlmConfig::try_from_env().context(
            "no LLM endpoint configured; set SKILLKIT_API_KEY (or OPENAI_API_KEY) and SKILLKIT_API_BASE",
        )?;
        Self::from_config(&config)
    }
}

#[async_trait::async_trait]
impl<L: CompletionLlm> SkillProvider for LlmSkillProvider<L> {
    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderOutput> {
        let prompt = GENERATION_PROMPT
            .replace("{{allowed_paths}}", &self.allowed_paths())
            .replace("{{instruction}}", &request.instruction)
            .replace("{{skill_dir}}", &request.skill_dir.display().to_string());
        self.ask(prompt).await
    }

    async fn repair(
        &self,
        request: &GenerationRequest,
        report: &RepairReport,
    ) -> Result<ProviderOutput> {
        let instruction = if request.instruction.trim().is_empty() {
            "(none; make the skill pass validation)"
        } else {
            request.instruction.as_str()
        };
        let prompt = REPAIR_PROMPT
            .replace("{{allowed_paths}}", &self.allowed_paths())
            .replace("{{instruction}}", instruction)
            .replace("{{iteration}}", &(report.iteration + 1).to_string())
            .replace("{{problems}}", &report.render_problems())
            .replace("{{files}}", &report.render_files());
        self.ask(prompt).await
    }
}

// ─── Response parsing ───────────────────────────────────────────────────────

/// Pull the JSON payload out of a model reply: a ```json fence, any fence,
/// or the outermost braces, in that order.
pub fn extract_json_block(content: &str) -> String {
    let content = content.trim();

    if let Some(start) = content.find("```json") {
        let json_start = start + 7;
        if let Some(end) = content[json_start..].find("```") {
            return content[json_start..json_start + end].trim().to_string();
        }
    }

    if let Some(start) = content.find("```") {
        let block_start = start + 3;
        let actual_start = content[block_start..]
            .find('\n')
            .map(|n| block_start + n + 1)
            .unwrap_or(block_start);
        if let Some(end) = content[actual_start..].find("```") {
            return content[actual_start..actual_start + end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (content.find('{'), content.rfind('}')) {
        if start < end {
            return content[start..=end].to_string();
        }
    }

    content.to_string()
}

/// Accepts `{"writes": [{"path", "content"}]}` or `{"patch": "<unified diff>"}`.
pub fn parse_provider_response(reply: &str) -> Result<ProviderOutput> {
    let block = extract_json_block(reply);
    let value: Value = serde_json::from_str(&block)
        .with_context(|| format!("model reply is not valid JSON: {}", preview(&block)))?;

    if let Some(patch) = value.get("patch") {
        let diff = patch
            .as_str()
            .context("'patch' must be a string holding a unified diff")?;
        if diff.trim().is_empty() {
            bail!("'patch' is empty");
        }
        return Ok(ProviderOutput::Patch(diff.to_string()));
    }

    if let Some(writes) = value.get("writes") {
        let writes: Vec<FileWrite> = serde_json::from_value(writes.clone())
            .context("'writes' must be a list of {\"path\", \"content\"} objects")?;
        if writes.is_empty() {
            bail!("'writes' is empty");
        }
        return Ok(ProviderOutput::Writes(writes));
    }

    bail!("model reply has neither 'writes' nor 'patch': {}", preview(&block))
}

fn preview(s: &str) -> String {
    let mut out: String = s.chars().take(200).collect();
    if s.chars().count() > 200 {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_extract_json_block() {
        assert_eq!(
            extract_json_block("Sure:\n```json\n{\"a\": 1}\n```\nDone."),
            "{\"a\": 1}"
        );
        assert_eq!(extract_json_block("```\n{\"b\": 2}\n```"), "{\"b\": 2}");
        assert_eq!(extract_json_block("text {\"c\": {\"d\": 3}} tail"), "{\"c\": {\"d\": 3}}");
    }

    #[test]
    fn test_parse_writes_and_patch() {
        let out = parse_provider_response(
            "```json\n{\"writes\": [{\"path\": \"SKILL.md\", \"content\": \"x\"}]}\n```",
        )
        .unwrap();
        assert_eq!(out, ProviderOutput::Writes(vec![FileWrite::new("SKILL.md", "x")]));

        let out = parse_provider_response(r#"{"patch": "--- a/x\n+++ b/x\n"}"#).unwrap();
        assert!(matches!(out, ProviderOutput::Patch(ref d) if d.starts_with("--- a/x")));
    }

    #[test]
    fn test_parse_rejects_bad_replies() {
        for reply in [
            "I cannot help with that.",
            r#"{"writes": []}"#,
            r#"{"writes": [{"path": "SKILL.md"}]}"#,
            r#"{"patch": 3}"#,
            r#"{"files": {}}"#,
        ] {
            assert!(parse_provider_response(reply).is_err(), "{}", reply);
        }
    }

    struct Recorded {
        prompts: Mutex<Vec<String>>,
        reply: String,
    }

    #[async_trait::async_trait]
    impl CompletionLlm for Recorded {
        async fn complete(
            &self,
            messages: &[LlmMessage],
            _model: &str,
            _temperature: f64,
        ) -> Result<String> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.prompts.lock().unwrap().push(last);
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_prompts_are_rendered() {
        let llm = Recorded {
            prompts: Mutex::new(Vec::new()),
            reply: r#"{"writes": [{"path": "scripts/run.sh", "content": "cat"}]}"#.to_string(),
        };
        let provider = LlmSkillProvider::new(llm, "test-model");
        let request = GenerationRequest::new("/tmp/echo", "echo the input back");

        provider.generate(&request).await.unwrap();
        let report = RepairReport {
            iteration: 1,
            apply_error: Some("malformed diff: no hunks".into()),
            ..Default::default()
        };
        provider.repair(&request, &report).await.unwrap();

        let prompts = provider.llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("echo the input back"));
        assert!(prompts[0].contains("scripts/**"));
        assert!(!prompts[0].contains("{{"));
        assert!(prompts[1].contains("repair attempt 2"));
        assert!(prompts[1].contains("malformed diff: no hunks"));
        assert!(!prompts[1].contains("{{"));
    }
}
