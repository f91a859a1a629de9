//! Social-post generator
//!
//! Turns spoken context into a formatted `LinkedIn` post through an
//! `OpenRouter` chat completion constrained to a strict JSON schema.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::check_status;
use crate::tools::{
    ToolCallResult, ToolDeclaration, ToolHandler, ToolRegistry, optional_str, required_str,
};
use crate::{Error, Result};

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

const SYSTEM_PROMPT: &str = "\
Write a LinkedIn post that is easy to skim and built for engagement.

Structure:
1. Open with one or two short, punchy sentences, each on its own line.
2. Follow with up to three short sentences that bridge to the main message.
3. Introduce a list with a line such as \"Here's why:\" or \"Here are 5 truths:\".
4. Write a numbered list of 3 to 7 concise points. Under each point add one or two \
short elaborations, each on its own line and starting with '↳ '.
5. Optionally close with one or two sentences that sum up the message.

Style: plain, direct and encouraging. Address the reader as \"you\". Use line breaks \
generously. Use ALL CAPS for at most a word or two of emphasis. Do not be cheesy or salesy.";

/// A generated post with its provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedPost {
    pub post_content: String,
    pub topic: String,
    pub context: String,
    pub generated_at: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
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

#[derive(Debug, Deserialize)]
struct PostBody {
    post_content: String,
}

/// `OpenRouter` client for post generation
pub struct PostGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    posts_dir: Option<PathBuf>,
}

impl PostGenerator {
    /// Create a generator
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(api_key: &str, model: &str, posts_dir: Option<PathBuf>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            base_url: OPENROUTER_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            posts_dir,
        })
    }

    /// Generate a post about `topic` using `context`
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the reply is not the expected JSON
    pub async fn generate(&self, topic: &str, context: &str) -> Result<GeneratedPost> {
        let url = format!("{}/chat/completions", self.base_url);
        let user_prompt = format!(
            "Create a LinkedIn post about '{topic}'.\n\nUse this additional context if helpful: {context}"
        );

        tracing::info!(model = %self.model, topic, "generating post");

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt }
            ],
            "temperature": 0.1,
            "max_tokens": 2000,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "linkedin_post",
                    "strict": true,
                    "schema": {
                        "type": "object",
                        "properties": {
                            "post_content": {
                                "type": "string",
                                "description": "The full formatted LinkedIn post content"
                            }
                        },
                        "required": ["post_content"],
                        "additionalProperties": false
                    }
                }
            }
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "Roomey")
            .json(&body)
            .send()
            .await?;
        let completion: ChatCompletion = check_status("OpenRouter", response).await?.json().await?;

        let post_content = parse_post(&completion)?;
        Ok(GeneratedPost {
            post_content,
            topic: topic.to_string(),
            context: context.to_string(),
            generated_at: Local::now().to_rfc3339(),
        })
    }

    /// Save `post` as JSON under the posts directory, if one is configured
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub async fn save(&self, post: &GeneratedPost) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.posts_dir else {
            return Ok(None);
        };
        save_post(dir, post).await.map(Some)
    }
}

fn parse_post(completion: &ChatCompletion) -> Result<String> {
    let content = completion
        .choices
        .first()
        .and_then(|c| c.message.content.as_deref())
        .ok_or_else(|| Error::Integration("OpenRouter returned no content".to_string()))?;

    let body: PostBody = serde_json::from_str(content).map_err(|e| {
        Error::Integration(format!("post reply was not valid JSON: {e}"))
    })?;
    Ok(body.post_content)
}

/// Lowercase, underscore-separated, at most 30 chars
fn slug(topic: &str) -> String {
    topic
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(30)
        .collect()
}

/// Derive a topic when the model did not supply one: the first sentence of
/// the context, capped at 60 chars
fn topic_from_context(context: &str) -> String {
    let first = context
        .split(['.', '\n', '!', '?'])
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or("General");
    first.chars().take(60).collect()
}

async fn save_post(dir: &Path, post: &GeneratedPost) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("linkedin_post_{}_{stamp}.json", slug(&post.topic)));
    tokio::fs::write(&path, serde_json::to_string_pretty(post)?).await?;
    tracing::info!(path = %path.display(), "saved generated post");
    Ok(path)
}

/// `format_linkedin_post`
pub struct FormatPostTool {
    generator: Arc<PostGenerator>,
}

impl FormatPostTool {
    #[must_use]
    pub fn declaration() -> ToolDeclaration {
        ToolDeclaration::new(
            "format_linkedin_post",
            "Generate a LinkedIn post from provided context. Extracts a topic and creates a professionally formatted post.",
            json!({
                "type": "object",
                "properties": {
                    "context": {
                        "type": "string",
                        "description": "Everything the user said that the post should draw on"
                    },
                    "topic": {
                        "type": "string",
                        "description": "Short topic for the post; derived from the context if omitted"
                    }
                },
                "required": ["context"]
            }),
        )
    }
}

#[async_trait]
impl ToolHandler for FormatPostTool {
    async fn invoke(&self, args: Value) -> Result<ToolCallResult> {
        let context = required_str(&args, "context")?;
        let topic = optional_str(&args, "topic")
            .map_or_else(|| topic_from_context(context), str::to_string);

        let post = self.generator.generate(&topic, context).await?;

        let mut payload = serde_json::to_value(&post)?;
        let message = match self.generator.save(&post).await {
            Ok(Some(path)) => {
                payload["saved_to"] = json!(path.display().to_string());
                format!("Generated a post about '{topic}' and saved it.")
            }
            Ok(None) => format!("Generated a post about '{topic}'."),
            Err(e) => {
                tracing::warn!(error = %e, "failed to save generated post");
                format!("Generated a post about '{topic}' but could not save it.")
            }
        };

        Ok(ToolCallResult::success(payload, message))
    }
}

/// Register the post generator tool
///
/// # Errors
///
/// Returns error if the registry rejects the name
pub fn register(registry: &mut ToolRegistry, generator: Arc<PostGenerator>) -> Result<()> {
    registry.register(
        FormatPostTool::declaration(),
        Arc::new(FormatPostTool { generator }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_filesystem_safe() {
        assert_eq!(slug("NVIDIA vs. OpenAI"), "nvidia_vs__openai");
        assert_eq!(slug(&"x".repeat(50)).len(), 30);
    }

    #[test]
    fn topic_uses_first_sentence() {
        assert_eq!(
            topic_from_context("  Remote work is here to stay. Offices are changing."),
            "Remote work is here to stay"
        );
        assert_eq!(topic_from_context(""), "General");
    }

    #[test]
    fn parses_structured_reply() {
        let completion: ChatCompletion = serde_json::from_value(json!({
            "choices": [{ "message": { "content": "{\"post_content\": \"Hello\\n\\n1. One\"}" } }]
        }))
        .unwrap();
        assert_eq!(parse_post(&completion).unwrap(), "Hello\n\n1. One");
    }

    #[test]
    fn rejects_unstructured_reply() {
        let completion: ChatCompletion = serde_json::from_value(json!({
            "choices": [{ "message": { "content": "Sure! Here is your post" } }]
        }))
        .unwrap();
        assert!(matches!(parse_post(&completion), Err(Error::Integration(_))));
    }

    #[tokio::test]
    async fn saves_post_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let post = GeneratedPost {
            post_content: "Body".to_string(),
            topic: "Deep Work".to_string(),
            context: "ctx".to_string(),
            generated_at: "2025-01-01T00:00:00+00:00".to_string(),
        };

        let path = save_post(dir.path(), &post).await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("linkedin_post_deep_work_"));

        let saved: GeneratedPost =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.post_content, "Body");
    }
}
