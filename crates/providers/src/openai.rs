use crate::http::status_error;
use crate::{CategorySource, ProviderError, SourceAnswer};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use storage::{Category, Source};

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    /// Includes the version prefix, e.g. `http://127.0.0.1:8045/v1`.
    pub base_url: String,
    pub chat_model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "http://127.0.0.1:8045/v1".into(),
            chat_model: "gemini-3-pro-high".into(),
            temperature: 0.1,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct OpenAiSource {
    client: Client,
    cfg: Arc<OpenAiConfig>,
}

impl OpenAiSource {
    pub fn new(cfg: OpenAiConfig) -> Result<Self, ProviderError> {
        if cfg.api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("missing api key".into()));
        }
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(e.to_string()))?;
        Ok(Self {
            client,
            cfg: Arc::new(cfg),
        })
    }
}

fn system_prompt() -> String {
    let labels: Vec<&str> = Category::ALL.iter().map(|c| c.label()).collect();
    format!(
        "你是一个 Android 应用分类专家。用户会给你 Android 包名。\n\
         请根据应用的实际功能分类，只能使用以下分类名之一：{}。\n\
         手机厂商预装应用归入 系统应用；VPN 与代理归入 代理工具；Magisk、Shizuku 等归入 Root工具；\
         AI 对话助手归入 AI工具。系统工具 仅限输入法、文件管理、计算器等纯工具。\n\
         无法识别时分类填 未知。\n\
         严格逐行输出，不要任何解释或 Markdown：包名|应用名|分类名",
        labels.join("、")
    )
}

#[async_trait::async_trait]
impl CategorySource for OpenAiSource {
    fn source(&self) -> Source {
        Source::Ai
    }

    async fn lookup(
        &self,
        identifier: &str,
        display_name: Option<&str>,
    ) -> Result<SourceAnswer, ProviderError> {
        #[derive(serde::Serialize)]
        struct ChatMessage<'a> {
            role: &'static str,
            content: &'a str,
        }
        #[derive(serde::Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChatMessageResp,
        }
        #[derive(Deserialize)]
        struct ChatMessageResp {
            content: String,
        }
        #[derive(Deserialize)]
        struct ChatApiResponse {
            choices: Vec<Choice>,
        }

        let system = system_prompt();
        let user = match display_name {
            Some(name) => format!("请分类以下 Android 包名（每行一个）:\n\n{identifier}  ({name})"),
            None => format!("请分类以下 Android 包名（每行一个）:\n\n{identifier}"),
        };
        let body = ChatRequest {
            model: &self.cfg.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: self.cfg.temperature,
        };

        let resp = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.cfg.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, resp).await);
        }

        let parsed: ChatApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();

        Ok(answer_for(identifier, content))
    }
}

/// One `pkg|name|category` (or `pkg|category`) line of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub identifier: String,
    pub display_name: Option<String>,
    pub label: String,
}

pub fn parse_reply(text: &str) -> Vec<ReplyLine> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with("```"))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('|').map(str::trim).collect();
            match parts.as_slice() {
                [pkg, name, label, ..] if !pkg.is_empty() && !name.is_empty() => Some(ReplyLine {
                    identifier: pkg.to_string(),
                    display_name: Some(name.to_string()),
                    label: label.to_string(),
                }),
                [pkg, label] if !pkg.is_empty() => Some(ReplyLine {
                    identifier: pkg.to_string(),
                    display_name: None,
                    label: label.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

/// Labels outside the enumeration (including `未知`) are "not found".
pub fn answer_for(identifier: &str, reply: &str) -> SourceAnswer {
    match parse_reply(reply)
        .into_iter()
        .find(|l| l.identifier == identifier)
    {
        Some(line) => SourceAnswer {
            category: line.label.parse::<Category>().ok(),
            display_name: None,
        }
        .with_name(line.display_name),
        None => SourceAnswer::not_found(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reply_lines() {
        let reply = "```\ncom.tencent.mm|微信|社交通讯\n# note\n\ncom.follow.clash|代理工具\nnonsense\n```";
        let lines = parse_reply(reply);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].display_name.as_deref(), Some("微信"));
        assert_eq!(lines[1].display_name, None);
        assert_eq!(lines[1].label, "代理工具");
    }

    #[test]
    fn unknown_or_custom_label_is_not_found_but_keeps_name() {
        let answer = answer_for("com.x", "com.x|X App|未知");
        assert_eq!(answer.category, None);
        assert_eq!(answer.display_name.as_deref(), Some("X App"));
        assert_eq!(answer_for("com.y", "com.y|Y|自定义"), SourceAnswer {
            category: None,
            display_name: Some("Y".into())
        });
        assert_eq!(answer_for("com.z", "com.other|O|游戏"), SourceAnswer::not_found());
        assert_eq!(
            answer_for("com.deepseek.chat", "com.deepseek.chat|DeepSeek|AI工具").category,
            Some(Category::AiTools)
        );
    }

    #[test]
    fn missing_key_is_not_configured() {
        assert!(matches!(
            OpenAiSource::new(OpenAiConfig::default()),
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[test]
    fn prompt_lists_every_category() {
        let prompt = system_prompt();
        for c in Category::ALL {
            assert!(prompt.contains(c.label()));
        }
    }
}
