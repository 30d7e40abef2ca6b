//! Configuration helpers: environment lookups and provider endpoints

use std::env;

/// Model used when neither the call nor the environment names one
pub const DEFAULT_MODEL: &str = "qwen-vl-plus";

/// Where a locally running relay listens by default
pub const DEFAULT_PROXY_URL: &str = "http://localhost:8787";

/// Environment variable holding the chat endpoint / relay URL
pub const PROXY_URL_ENV: &str = "STREAMCHAT_PROXY_URL";

/// Environment variable holding the default model name
pub const MODEL_ENV: &str = "STREAMCHAT_MODEL";

/// Upstream LLM providers with an OpenAI-compatible chat-completions API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Alibaba Cloud DashScope, compatible mode (Qwen models)
    DashScope,
    OpenAI,
    LMStudio,
    Ollama,
}

impl Provider {
    /// Chat-completions URL of this provider
    pub fn chat_completions_url(&self) -> &'static str {
        match self {
            Provider::DashScope => {
                "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"
            }
            Provider::OpenAI => "https://api.openai.com/v1/chat/completions",
            Provider::LMStudio => "http://localhost:1234/v1/chat/completions",
            Provider::Ollama => "http://localhost:11434/v1/chat/completions",
        }
    }

    /// Model the relay falls back to when a request names none
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::DashScope => "qwen-turbo",
            Provider::OpenAI => "gpt-4o-mini",
            Provider::LMStudio | Provider::Ollama => "local-model",
        }
    }

    /// Parse a provider from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dashscope" | "qwen" | "aliyun" => Some(Provider::DashScope),
            "openai" => Some(Provider::OpenAI),
            "lmstudio" | "lm-studio" | "lm_studio" => Some(Provider::LMStudio),
            "ollama" => Some(Provider::Ollama),
            _ => None,
        }
    }
}

/// Get the chat endpoint URL
///
/// Priority:
/// 1. `STREAMCHAT_PROXY_URL` environment variable
/// 2. fallback parameter
/// 3. [`DEFAULT_PROXY_URL`]
pub fn get_proxy_url(fallback: Option<&str>) -> String {
    if let Ok(url) = env::var(PROXY_URL_ENV) {
        if !url.trim().is_empty() {
            return url;
        }
    }

    fallback.unwrap_or(DEFAULT_PROXY_URL).to_string()
}

/// Get the model name from environment variable or fallback
///
/// Priority:
/// 1. `STREAMCHAT_MODEL` environment variable (if prefer_env is true)
/// 2. fallback parameter
pub fn get_model(fallback: Option<&str>, prefer_env: bool) -> Option<String> {
    if prefer_env {
        if let Ok(model) = env::var(MODEL_ENV) {
            if !model.trim().is_empty() {
                return Some(model);
            }
        }
    }

    fallback.map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_urls() {
        assert_eq!(
            Provider::DashScope.chat_completions_url(),
            "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"
        );
        assert_eq!(
            Provider::Ollama.chat_completions_url(),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(Provider::DashScope.default_model(), "qwen-turbo");
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(Provider::parse("DashScope"), Some(Provider::DashScope));
        assert_eq!(Provider::parse("qwen"), Some(Provider::DashScope));
        assert_eq!(Provider::parse("openai"), Some(Provider::OpenAI));
        assert_eq!(Provider::parse("LM-Studio"), Some(Provider::LMStudio));
        assert_eq!(Provider::parse("ollama"), Some(Provider::Ollama));
        assert_eq!(Provider::parse("unknown"), None);
    }

    #[test]
    fn test_get_model_without_env_preference() {
        assert_eq!(get_model(Some("specific"), false).as_deref(), Some("specific"));
        assert_eq!(get_model(None, false), None);
    }
}
