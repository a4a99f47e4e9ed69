use std::env;

use reqwest::Url;

use crate::error::{CitestreamError, Result};

pub const DEFAULT_HOST: &str = "https://prod-1-data.ke.pinecone.io";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantConfig {
    pub host: String,
    pub api_key: String,
    pub assistant_name: Option<String>,
}

impl AssistantConfig {
    pub fn from_env() -> Self {
        // Precedence:
        // 1) ASSISTANT_HOST
        // 2) public data-plane host
        let host = non_empty_var("ASSISTANT_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());

        // Precedence:
        // 1) ASSISTANT_API_KEY
        // 2) PINECONE_API_KEY (name used by the upstream's own tooling)
        // 3) empty; the upstream then answers 401, surfaced as a stream error
        let api_key = non_empty_var("ASSISTANT_API_KEY")
            .or_else(|| non_empty_var("PINECONE_API_KEY"))
            .unwrap_or_default();

        // Precedence:
        // 1) ASSISTANT_NAME
        // 2) unset; every chat request fails with a configuration error
        let assistant_name = non_empty_var("ASSISTANT_NAME");

        Self {
            host,
            api_key,
            assistant_name,
        }
    }

    /// The assistant name, or the configuration error reported before any
    /// stream is opened.
    pub fn require_assistant(&self) -> Result<&str> {
        self.assistant_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| {
                CitestreamError::MissingConfig(
                    "assistant name is not configured (set ASSISTANT_NAME)".to_string(),
                )
            })
    }

    pub fn chat_url(&self) -> Result<String> {
        let name = self.require_assistant()?;
        Ok(self.endpoint(&["assistant", "chat", name])?.to_string())
    }

    /// Signed-link lookup for one file. The id always stays a single
    /// encoded path segment.
    pub fn file_url(&self, file_id: &str) -> Result<String> {
        let name = self.require_assistant()?;
        if matches!(file_id.trim(), "" | "." | "..") {
            return Err(CitestreamError::FileNotFound(file_id.to_string()));
        }

        let mut url = self.endpoint(&["assistant", "files", name, file_id])?;
        url.query_pairs_mut().append_pair("include_url", "true");
        Ok(url.to_string())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let invalid = |reason: &str| CitestreamError::InvalidHost {
            host: self.host.clone(),
            reason: reason.to_string(),
        };

        let mut url = Url::parse(&self.host).map_err(|err| invalid(&err.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("host cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use crate::config::AssistantConfig;

    fn config(name: Option<&str>) -> AssistantConfig {
        AssistantConfig {
            host: "https://assistant.example/".to_string(),
            api_key: "key".to_string(),
            assistant_name: name.map(ToString::to_string),
        }
    }

    #[test]
    fn missing_assistant_name_is_a_config_error() {
        let err = config(None).chat_url().expect_err("must fail");
        assert!(format!("{err}").contains("missing configuration"));
        assert!(config(Some("  ")).require_assistant().is_err());
    }

    #[test]
    fn file_ids_cannot_escape_their_path_segment() {
        let config = config(Some("docs"));
        assert_eq!(
            config.file_url("../chat/x?a=1#b").expect("file url"),
            "https://assistant.example/assistant/files/docs/..%2Fchat%2Fx%3Fa=1%23b?include_url=true"
        );
        assert_eq!(
            config.file_url("report q1.pdf").expect("file url"),
            "https://assistant.example/assistant/files/docs/report%20q1.pdf?include_url=true"
        );
        assert!(config.file_url("..").is_err());
        assert!(config.file_url("").is_err());
    }

    #[test]
    fn malformed_host_is_reported() {
        let mut config = config(Some("docs"));
        config.host = "not a url".to_string();
        let err = config.chat_url().expect_err("must fail");
        assert!(format!("{err}").contains("invalid assistant host"));
    }

    #[test]
    fn urls_join_host_and_assistant() {
        let config = config(Some("docs"));
        assert_eq!(
            config.chat_url().expect("chat url"),
            "https://assistant.example/assistant/chat/docs"
        );
        assert_eq!(
            config.file_url("f-1").expect("file url"),
            "https://assistant.example/assistant/files/docs/f-1?include_url=true"
        );
    }
}
