use std::fmt;

use crate::error::RelayError;

/**
 * \brief 默认引导语：限定话题范围并要求简洁。
 */
pub const DEFAULT_STEERING_PROMPT: &str = "You are UrbanEye's assistant. Stay on topic for the \
Health, Energy, Water, and Waste panels, and keep answers concise and helpful.";

/**
 * \brief 部署时选定的后端类型。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Gemini,
    Cloudflare,
    DeepSeek,
}

impl ProviderKind {
    pub fn parse(raw: &str) -> Result<ProviderKind, RelayError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "cloudflare" | "cf" | "workers-ai" => Ok(ProviderKind::Cloudflare),
            "deepseek" => Ok(ProviderKind::DeepSeek),
            other => Err(RelayError::UnknownProvider(other.to_string())),
        }
    }

    /** \brief 面向用户的显示名称。 */
    pub fn display_name(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "Gemini",
            ProviderKind::Cloudflare => "Cloudflare Workers AI",
            ProviderKind::DeepSeek => "DeepSeek",
        }
    }

    /** \brief 控制模型名的环境变量。 */
    pub fn model_env(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_MODEL",
            ProviderKind::Cloudflare => "CF_MODEL",
            ProviderKind::DeepSeek => "DEEPSEEK_MODEL",
        }
    }

    fn key_env(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::Cloudflare => "CF_API_TOKEN",
            ProviderKind::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    fn base_env(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_API_BASE",
            ProviderKind::Cloudflare => "CF_API_BASE",
            ProviderKind::DeepSeek => "DEEPSEEK_API_BASE",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-2.0-flash",
            ProviderKind::Cloudflare => "@cf/meta/llama-3.1-8b-instruct",
            ProviderKind::DeepSeek => "deepseek-chat",
        }
    }

    fn default_base(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
            ProviderKind::Cloudflare => "https://api.cloudflare.com",
            ProviderKind::DeepSeek => "https://api.deepseek.com",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/**
 * \brief 进程级 Provider 配置，启动时构建一次并向下传递。
 *
 * 凭据在此处允许缺失，由中继在发起请求前检查，
 * 以保证 OPTIONS 等请求不受配置状态影响。
 */
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /** \brief Provider 类型 */
    pub kind: ProviderKind,
    /** \brief API 基地址（不含尾部斜杠） */
    pub api_base: String,
    /** \brief API Key；Cloudflare 下为 API Token */
    pub api_key: Option<String>,
    /** \brief Cloudflare 账户 ID */
    pub account_id: Option<String>,
    /** \brief 模型名 */
    pub model: String,
    /** \brief 引导语（Gemini/Cloudflare 使用） */
    pub steering_prompt: String,
}

impl ProviderConfig {
    /**
     * \brief 以指定类型的默认值构建配置（无凭据）。
     */
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            api_base: kind.default_base().to_string(),
            api_key: None,
            account_id: None,
            model: kind.default_model().to_string(),
            steering_prompt: DEFAULT_STEERING_PROMPT.to_string(),
        }
    }

    /**
     * \brief 从进程环境变量读取配置。
     */
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /**
     * \brief 从任意键值查找函数读取配置，空白值视为未设置。
     */
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let kind = match get("RELAY_PROVIDER") {
            Some(raw) => ProviderKind::parse(&raw)?,
            None => ProviderKind::Gemini,
        };

        let mut config = Self::new(kind);
        if let Some(base) = get(kind.base_env()) {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = get(kind.model_env()) {
            config.model = model;
        }
        if let Some(prompt) = get("RELAY_STEERING_PROMPT") {
            config.steering_prompt = prompt;
        }
        config.api_key = get(kind.key_env());
        if kind == ProviderKind::Cloudflare {
            config.account_id = get("CF_ACCOUNT_ID");
        }
        Ok(config)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /**
     * \brief 返回 API Key，缺失时给出对应环境变量名。
     */
    pub fn require_api_key(&self) -> Result<&str, RelayError> {
        self.api_key
            .as_deref()
            .ok_or(RelayError::MissingCredential(self.kind.key_env()))
    }

    /**
     * \brief 返回 Cloudflare 账户 ID，缺失时给出对应环境变量名。
     */
    pub fn require_account_id(&self) -> Result<&str, RelayError> {
        self.account_id
            .as_deref()
            .ok_or(RelayError::MissingCredential("CF_ACCOUNT_ID"))
    }
}

// Credentials stay out of logs.
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("account_id", &self.account_id)
            .field("model", &self.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_to_gemini() {
        let cfg = ProviderConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(cfg.kind, ProviderKind::Gemini);
        assert_eq!(cfg.model, "gemini-2.0-flash");
        assert_eq!(cfg.api_base, "https://generativelanguage.googleapis.com");
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.steering_prompt, DEFAULT_STEERING_PROMPT);
    }

    #[test]
    fn test_cloudflare_reads_account_and_token() {
        let cfg = ProviderConfig::from_lookup(lookup(&[
            ("RELAY_PROVIDER", "Workers-AI"),
            ("CF_ACCOUNT_ID", "acc-1"),
            ("CF_API_TOKEN", "tok-1"),
            ("CF_MODEL", "@cf/mistral/mistral-7b-instruct-v0.1"),
            ("CF_API_BASE", "http://127.0.0.1:9000/"),
        ]))
        .expect("config");
        assert_eq!(cfg.kind, ProviderKind::Cloudflare);
        assert_eq!(cfg.require_account_id().expect("account"), "acc-1");
        assert_eq!(cfg.require_api_key().expect("token"), "tok-1");
        assert_eq!(cfg.model, "@cf/mistral/mistral-7b-instruct-v0.1");
        assert_eq!(cfg.api_base, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_blank_values_are_unset() {
        let cfg = ProviderConfig::from_lookup(lookup(&[
            ("RELAY_PROVIDER", "deepseek"),
            ("DEEPSEEK_API_KEY", "   "),
            ("DEEPSEEK_MODEL", ""),
        ]))
        .expect("config");
        assert_eq!(cfg.model, "deepseek-chat");
        match cfg.require_api_key() {
            Err(RelayError::MissingCredential(var)) => assert_eq!(var, "DEEPSEEK_API_KEY"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = ProviderConfig::from_lookup(lookup(&[("RELAY_PROVIDER", "openai")]))
            .expect_err("should fail");
        assert!(err.is_configuration());
    }

    #[test]
    fn test_debug_hides_api_key() {
        let cfg = ProviderConfig::new(ProviderKind::Gemini).with_api_key("secret-key");
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains("secret-key"));
    }
}
