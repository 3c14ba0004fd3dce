use serde_json::Value;

use crate::config::{ProviderConfig, ProviderKind};

/**
 * \brief 可恢复错误的处理方式：转为 200 并给出说明文本。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    QuotaExhausted,
    UnknownModel,
}

/**
 * \brief 一条降级规则。各条件为 None 时视为通配。
 */
#[derive(Debug, Clone, Copy)]
pub struct RecoveryRule {
    pub provider: Option<ProviderKind>,
    pub status: Option<u16>,
    /** \brief 小写子串，与响应体及结构化错误字段做大小写无关匹配。 */
    pub body_pattern: Option<&'static str>,
    pub action: RecoveryAction,
}

impl RecoveryRule {
    const fn status(code: u16, action: RecoveryAction) -> Self {
        Self {
            provider: None,
            status: Some(code),
            body_pattern: None,
            action,
        }
    }

    const fn body(pattern: &'static str, action: RecoveryAction) -> Self {
        Self {
            provider: None,
            status: None,
            body_pattern: Some(pattern),
            action,
        }
    }

    fn matches(&self, kind: ProviderKind, failure: &ProviderFailure<'_>) -> bool {
        if self.provider.is_some_and(|p| p != kind) {
            return false;
        }
        if self.status.is_some_and(|s| s != failure.status) {
            return false;
        }
        match self.body_pattern {
            Some(pattern) => failure.haystack.contains(pattern),
            None => true,
        }
    }
}

/**
 * \brief 默认规则表，先匹配者生效；配额类规则排在模型类之前。
 */
pub const DEFAULT_RULES: &[RecoveryRule] = &[
    RecoveryRule::status(429, RecoveryAction::QuotaExhausted),
    RecoveryRule::body("quota", RecoveryAction::QuotaExhausted),
    RecoveryRule::body("resource_exhausted", RecoveryAction::QuotaExhausted),
    RecoveryRule::body("rate limit", RecoveryAction::QuotaExhausted),
    RecoveryRule::body("rate_limit", RecoveryAction::QuotaExhausted),
    RecoveryRule::status(404, RecoveryAction::UnknownModel),
    RecoveryRule::body("not found", RecoveryAction::UnknownModel),
    RecoveryRule::body("not_found", RecoveryAction::UnknownModel),
    RecoveryRule::body("not supported", RecoveryAction::UnknownModel),
    RecoveryRule::body("no such model", RecoveryAction::UnknownModel),
];

/**
 * \brief 待分类的 Provider 失败响应（已预先小写化）。
 */
pub struct ProviderFailure<'a> {
    pub status: u16,
    pub body: &'a str,
    haystack: String,
}

impl<'a> ProviderFailure<'a> {
    pub fn new(status: u16, body: &'a str) -> Self {
        let mut haystack = body.to_ascii_lowercase();
        if let Some(fields) = structured_error_fields(body) {
            haystack.push('\n');
            haystack.push_str(&fields.to_ascii_lowercase());
        }
        Self {
            status,
            body,
            haystack,
        }
    }
}

/**
 * \brief 提取常见的结构化错误字段：
 *   {"error": {"status": "RESOURCE_EXHAUSTED", "code": 429}}  (Google)
 *   {"error": {"code": "model_not_found"}}                    (OpenAI 兼容)
 *   {"errors": [{"code": 7000, "message": "No route for that URI"}]}  (Cloudflare)
 */
fn structured_error_fields(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    let mut fields = Vec::new();
    if let Some(err) = v.get("error") {
        for key in ["status", "code", "type"] {
            match err.get(key) {
                Some(Value::String(s)) => fields.push(s.clone()),
                Some(Value::Number(n)) => fields.push(n.to_string()),
                _ => {}
            }
        }
    }
    if let Some(errors) = v.get("errors").and_then(|e| e.as_array()) {
        fields.extend(
            errors
                .iter()
                .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                .map(|s| s.to_string()),
        );
    }
    if fields.is_empty() {
        None
    } else {
        Some(fields.join("\n"))
    }
}

/**
 * \brief 按规则表为失败响应选择恢复动作；无匹配则返回 None（应以 500 透出）。
 */
pub fn classify(
    rules: &[RecoveryRule],
    kind: ProviderKind,
    failure: &ProviderFailure<'_>,
) -> Option<RecoveryAction> {
    rules
        .iter()
        .find(|rule| rule.matches(kind, failure))
        .map(|rule| rule.action)
}

/**
 * \brief 生成替代回复文本。
 */
pub fn render(action: RecoveryAction, config: &ProviderConfig) -> String {
    let provider = config.kind.display_name();
    let model_env = config.kind.model_env();
    match action {
        RecoveryAction::QuotaExhausted => format!(
            "The {} quota for this deployment is exhausted, so I can't answer right now. \
Please try again later, or switch to a model with available quota by setting {} \
(currently \"{}\") or using an API key with a higher limit.",
            provider, model_env, config.model
        ),
        RecoveryAction::UnknownModel => format!(
            "The configured model \"{}\" was not found or is not supported by {}. \
Please set {} to a model this provider offers.",
            config.model, provider, model_env
        ),
    }
}
