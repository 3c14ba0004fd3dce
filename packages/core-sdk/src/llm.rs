use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::{
    config::{ProviderConfig, ProviderKind},
    error::RelayError,
    models::{ChatMessage, Role},
};

/**
 * \brief 无法从响应中提取文本时的占位回复。
 */
pub const NO_REPLY: &str = "Sorry, I couldn't generate a response.";

/**
 * \brief 已构建好的出站请求。查询参数单独存放，避免 Key 出现在日志 URL 中。
 */
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub query: Vec<(&'static str, String)>,
    pub headers: HeaderMap,
    pub body: Value,
}

/**
 * \brief 统一的聊天后端能力：构建请求、提取回复。
 */
pub trait ChatProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    fn build_request(&self, history: &[ChatMessage]) -> Result<OutboundRequest, RelayError>;

    /**
     * \brief 从原始响应中提取回复，保证返回非空文本。
     */
    fn extract_reply(&self, raw: &Value) -> String {
        extract_reply(raw).unwrap_or_else(|| NO_REPLY.to_string())
    }
}

/**
 * \brief 根据部署配置选定后端，同时校验凭据是否齐全。
 */
pub fn select_provider(config: &ProviderConfig) -> Result<Box<dyn ChatProvider>, RelayError> {
    Ok(match config.kind {
        ProviderKind::Gemini => Box::new(GeminiProvider::from_config(config)?),
        ProviderKind::Cloudflare => Box::new(CloudflareProvider::from_config(config)?),
        ProviderKind::DeepSeek => Box::new(DeepSeekProvider::from_config(config)?),
    })
}

/**
 * \brief Google Gemini：role/parts 结构，Key 走查询参数。
 */
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    api_base: String,
    api_key: String,
    model: String,
    steering_prompt: String,
}

impl GeminiProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, RelayError> {
        Ok(Self {
            api_base: normalize_gemini_base(&config.api_base),
            api_key: config.require_api_key()?.to_string(),
            model: config.model.clone(),
            steering_prompt: config.steering_prompt.clone(),
        })
    }
}

impl ChatProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, history: &[ChatMessage]) -> Result<OutboundRequest, RelayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(OutboundRequest {
            url: format!("{}/models/{}:generateContent", self.api_base, self.model),
            query: vec![("key", self.api_key.clone())],
            headers,
            body: json!({ "contents": gemini_contents(&self.steering_prompt, history) }),
        })
    }
}

/**
 * \brief Cloudflare Workers AI：OpenAI 风格消息，前置 system 引导语。
 */
#[derive(Debug, Clone)]
pub struct CloudflareProvider {
    api_base: String,
    account_id: String,
    api_token: String,
    model: String,
    steering_prompt: String,
}

impl CloudflareProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, RelayError> {
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            account_id: config.require_account_id()?.to_string(),
            api_token: config.require_api_key()?.to_string(),
            model: config.model.clone(),
            steering_prompt: config.steering_prompt.clone(),
        })
    }
}

impl ChatProvider for CloudflareProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cloudflare
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, history: &[ChatMessage]) -> Result<OutboundRequest, RelayError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::new(Role::System, self.steering_prompt.clone()));
        messages.extend_from_slice(history);
        Ok(OutboundRequest {
            url: format!(
                "{}/client/v4/accounts/{}/ai/run/{}",
                self.api_base, self.account_id, self.model
            ),
            query: Vec::new(),
            headers: bearer_headers(&self.api_token)?,
            body: json!({ "messages": messages }),
        })
    }
}

/**
 * \brief DeepSeek：OpenAI 兼容接口，历史原样透传，不加引导语。
 */
#[derive(Debug, Clone)]
pub struct DeepSeekProvider {
    api_base: String,
    api_key: String,
    model: String,
}

impl DeepSeekProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, RelayError> {
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.require_api_key()?.to_string(),
            model: config.model.clone(),
        })
    }
}

impl ChatProvider for DeepSeekProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DeepSeek
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, history: &[ChatMessage]) -> Result<OutboundRequest, RelayError> {
        Ok(OutboundRequest {
            url: format!("{}/chat/completions", self.api_base),
            query: Vec::new(),
            headers: bearer_headers(&self.api_key)?,
            body: json!({
                "model": self.model,
                "messages": history,
            }),
        })
    }
}

fn bearer_headers(token: &str) -> Result<HeaderMap, RelayError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    Ok(headers)
}

fn gemini_contents(steering_prompt: &str, history: &[ChatMessage]) -> Vec<Value> {
    let mut contents = Vec::with_capacity(history.len() + 1);
    contents.push(json!({
        "role": "user",
        "parts": [{"text": steering_prompt}]
    }));
    for msg in history {
        let role = match msg.role {
            Role::Assistant => "model",
            _ => "user",
        };
        contents.push(json!({
            "role": role,
            "parts": [{"text": msg.content}]
        }));
    }
    contents
}

fn normalize_gemini_base(api_base: &str) -> String {
    let trimmed = api_base.trim_end_matches('/');
    if trimmed.ends_with("/v1") || trimmed.ends_with("/v1beta") {
        trimmed.to_string()
    } else {
        format!("{}/v1beta", trimmed)
    }
}

/**
 * \brief 按固定优先级尝试已知的响应结构：
 *   1. candidates[0].content.parts[*].text（Gemini）
 *   2. result.response（Workers AI）
 *   3. output_text
 *   4. choices[0].message.content（OpenAI 兼容）
 * 空字符串视为未命中。
 */
pub fn extract_reply(v: &Value) -> Option<String> {
    [
        extract_gemini_content,
        extract_workers_ai_content,
        extract_output_text,
        extract_openai_content,
    ]
    .iter()
    .filter_map(|extract| extract(v))
    .find(|text| !text.is_empty())
}

fn extract_gemini_content(v: &Value) -> Option<String> {
    let parts = v
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    Some(
        parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""),
    )
}

fn extract_workers_ai_content(v: &Value) -> Option<String> {
    v.get("result")?
        .get("response")?
        .as_str()
        .map(|s| s.to_string())
}

fn extract_output_text(v: &Value) -> Option<String> {
    v.get("output_text")?.as_str().map(|s| s.to_string())
}

fn extract_openai_content(v: &Value) -> Option<String> {
    v.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

/**
 * \brief Provider 原始响应：状态码与未解析的响应体。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/**
 * \brief 出站 HTTP 发送接口，测试中可替换为记录调用次数的实现。
 */
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: &OutboundRequest) -> Result<TransportResponse, RelayError>;
}

static SHARED_CLIENT: Lazy<reqwest::Client> = Lazy::new(reqwest::Client::new);

/**
 * \brief 基于 reqwest 的默认实现，不做重试。
 */
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /**
     * \brief 复用进程级共享的 Client。
     */
    pub fn shared() -> Self {
        Self::new(SHARED_CLIENT.clone())
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::shared()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post(&self, request: &OutboundRequest) -> Result<TransportResponse, RelayError> {
        let resp = self
            .client
            .post(&request.url)
            .query(&request.query)
            .headers(request.headers.clone())
            .json(&request.body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("How clean is the water?"),
            ChatMessage::assistant("Water quality is good."),
            ChatMessage::user("And energy?"),
        ]
    }

    #[test]
    fn test_gemini_request_shape() {
        let cfg = ProviderConfig::new(ProviderKind::Gemini).with_api_key("g-key");
        let provider = GeminiProvider::from_config(&cfg).expect("provider");
        let req = provider.build_request(&history()).expect("request");

        assert_eq!(
            req.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(req.query, vec![("key", "g-key".to_string())]);
        assert!(req.headers.get(AUTHORIZATION).is_none());

        let contents = req.body["contents"].as_array().expect("contents");
        assert_eq!(contents.len(), 4);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["text"], cfg.steering_prompt.as_str());
        assert_eq!(contents[1]["role"], "user");
        assert_eq!(contents[1]["parts"][0]["text"], "How clean is the water?");
        assert_eq!(contents[2]["role"], "model");
        assert_eq!(contents[3]["role"], "user");
    }

    #[test]
    fn test_gemini_base_with_version_kept() {
        let cfg = ProviderConfig::new(ProviderKind::Gemini)
            .with_api_key("k")
            .with_api_base("http://localhost:1234/v1/");
        let provider = GeminiProvider::from_config(&cfg).expect("provider");
        let req = provider.build_request(&[]).expect("request");
        assert_eq!(
            req.url,
            "http://localhost:1234/v1/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn test_cloudflare_request_shape() {
        let cfg = ProviderConfig::new(ProviderKind::Cloudflare)
            .with_api_key("cf-token")
            .with_account_id("acc-42");
        let provider = CloudflareProvider::from_config(&cfg).expect("provider");
        let req = provider.build_request(&history()).expect("request");

        assert_eq!(
            req.url,
            "https://api.cloudflare.com/client/v4/accounts/acc-42/ai/run/@cf/meta/llama-3.1-8b-instruct"
        );
        assert!(req.query.is_empty());
        assert_eq!(
            req.headers.get(AUTHORIZATION).expect("auth"),
            "Bearer cf-token"
        );
        let messages = req.body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], cfg.steering_prompt.as_str());
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[2]["content"], "Water quality is good.");
    }

    #[test]
    fn test_deepseek_request_passes_history_through() {
        let cfg = ProviderConfig::new(ProviderKind::DeepSeek).with_api_key("ds-key");
        let provider = DeepSeekProvider::from_config(&cfg).expect("provider");
        let req = provider.build_request(&history()).expect("request");

        assert_eq!(req.url, "https://api.deepseek.com/chat/completions");
        assert_eq!(req.headers.get(AUTHORIZATION).expect("auth"), "Bearer ds-key");
        assert_eq!(req.body["model"], "deepseek-chat");
        assert_eq!(
            req.body["messages"],
            serde_json::to_value(history()).expect("serialize")
        );
    }

    #[test]
    fn test_select_provider_requires_credentials() {
        let cfg = ProviderConfig::new(ProviderKind::Cloudflare).with_api_key("token");
        match select_provider(&cfg) {
            Err(RelayError::MissingCredential(var)) => assert_eq!(var, "CF_ACCOUNT_ID"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected missing credential"),
        }

        let cfg = ProviderConfig::new(ProviderKind::Gemini);
        assert!(matches!(
            select_provider(&cfg),
            Err(RelayError::MissingCredential("GEMINI_API_KEY"))
        ));

        let cfg = ProviderConfig::new(ProviderKind::DeepSeek).with_api_key("k");
        let provider = select_provider(&cfg).expect("provider");
        assert_eq!(provider.kind(), ProviderKind::DeepSeek);
        assert_eq!(provider.model(), "deepseek-chat");
    }

    #[test]
    fn test_extract_known_shapes() {
        let gemini = json!({"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}]}}]});
        let workers = json!({"result":{"response":"Hello"},"success":true});
        let output = json!({"output_text":"Hello"});
        let openai = json!({"choices":[{"message":{"role":"assistant","content":"Hello"}}]});
        for v in [gemini, workers, output, openai] {
            assert_eq!(extract_reply(&v).as_deref(), Some("Hello"));
        }
    }

    #[test]
    fn test_extract_precedence_and_placeholder() {
        let both = json!({
            "candidates":[{"content":{"parts":[{"text":"first"}]}}],
            "choices":[{"message":{"content":"second"}}]
        });
        assert_eq!(extract_reply(&both).as_deref(), Some("first"));

        let empty_gemini = json!({
            "candidates":[{"content":{"parts":[]}}],
            "choices":[{"message":{"content":"fallback"}}]
        });
        assert_eq!(extract_reply(&empty_gemini).as_deref(), Some("fallback"));

        let cfg = ProviderConfig::new(ProviderKind::Gemini).with_api_key("k");
        let provider = GeminiProvider::from_config(&cfg).expect("provider");
        for v in [json!({}), json!(null), json!({"choices":[]}), json!({"output_text":""})] {
            assert_eq!(provider.extract_reply(&v), NO_REPLY);
        }
    }

    #[tokio::test]
    async fn test_reqwest_transport_sends_gemini_key_as_query() {
        use httpmock::prelude::*;

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-2.0-flash:generateContent")
                    .query_param("key", "g-key")
                    .header("content-type", "application/json")
                    .json_body_partial(r#"{"contents":[{"role":"user"}]}"#);
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"candidates":[{"content":{"parts":[{"text":"ok"}]}}]}"#);
            })
            .await;

        let cfg = ProviderConfig::new(ProviderKind::Gemini)
            .with_api_key("g-key")
            .with_api_base(server.base_url());
        let provider = select_provider(&cfg).expect("provider");
        let request = provider.build_request(&[]).expect("request");
        let transport = ReqwestTransport::new(reqwest::Client::new());
        let resp = transport.post(&request).await.expect("post");

        assert!(resp.is_success());
        let v: Value = serde_json::from_str(&resp.body).expect("json");
        assert_eq!(provider.extract_reply(&v), "ok");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_reqwest_transport_keeps_error_body() {
        use httpmock::prelude::*;

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/client/v4/accounts/acc/ai/run/@cf/meta/llama-3.1-8b-instruct")
                    .header("authorization", "Bearer cf-token");
                then.status(429)
                    .body(r#"{"errors":[{"code":3036,"message":"account limited"}]}"#);
            })
            .await;

        let cfg = ProviderConfig::new(ProviderKind::Cloudflare)
            .with_api_key("cf-token")
            .with_account_id("acc")
            .with_api_base(server.base_url());
        let provider = select_provider(&cfg).expect("provider");
        let request = provider.build_request(&[ChatMessage::user("hi")]).expect("request");
        let resp = ReqwestTransport::new(reqwest::Client::new())
            .post(&request)
            .await
            .expect("post");

        assert_eq!(resp.status, 429);
        assert!(resp.body.contains("account limited"));
        mock.assert_async().await;
    }
}
