use std::sync::Arc;

use axum::http::{
    header::{
        ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
        CONTENT_TYPE,
    },
    HeaderMap, HeaderValue, Method, StatusCode,
};
use serde_json::Value;

use crate::{
    config::ProviderConfig,
    error::RelayError,
    llm::{select_provider, ReqwestTransport, Transport},
    models::{parse_history, ChatMessage, NormalizedReply},
    recovery::{self, ProviderFailure, RecoveryRule, DEFAULT_RULES},
    telemetry,
};

/**
 * \brief 平台无关的入站请求。
 */
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl RelayRequest {
    pub fn new(method: Method, body: Option<String>) -> Self {
        Self {
            method,
            headers: HeaderMap::new(),
            body,
        }
    }

    /**
     * \brief 以 POST 方式携带 JSON 请求体。
     */
    pub fn post(body: impl Into<String>) -> Self {
        Self::new(Method::POST, Some(body.into()))
    }
}

/**
 * \brief 平台无关的响应；body 为 None 表示无响应体。
 */
#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl RelayResponse {
    fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: cors_headers(),
            body: None,
        }
    }

    fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut headers = cors_headers();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self {
            status,
            headers,
            body: Some(body.into()),
        }
    }

    fn json(body: String) -> Self {
        let mut headers = cors_headers();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            status: StatusCode::OK,
            headers,
            body: Some(body),
        }
    }

    /**
     * \brief 将成功响应体解析为 NormalizedReply。
     */
    pub fn reply(&self) -> Option<NormalizedReply> {
        if self.status != StatusCode::OK {
            return None;
        }
        serde_json::from_str(self.body.as_deref()?).ok()
    }
}

/**
 * \brief 每个响应都携带的 CORS 头。
 */
pub fn cors_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers
}

/**
 * \brief 聊天中继：持有部署配置与出站通道，本身无可变状态。
 */
#[derive(Clone)]
pub struct Relay {
    config: Arc<ProviderConfig>,
    transport: Arc<dyn Transport>,
    rules: Arc<[RecoveryRule]>,
}

impl Relay {
    pub fn new(config: ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            rules: Arc::from(DEFAULT_RULES),
        }
    }

    /**
     * \brief 使用环境变量配置与共享 HTTP Client 构建中继。
     */
    pub fn from_env() -> Result<Self, RelayError> {
        let config = ProviderConfig::from_env()?;
        Ok(Self::new(config, Arc::new(ReqwestTransport::shared())))
    }

    /**
     * \brief 替换降级规则表。
     */
    pub fn with_rules(mut self, rules: Vec<RecoveryRule>) -> Self {
        self.rules = Arc::from(rules);
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /**
     * \brief 处理一次入站请求：方法校验、解析历史、转发并归一化结果。
     */
    pub async fn handle(&self, request: RelayRequest) -> RelayResponse {
        if request.method == Method::OPTIONS {
            return RelayResponse::empty(StatusCode::NO_CONTENT);
        }
        if request.method != Method::POST {
            return RelayResponse::text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        }

        let history = parse_history(request.body.as_deref());
        match self.chat(&history).await {
            Ok(reply) => match serde_json::to_string(&reply) {
                Ok(body) => RelayResponse::json(body),
                Err(e) => RelayResponse::text(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    RelayError::from(e).to_string(),
                ),
            },
            Err(e) => {
                if e.is_configuration() {
                    telemetry::log_error("relay", &e.to_string());
                } else {
                    telemetry::log_warn("relay", &e.to_string());
                }
                RelayResponse::text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }

    /**
     * \brief 将历史发送至已配置的后端，返回归一化回复。
     *
     * 凭据缺失时不发出任何请求；配额与模型类失败降级为说明性回复。
     */
    pub async fn chat(&self, history: &[ChatMessage]) -> Result<NormalizedReply, RelayError> {
        let provider = select_provider(&self.config)?;
        let request = provider.build_request(history)?;
        telemetry::log_event(
            "relay",
            &format!(
                "provider={} model={} msgs={}",
                provider.kind(),
                provider.model(),
                history.len()
            ),
        );

        let resp = self.transport.post(&request).await?;
        if !resp.is_success() {
            let recovered = {
                let failure = ProviderFailure::new(resp.status, &resp.body);
                recovery::classify(&self.rules, provider.kind(), &failure)
            };
            if let Some(action) = recovered {
                telemetry::log_warn(
                    "relay",
                    &format!(
                        "provider={} status={} recovered as {:?}",
                        provider.kind(),
                        resp.status,
                        action
                    ),
                );
                return Ok(NormalizedReply {
                    reply: recovery::render(action, &self.config),
                });
            }
            return Err(RelayError::Provider {
                provider: provider.kind().display_name(),
                status: resp.status,
                body: resp.body,
            });
        }

        let v: Value = serde_json::from_str(&resp.body)?;
        let reply = provider.extract_reply(&v);
        telemetry::log_event(
            "relay",
            &format!("provider={} reply_len={}", provider.kind(), reply.len()),
        );
        Ok(NormalizedReply { reply })
    }
}
