use std::collections::{BTreeMap, HashMap};

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::relay::{cors_headers, Relay, RelayRequest, RelayResponse};

/**
 * \brief 函数托管平台传入的事件。
 */
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionEvent {
    pub http_method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

/**
 * \brief 返回给托管平台的结果。204 时不含 body。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResult {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl FunctionEvent {
    /**
     * \brief 转为中继请求；方法名无法识别时返回 None。
     */
    pub fn to_request(&self) -> Option<RelayRequest> {
        let method = Method::from_bytes(self.http_method.trim().to_ascii_uppercase().as_bytes())
            .ok()?;
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        Some(RelayRequest {
            method,
            headers,
            body: self.decoded_body(),
        })
    }

    // Undecodable base64 is treated like a missing body.
    fn decoded_body(&self) -> Option<String> {
        let body = self.body.as_ref()?;
        if !self.is_base64_encoded {
            return Some(body.clone());
        }
        base64::engine::general_purpose::STANDARD
            .decode(body.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }
}

impl From<RelayResponse> for FunctionResult {
    fn from(resp: RelayResponse) -> Self {
        let headers = resp
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        Self {
            status_code: resp.status.as_u16(),
            headers,
            body: resp.body,
        }
    }
}

/**
 * \brief 处理一次函数调用事件。
 */
pub async fn invoke(relay: &Relay, event: &FunctionEvent) -> FunctionResult {
    match event.to_request() {
        Some(request) => relay.handle(request).await.into(),
        None => RelayResponse {
            status: StatusCode::METHOD_NOT_ALLOWED,
            headers: cors_headers(),
            body: Some("Method Not Allowed".to_string()),
        }
        .into(),
    }
}
