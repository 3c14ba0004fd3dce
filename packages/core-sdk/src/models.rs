use serde::{Deserialize, Serialize};
use serde_json::Value;

/**
 * \brief 对话角色。未知角色一律按 user 处理。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn parse(raw: &str) -> Role {
        match raw.trim().to_ascii_lowercase().as_str() {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/**
 * \brief 消息结构，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /** \brief 角色：system/user/assistant */
    pub role: Role,
    /** \brief 内容 */
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /**
     * \brief 宽松解析单条消息；非对象返回 None。
     */
    pub fn from_value(v: &Value) -> Option<Self> {
        let obj = v.as_object()?;
        let role = obj
            .get("role")
            .and_then(|r| r.as_str())
            .map(Role::parse)
            .unwrap_or(Role::User);
        let content = match obj.get("content") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        Some(Self { role, content })
    }
}

/**
 * \brief 按会话顺序排列的聊天历史。
 */
pub type ChatHistory = Vec<ChatMessage>;

/**
 * \brief 解析请求体 `{ "messages": [...] }`。
 *
 * 空体、非法 JSON、缺少或非数组的 messages 均视为空历史。
 */
pub fn parse_history(body: Option<&str>) -> ChatHistory {
    let Some(raw) = body.map(str::trim).filter(|b| !b.is_empty()) else {
        return Vec::new();
    };
    let Ok(v) = serde_json::from_str::<Value>(raw) else {
        return Vec::new();
    };
    v.get("messages")
        .and_then(|m| m.as_array())
        .map(|arr| arr.iter().filter_map(ChatMessage::from_value).collect())
        .unwrap_or_default()
}

/**
 * \brief 唯一的成功响应结构。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedReply {
    pub reply: String,
}
