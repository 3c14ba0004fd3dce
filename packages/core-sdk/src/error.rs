use thiserror::Error;

/**
 * \brief 中继错误分类。除配额/模型两类可恢复错误外，其余均以 500 返回。
 */
#[derive(Debug, Error)]
pub enum RelayError {
    /** \brief 缺少必需的凭据环境变量，不会发出任何网络请求。 */
    #[error("Missing {0}")]
    MissingCredential(&'static str),

    /** \brief 未识别的 Provider 名称（部署配置错误）。 */
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /** \brief 网络层失败。URL 已剥离，避免查询参数中的 Key 外泄。 */
    #[error("Server error: {0}")]
    Transport(#[source] reqwest::Error),

    /** \brief Provider 成功响应无法解析为 JSON。 */
    #[error("Server error: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    /** \brief 凭据无法编码为 HTTP 头。 */
    #[error("Server error: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    /** \brief Provider 返回了不可恢复的非成功状态，保留原始响应体。 */
    #[error("{provider} error: {body}")]
    Provider {
        provider: &'static str,
        status: u16,
        body: String,
    },
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Transport(e.without_url())
    }
}

impl RelayError {
    /**
     * \brief 错误是否属于配置问题（凭据或 Provider 选择）。
     */
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RelayError::MissingCredential(_) | RelayError::UnknownProvider(_)
        )
    }
}
