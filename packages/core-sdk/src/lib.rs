pub mod config;
pub mod error;
pub mod function;
pub mod llm;
pub mod models;
pub mod recovery;
pub mod relay;
pub mod server;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::config::{ProviderConfig, ProviderKind};
    pub use crate::error::RelayError;
    pub use crate::function::{FunctionEvent, FunctionResult};
    pub use crate::llm::{ChatProvider, ReqwestTransport, Transport};
    pub use crate::models::{ChatHistory, ChatMessage, NormalizedReply, Role};
    pub use crate::relay::{Relay, RelayRequest, RelayResponse};
    pub use crate::{function, server, telemetry};
}
