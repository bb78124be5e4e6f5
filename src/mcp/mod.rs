//! MCP 工具提供方：JSON-RPC 协议、stdio 传输、提供方连接与会话管理器

pub mod manager;
pub mod protocol;
pub mod provider;
pub mod transport;

pub use manager::{ProviderHealth, ProviderManager};
pub use protocol::{CallToolResult, ToolDescriptor};
pub use provider::{ConnectionError, Liveness, ToolProvider};
pub use transport::{RpcClient, RpcError};
