//! 核心层：错误与恢复、轮次状态机、工具并发调度

pub mod error;
pub mod recovery;
pub mod state;
pub mod task_scheduler;

pub use error::{AgentError, RecoveryAction, ToolError, ToolErrorKind};
pub use recovery::RecoveryEngine;
pub use state::{AbortReason, AgentTurnState, TurnPhase};
pub use task_scheduler::TaskScheduler;
