//! 推理层：system directive、模型动作解析、ReAct 状态机

pub mod loop_;
pub mod planner;
pub mod prompt;

pub use loop_::{
    LoopSettings, ReactSession, TurnOutcome, TurnRequest, EMPTY_ANSWER_FALLBACK, PARTIAL_ANSWER_PREFIX,
};
pub use planner::{parse_model_output, ModelAction, Planner, ProposedCall};
pub use prompt::{build_system_directive, TurnTarget};
