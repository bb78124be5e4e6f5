//! 单轮推理的状态机定义
//!
//! Reasoning → {ToolCalling → Observing → Reasoning}* → Responding；
//! 迭代耗尽、整轮超时、取消或模型不可用时进入 Aborted。

use serde::Serialize;

use crate::memory::Message;

/// 进入 Aborted 的原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// 达到最大推理迭代数仍无最终回答
    LoopExhausted,
    /// 整轮外层 deadline 到期
    DeadlineExceeded,
    /// 调用方取消
    Cancelled,
    /// 模型调用失败且不可恢复
    ModelError,
}

/// 状态机阶段（对外可观察的标签，不携带数据）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TurnPhase {
    Reasoning,
    ToolCalling,
    Observing,
    Responding,
    Aborted { reason: AbortReason },
}

impl TurnPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnPhase::Responding | TurnPhase::Aborted { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TurnPhase::Aborted { .. })
    }
}

/// 单个请求内的工作状态；只归 ReAct 循环所有，请求结束即丢弃
#[derive(Clone, Debug)]
pub struct AgentTurnState {
    /// system + 历史 + 本轮用户消息 + 工具观察
    pub messages: Vec<Message>,
    /// 已发起的模型调用次数
    pub iteration: usize,
    pub max_iterations: usize,
    /// 已派发的工具批次数
    pub batches: usize,
    pub phase: TurnPhase,
}

impl AgentTurnState {
    pub fn new(messages: Vec<Message>, max_iterations: usize) -> Self {
        Self {
            messages,
            iteration: 0,
            max_iterations: max_iterations.max(1),
            batches: 0,
            phase: TurnPhase::Reasoning,
        }
    }

    /// 是否还能再发起一次模型调用
    pub fn can_reason(&self) -> bool {
        self.iteration < self.max_iterations
    }

    pub fn transition(&mut self, next: TurnPhase) {
        if self.phase != next {
            tracing::debug!(from = ?self.phase, to = ?next, iteration = self.iteration, "turn transition");
        }
        self.phase = next;
    }

    pub fn is_terminated(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_budget() {
        let mut state = AgentTurnState::new(vec![Message::system("s")], 2);
        assert!(state.can_reason());
        state.iteration += 1;
        assert!(state.can_reason());
        state.iteration += 1;
        assert!(!state.can_reason());
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let state = AgentTurnState::new(Vec::new(), 0);
        assert_eq!(state.max_iterations, 1);
    }

    #[test]
    fn test_terminal_phases() {
        let mut state = AgentTurnState::new(Vec::new(), 3);
        assert!(!state.is_terminated());
        state.transition(TurnPhase::ToolCalling);
        assert!(!state.is_terminated());
        state.transition(TurnPhase::Aborted {
            reason: AbortReason::LoopExhausted,
        });
        assert!(state.is_terminated());
        assert!(state.phase.is_aborted());
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_value(TurnPhase::Aborted {
            reason: AbortReason::DeadlineExceeded,
        })
        .unwrap();
        assert_eq!(json["phase"], "aborted");
        assert_eq!(json["reason"], "deadline_exceeded");
    }
}
