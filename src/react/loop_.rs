//! ReAct 主循环（显式状态机）
//!
//! Reasoning → {ToolCalling → Observing → Reasoning}* → Responding；
//! 模型调用次数受 max_iterations 约束，外层 deadline 与取消令牌随时可把本轮转入 Aborted。
//! 一个批次内的调用并发执行并全部跑完（包括失败的），批次之间严格有序。

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::core::{AbortReason, AgentTurnState, RecoveryAction, RecoveryEngine, TaskScheduler, TurnPhase};
use crate::memory::{HistoryEntry, Message};
use crate::observability::{TraceEmitter, TraceEventKind};
use crate::react::planner::{parse_model_output, ModelAction, Planner, ProposedCall};
use crate::tools::{ToolCallRecord, ToolCatalog, ToolInvoker};

/// 模型给出空回答时的兜底文本
pub const EMPTY_ANSWER_FALLBACK: &str = "I was unable to generate a response. Please try again.";
/// Aborted 时回答的前缀，标明这是不完整的结论
pub const PARTIAL_ANSWER_PREFIX: &str = "[partial answer]";

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub max_iterations: usize,
    pub turn_deadline: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            turn_deadline: Duration::from_secs(180),
        }
    }
}

/// 一轮请求的输入
pub struct TurnRequest<'a> {
    pub directive: String,
    pub history: &'a [HistoryEntry],
    pub message: &'a str,
    pub catalog: &'a ToolCatalog,
}

/// 一轮的结果：文本一定非空
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub text: String,
    /// 按发出顺序排列（跨批次）
    pub records: Vec<ToolCallRecord>,
    pub phase: TurnPhase,
    /// 实际发起的模型调用次数
    pub iterations: usize,
}

impl TurnOutcome {
    pub fn is_partial(&self) -> bool {
        self.phase.is_aborted()
    }
}

/// 状态机的下一步
enum Step {
    Reason,
    Dispatch(Vec<ProposedCall>),
    Respond(String),
    Abort(AbortReason),
}

/// 本轮可变工作区；deadline / 取消打断时仍可从中拼出部分回答
struct TurnWork {
    state: AgentTurnState,
    records: Vec<ToolCallRecord>,
    next_seq: usize,
    last_thought: Option<String>,
    consulted: Vec<String>,
    model_error: Option<String>,
}

/// ReAct 会话配置
pub struct ReactSession<'a> {
    pub planner: &'a Planner,
    pub invoker: &'a ToolInvoker,
    pub recovery: &'a RecoveryEngine,
    pub scheduler: &'a TaskScheduler,
    pub cancel_token: CancellationToken,
    pub settings: LoopSettings,
}

impl<'a> ReactSession<'a> {
    pub fn new(
        planner: &'a Planner,
        invoker: &'a ToolInvoker,
        recovery: &'a RecoveryEngine,
        scheduler: &'a TaskScheduler,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            planner,
            invoker,
            recovery,
            scheduler,
            cancel_token,
            settings: LoopSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 执行一轮；永远返回带文本的结果，失败都体现在 phase 上
    pub async fn run_turn(&self, req: TurnRequest<'_>, trace: &TraceEmitter) -> TurnOutcome {
        let mut messages = Vec::with_capacity(req.history.len() + 2);
        messages.push(Message::system(req.directive));
        messages.extend(req.history.iter().filter_map(HistoryEntry::to_message));
        messages.push(Message::user(req.message));

        let mut work = TurnWork {
            state: AgentTurnState::new(messages, self.settings.max_iterations),
            records: Vec::new(),
            next_seq: 1,
            last_thought: None,
            consulted: Vec::new(),
            model_error: None,
        };

        let finished = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(AbortReason::Cancelled),
            _ = tokio::time::sleep(self.settings.turn_deadline) => Err(AbortReason::DeadlineExceeded),
            r = self.drive(&mut work, req.catalog, trace) => r,
        };

        let text = match finished {
            Ok(text) => text,
            Err(reason) => {
                work.state.transition(TurnPhase::Aborted { reason });
                tracing::warn!(
                    ?reason,
                    iterations = work.state.iteration,
                    tool_calls = work.records.len(),
                    "turn aborted"
                );
                self.partial_answer(reason, &work)
            }
        };

        trace.emit(TraceEventKind::TurnFinished {
            phase: work.state.phase,
            iterations: work.state.iteration,
            tool_calls: work.records.len(),
            text: text.clone(),
        });

        TurnOutcome {
            text,
            records: work.records,
            phase: work.state.phase,
            iterations: work.state.iteration,
        }
    }

    async fn drive(
        &self,
        work: &mut TurnWork,
        catalog: &ToolCatalog,
        trace: &TraceEmitter,
    ) -> Result<String, AbortReason> {
        let mut step = Step::Reason;
        loop {
            step = match step {
                Step::Reason => self.reason(work, trace).await,
                Step::Dispatch(calls) => {
                    // 没有剩余的模型调用来读取结果时，不再发出这一批
                    if !work.state.can_reason() {
                        tracing::warn!(
                            skipped_calls = calls.len(),
                            iterations = work.state.iteration,
                            "iteration limit reached, final tool batch not dispatched"
                        );
                        Step::Abort(AbortReason::LoopExhausted)
                    } else {
                        self.dispatch(work, catalog, calls, trace).await;
                        Step::Reason
                    }
                }
                Step::Respond(text) => {
                    work.state.transition(TurnPhase::Responding);
                    return Ok(text);
                }
                Step::Abort(reason) => return Err(reason),
            };
        }
    }

    /// Reasoning：一次模型调用，决定回答、调用工具或纠正后重试
    async fn reason(&self, work: &mut TurnWork, trace: &TraceEmitter) -> Step {
        if !work.state.can_reason() {
            return Step::Abort(AbortReason::LoopExhausted);
        }
        work.state.transition(TurnPhase::Reasoning);
        work.state.iteration += 1;

        let started = Instant::now();
        let result = self.planner.plan(&work.state.messages).await;
        trace.emit(TraceEventKind::ModelCall {
            iteration: work.state.iteration,
            model: self.planner.model_name().to_string(),
            input: work.state.messages.clone(),
            output: result.as_ref().ok().cloned(),
            error: result.as_ref().err().map(|e| e.to_string()),
            latency_ms: started.elapsed().as_millis() as u64,
        });

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(error = %e, iteration = work.state.iteration, "model call failed");
                work.model_error = Some(e.to_string());
                return Step::Abort(AbortReason::ModelError);
            }
        };

        match parse_model_output(&output) {
            Ok(ModelAction::Respond(text)) => {
                if text.trim().is_empty() {
                    Step::Respond(EMPTY_ANSWER_FALLBACK.to_string())
                } else {
                    Step::Respond(text)
                }
            }
            Ok(ModelAction::CallTools { thought, calls }) => {
                if let Some(t) = thought {
                    tracing::debug!(thought = %t, "model thought");
                    work.last_thought = Some(t);
                }
                work.state.push(Message::assistant(output));
                Step::Dispatch(calls)
            }
            Err(err) => match self.recovery.handle(&err) {
                RecoveryAction::RetryWithPrompt(prompt) => {
                    tracing::warn!(error = %err, "unparseable model output, asking for a corrected action");
                    work.state.push(Message::assistant(output));
                    work.state.push(Message::user(prompt));
                    Step::Reason
                }
                RecoveryAction::Abort => {
                    work.model_error = Some(err.to_string());
                    Step::Abort(AbortReason::ModelError)
                }
            },
        }
    }

    /// ToolCalling → Observing：并发派发一整批，按发出顺序回灌观察
    async fn dispatch(
        &self,
        work: &mut TurnWork,
        catalog: &ToolCatalog,
        calls: Vec<ProposedCall>,
        trace: &TraceEmitter,
    ) {
        work.state.transition(TurnPhase::ToolCalling);
        work.state.batches += 1;
        let batch = work.state.batches;
        let first_seq = work.next_seq;
        work.next_seq += calls.len();
        tracing::info!(batch, calls = calls.len(), "dispatching tool batch");

        let pending = calls.into_iter().enumerate().map(|(i, call)| async move {
            let _permit = self.scheduler.acquire_tool().await;
            self.invoker
                .invoke(catalog, &call.tool, call.args, batch, first_seq + i)
                .await
        });
        let invocations = join_all(pending).await;

        work.state.transition(TurnPhase::Observing);
        for inv in invocations {
            let observation = inv.observation();
            match &inv.record {
                Some(record) => trace.emit(TraceEventKind::ToolCall {
                    batch: record.batch,
                    seq: record.seq,
                    tool: record.tool.clone(),
                    provider: record.provider.clone(),
                    arguments: record.arguments.clone(),
                    result: inv.result.as_ref().ok().cloned(),
                    error: record.error.clone(),
                    latency_ms: record.latency_ms,
                }),
                None => trace.routing(
                    "unknown_tool",
                    serde_json::json!({ "tool": inv.tool, "batch": batch, "error": observation }),
                ),
            }
            if !work.consulted.contains(&inv.tool) {
                work.consulted.push(inv.tool.clone());
            }
            work.state.push(Message::observation(&inv.tool, &observation));
            if let Some(record) = inv.record {
                work.records.push(record);
            }
        }
    }

    fn partial_answer(&self, reason: AbortReason, work: &TurnWork) -> String {
        let why = match reason {
            AbortReason::LoopExhausted => format!(
                "the investigation reached its limit of {} reasoning steps before a final answer",
                work.state.max_iterations
            ),
            AbortReason::DeadlineExceeded => format!(
                "the investigation did not finish within {}s",
                self.settings.turn_deadline.as_secs()
            ),
            AbortReason::Cancelled => "the request was cancelled".to_string(),
            AbortReason::ModelError => match &work.model_error {
                Some(e) => format!("the language model failed ({})", e),
                None => "the language model failed".to_string(),
            },
        };
        let mut text = format!("{} I could not complete this answer: {}.", PARTIAL_ANSWER_PREFIX, why);
        if let Some(thought) = &work.last_thought {
            text.push_str(&format!(" Last reasoning step: {}.", thought.trim_end_matches('.')));
        }
        if !work.consulted.is_empty() {
            text.push_str(&format!(" Tools consulted so far: {}.", work.consulted.join(", ")));
        }
        text.push_str(" Please narrow the question or try again.");
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::llm::{LlmError, ScriptedLlmClient};
    use crate::mcp::ProviderManager;
    use crate::observability::{MemorySink, TraceContext};

    struct Fixture {
        planner: Planner,
        invoker: ToolInvoker,
        recovery: RecoveryEngine,
        scheduler: TaskScheduler,
        sink: Arc<MemorySink>,
    }

    impl Fixture {
        fn new(llm: Arc<ScriptedLlmClient>) -> Self {
            Self {
                planner: Planner::new(llm),
                invoker: ToolInvoker::new(Arc::new(ProviderManager::new()), 5, 500),
                recovery: RecoveryEngine::new(),
                scheduler: TaskScheduler::new(2),
                sink: Arc::new(MemorySink::new()),
            }
        }

        fn session(&self, max_iterations: usize) -> ReactSession<'_> {
            ReactSession::new(
                &self.planner,
                &self.invoker,
                &self.recovery,
                &self.scheduler,
                CancellationToken::new(),
            )
            .with_settings(LoopSettings {
                max_iterations,
                turn_deadline: Duration::from_secs(5),
            })
        }

        fn emitter(&self) -> TraceEmitter {
            TraceEmitter::new(self.sink.clone(), TraceContext::new("conv", "db-07", None))
        }
    }

    fn request<'a>(catalog: &'a ToolCatalog, history: &'a [HistoryEntry]) -> TurnRequest<'a> {
        TurnRequest {
            directive: "directive".to_string(),
            history,
            message: "what is the connection count?",
            catalog,
        }
    }

    #[tokio::test]
    async fn test_direct_answer() {
        let llm = Arc::new(ScriptedLlmClient::new(["There are 12 connections."]));
        let fx = Fixture::new(llm.clone());
        let catalog = ToolCatalog::new();
        let history = [HistoryEntry::user("hi"), HistoryEntry::assistant("hello")];
        let out = fx.session(4).run_turn(request(&catalog, &history), &fx.emitter()).await;

        assert_eq!(out.phase, TurnPhase::Responding);
        assert_eq!(out.text, "There are 12 connections.");
        assert_eq!(out.iterations, 1);
        let prompt = &llm.prompts()[0];
        assert_eq!(prompt.len(), 4);
        assert_eq!(prompt[0], Message::system("directive"));
        assert_eq!(prompt[3], Message::user("what is the connection count?"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_observed_without_record() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool": "mysql__query", "args": {"q": 1}}"#,
            "No such tool, sorry.",
        ]));
        let fx = Fixture::new(llm.clone());
        let catalog = ToolCatalog::new();
        let out = fx.session(4).run_turn(request(&catalog, &[]), &fx.emitter()).await;

        assert_eq!(out.phase, TurnPhase::Responding);
        assert!(out.records.is_empty());
        let second = &llm.prompts()[1];
        let last = second.last().unwrap();
        assert!(last.content.starts_with("Observation from mysql__query: Error [unknown_tool]"));

        let events = fx.sink.events();
        assert!(events.iter().any(|e| matches!(&e.kind, TraceEventKind::Routing { decision, .. } if decision == "unknown_tool")));
    }

    #[tokio::test]
    async fn test_loop_exhaustion_returns_partial_text() {
        let llm = Arc::new(ScriptedLlmClient::repeating(
            r#"{"thought": "keep digging", "tool_calls": [{"tool": "nope", "args": {}}]}"#,
        ));
        let fx = Fixture::new(llm.clone());
        let catalog = ToolCatalog::new();
        let out = fx.session(3).run_turn(request(&catalog, &[]), &fx.emitter()).await;

        assert_eq!(
            out.phase,
            TurnPhase::Aborted {
                reason: AbortReason::LoopExhausted
            }
        );
        assert_eq!(out.iterations, 3);
        assert_eq!(llm.calls(), 3);
        assert!(out.text.starts_with(PARTIAL_ANSWER_PREFIX));
        assert!(out.text.contains("keep digging"));
        assert!(out.is_partial());
        // 第三次提议的批次没有后续模型调用，不再派发
        let dispatched = fx
            .sink
            .events()
            .iter()
            .filter(|e| matches!(&e.kind, TraceEventKind::Routing { decision, .. } if decision == "unknown_tool"))
            .count();
        assert_eq!(dispatched, 2);
    }

    /// 第一次调用提议工具，之后的调用一直挂起
    struct StallAfterFirst {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl crate::llm::LlmClient for StallAfterFirst {
        async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
            if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                return Ok(r#"{"thought": "check pg_up", "tool_calls": [{"tool": "prometheus__execute_query", "args": {"query": "pg_up"}}]}"#.to_string());
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("too late".to_string())
        }
    }

    #[tokio::test]
    async fn test_turn_deadline_aborts_and_keeps_records() {
        let llm = Arc::new(StallAfterFirst {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let fx = Fixture {
            planner: Planner::new(llm),
            invoker: ToolInvoker::new(Arc::new(ProviderManager::new()), 5, 500),
            recovery: RecoveryEngine::new(),
            scheduler: TaskScheduler::new(2),
            sink: Arc::new(MemorySink::new()),
        };
        let mut catalog = ToolCatalog::new();
        catalog.insert_provider(
            "prometheus",
            &[crate::mcp::ToolDescriptor {
                name: "execute_query".to_string(),
                description: Some("Run PromQL".to_string()),
                input_schema: serde_json::json!({"type": "object", "required": ["query"]}),
            }],
        );
        let session = fx.session(8).with_settings(LoopSettings {
            max_iterations: 8,
            turn_deadline: Duration::from_millis(300),
        });

        let started = Instant::now();
        let out = session.run_turn(request(&catalog, &[]), &fx.emitter()).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            out.phase,
            TurnPhase::Aborted {
                reason: AbortReason::DeadlineExceeded
            }
        );
        assert!(out.is_partial());
        assert!(out.text.starts_with(PARTIAL_ANSWER_PREFIX));
        assert!(out.text.contains("check pg_up"));
        // 已完成批次的记录保留（提供方未注册，记录为 ProviderUnavailable）
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].tool, "prometheus__execute_query");
        assert!(!out.records[0].is_ok());
        assert_eq!(out.iterations, 2);
    }

    #[tokio::test]
    async fn test_parse_error_retries_with_corrective_prompt() {
        let llm = Arc::new(ScriptedLlmClient::new([r#"{"tool": "x", "args": {"#, "Fine."]));
        let fx = Fixture::new(llm.clone());
        let catalog = ToolCatalog::new();
        let out = fx.session(4).run_turn(request(&catalog, &[]), &fx.emitter()).await;

        assert_eq!(out.text, "Fine.");
        assert_eq!(out.iterations, 2);
        let retry_prompt = llm.prompts()[1].last().unwrap().content.clone();
        assert!(retry_prompt.contains("tool_calls"));
    }

    #[tokio::test]
    async fn test_model_error_aborts() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
        llm.push_error(LlmError::Request("503".into()));
        let fx = Fixture::new(llm);
        let catalog = ToolCatalog::new();
        let out = fx.session(4).run_turn(request(&catalog, &[]), &fx.emitter()).await;

        assert_eq!(
            out.phase,
            TurnPhase::Aborted {
                reason: AbortReason::ModelError
            }
        );
        assert!(!out.text.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_turn() {
        let llm = Arc::new(ScriptedLlmClient::repeating("answer"));
        let fx = Fixture::new(llm.clone());
        let catalog = ToolCatalog::new();
        let token = CancellationToken::new();
        token.cancel();
        let mut session = fx.session(4);
        session.cancel_token = token;
        let out = session.run_turn(request(&catalog, &[]), &fx.emitter()).await;

        assert_eq!(
            out.phase,
            TurnPhase::Aborted {
                reason: AbortReason::Cancelled
            }
        );
        assert_eq!(llm.calls(), 0);
        assert!(out.text.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_empty_answer_uses_fallback() {
        let llm = Arc::new(ScriptedLlmClient::new(["   "]));
        let fx = Fixture::new(llm);
        let catalog = ToolCatalog::new();
        let out = fx.session(2).run_turn(request(&catalog, &[]), &fx.emitter()).await;
        assert_eq!(out.text, EMPTY_ANSWER_FALLBACK);
    }
}
