//! Conversation turn orchestration.
//!
//! One `send_turn` call drives a complete exchange: validate the
//! message, resolve slash-command presets, check the token budget,
//! obtain a cache handle (or fall back to inline file references),
//! then loop with the backend until it answers with text instead of
//! tool calls. Tool sub-exchanges stay inside the turn; only the
//! finished turn is appended to the transcript.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use docshelf_core::artifact::FileSet;
use docshelf_core::backend::{ReasoningDepth, TurnRequest, Usage};
use docshelf_core::error::TurnError;
use docshelf_core::message::{Message, Transcript};
use docshelf_core::tool::{ToolCall, ToolRegistry, ToolResult};
use docshelf_core::validate::validate_message;
use docshelf_core::Backend;

use crate::budget::{estimate_tokens, BudgetTracker};
use crate::cache::CacheManager;
use crate::presets::{self, Resolved, DEFAULT_SYSTEM_PROMPT};

/// The finished product of one turn.
#[derive(Debug, Clone)]
pub struct AssistantReply {
    pub text: String,
    /// Usage from the final backend request of the turn, when reported.
    pub usage: Option<Usage>,
    /// Depth the turn actually ran at.
    pub depth: ReasoningDepth,
    /// Preset mode label, e.g. "REPORT MODE", when a preset was active.
    pub mode: Option<&'static str>,
    /// Whether the request went out with a context cache handle.
    pub used_cache: bool,
    /// Number of tool rounds the turn took before the final answer.
    pub tool_rounds: u32,
}

/// Drives conversation turns against the backend.
pub struct TurnOrchestrator {
    backend: Arc<dyn Backend>,
    files: Arc<RwLock<FileSet>>,
    cache: Arc<CacheManager>,
    budget: BudgetTracker,
    tools: Arc<ToolRegistry>,
    transcript: Arc<Mutex<Transcript>>,
    model: String,
    tool_iteration_limit: u32,
}

impl TurnOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn Backend>,
        files: Arc<RwLock<FileSet>>,
        cache: Arc<CacheManager>,
        budget: BudgetTracker,
        tools: Arc<ToolRegistry>,
        transcript: Arc<Mutex<Transcript>>,
        model: impl Into<String>,
        tool_iteration_limit: u32,
    ) -> Self {
        Self {
            backend,
            files,
            cache,
            budget,
            tools,
            transcript,
            model: model.into(),
            tool_iteration_limit,
        }
    }

    /// Run one complete turn. `depth_override` wins over both the
    /// preset's depth and the baseline default.
    pub async fn send_turn(
        &self,
        input: &str,
        depth_override: Option<ReasoningDepth>,
    ) -> std::result::Result<AssistantReply, TurnError> {
        let text = validate_message(input)?;

        let (system_prompt, preset_depth, mode) = match presets::resolve(&text) {
            Resolved::Help(help) => {
                // Answered locally; the backend never sees it and the
                // transcript does not grow.
                return Ok(AssistantReply {
                    text: help.to_string(),
                    usage: None,
                    depth: depth_override.unwrap_or_default(),
                    mode: None,
                    used_cache: false,
                    tool_rounds: 0,
                });
            }
            Resolved::Preset { system_prompt, depth, .. } => {
                (system_prompt, Some(depth), presets::indicator(&text))
            }
            Resolved::Chat => (DEFAULT_SYSTEM_PROMPT, None, None),
        };
        let depth = depth_override.or(preset_depth).unwrap_or_default();

        // Holding the transcript lock for the whole turn serializes
        // concurrent sends; tool sub-exchanges must not interleave.
        let mut transcript = self.transcript.lock().await;

        {
            let files = self.files.read().await;
            match self.budget.admit(&files, &transcript, estimate_tokens(&text)) {
                crate::budget::Admission::Ok(snapshot) => {
                    debug!(
                        total = snapshot.total(),
                        max = snapshot.max_tokens,
                        "Budget admitted turn"
                    );
                }
                crate::budget::Admission::OverBudget { excess, .. } => {
                    return Err(TurnError::OverBudget { excess });
                }
            }
        }

        let (cached_content, inline_files) = match self.cache.get_valid_handle().await {
            Ok(handle) => (handle, Vec::new()),
            Err(e) => {
                // Degraded mode: the turn still goes out, referencing
                // the uploaded files directly.
                warn!(error = %e, "Cache unavailable, falling back to inline file references");
                (None, self.files.read().await.ready_handles())
            }
        };
        let used_cache = cached_content.is_some();

        let mut working: Vec<Message> = transcript.messages.clone();
        let user_message = Message::user(text);
        working.push(user_message.clone());
        // Messages produced during this turn, appended to the
        // transcript only once the turn finishes.
        let mut turn_messages: Vec<Message> = vec![user_message];

        let mut rounds: u32 = 0;
        loop {
            let request = TurnRequest {
                model: self.model.clone(),
                system_prompt: system_prompt.to_string(),
                messages: working.clone(),
                cached_content: cached_content.clone(),
                inline_files: inline_files.clone(),
                tools: self.tools.definitions(),
                reasoning_depth: depth,
            };
            let response = self.backend.generate(request).await?;

            if response.tool_calls.is_empty() {
                let assistant = Message::assistant(response.text.clone());
                turn_messages.push(assistant);
                for message in turn_messages {
                    transcript.push(message);
                }
                info!(rounds, used_cache, "Turn complete");
                return Ok(AssistantReply {
                    text: response.text,
                    usage: response.usage,
                    depth,
                    mode,
                    used_cache,
                    tool_rounds: rounds,
                });
            }

            rounds += 1;
            if rounds > self.tool_iteration_limit {
                return Err(TurnError::ToolLoopExceeded { limit: self.tool_iteration_limit });
            }

            let mut assistant = Message::assistant(response.text.clone());
            assistant.tool_calls = response.tool_calls.clone();
            working.push(assistant.clone());
            turn_messages.push(assistant);

            for call in &response.tool_calls {
                debug!(tool = %call.name, call_id = %call.id, round = rounds, "Executing tool");
                let result = self.execute_tool(call).await;
                let content = serde_json::to_string(&result)
                    .unwrap_or_else(|_| result.output.clone());
                let message = Message::tool_result(call.id.clone(), content);
                working.push(message.clone());
                turn_messages.push(message);
            }
        }
    }

    /// Execute one tool call. Failures become unsuccessful results the
    /// backend can read and recover from; they never abort the turn.
    async fn execute_tool(&self, call: &docshelf_core::MessageToolCall) -> ToolResult {
        let tool_call = ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        };
        match self.tools.execute(&tool_call).await {
            Ok(mut result) => {
                result.call_id = call.id.clone();
                result
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                ToolResult {
                    call_id: call.id.clone(),
                    success: false,
                    output: e.to_string(),
                    data: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docshelf_core::artifact::{Artifact, ArtifactSource, MediaCategory, RemoteFile};
    use docshelf_core::backend::{CacheHandle, CountRequest, ToolDefinition, TurnResponse};
    use docshelf_core::error::{BackendError, ToolError};
    use docshelf_core::message::MessageToolCall;
    use docshelf_core::tool::Tool;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Backend that replays scripted responses and records requests.
    struct ScriptedBackend {
        responses: StdMutex<VecDeque<TurnResponse>>,
        requests: StdMutex<Vec<TurnRequest>>,
        fail_cache: bool,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<TurnResponse>) -> Self {
            Self {
                responses: StdMutex::new(responses.into()),
                requests: StdMutex::new(Vec::new()),
                fail_cache: false,
            }
        }

        fn text_response(text: &str) -> TurnResponse {
            TurnResponse {
                text: text.into(),
                tool_calls: vec![],
                usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }),
                model: "test-model".into(),
            }
        }

        fn tool_response(name: &str, id: &str) -> TurnResponse {
            TurnResponse {
                text: String::new(),
                tool_calls: vec![MessageToolCall {
                    id: id.into(),
                    name: name.into(),
                    arguments: serde_json::json!({"text": "ping"}),
                }],
                usage: None,
                model: "test-model".into(),
            }
        }

        fn requests(&self) -> Vec<TurnRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn upload(
            &self,
            _bytes: Vec<u8>,
            mime_type: &str,
            _display_name: &str,
        ) -> std::result::Result<RemoteFile, BackendError> {
            Ok(RemoteFile { uri: "files/x".into(), mime_type: mime_type.into() })
        }

        async fn count_tokens(&self, _request: CountRequest) -> std::result::Result<u64, BackendError> {
            Ok(100)
        }

        async fn create_cache(
            &self,
            _model: &str,
            _files: &[RemoteFile],
            _ttl: Duration,
        ) -> std::result::Result<CacheHandle, BackendError> {
            if self.fail_cache {
                return Err(BackendError::CacheCreateFailed("no cache today".into()));
            }
            Ok(CacheHandle("cachedContents/script".into()))
        }

        async fn delete_cache(&self, _handle: &CacheHandle) -> std::result::Result<(), BackendError> {
            Ok(())
        }

        async fn generate(&self, request: TurnRequest) -> std::result::Result<TurnResponse, BackendError> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| BackendError::MalformedResponse("script exhausted".into()))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError> {
            Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: arguments["text"].as_str().unwrap_or("").to_string(),
                data: None,
            })
        }
    }

    struct Fixture {
        orchestrator: TurnOrchestrator,
        backend: Arc<ScriptedBackend>,
        transcript: Arc<Mutex<Transcript>>,
    }

    fn fixture(backend: ScriptedBackend, ready_files: usize, max_tokens: u64) -> Fixture {
        let backend = Arc::new(backend);
        let mut set = FileSet::new(50);
        for i in 0..ready_files {
            let a = Artifact::new(
                ArtifactSource::Path { path: PathBuf::from(format!("f{i}.pdf")) },
                MediaCategory::Document,
                "application/pdf",
            );
            let id = a.id.clone();
            set.insert(a).unwrap();
            set.mark_ready(
                &id,
                RemoteFile { uri: format!("files/f{i}"), mime_type: "application/pdf".into() },
                50,
            );
        }
        let files = Arc::new(RwLock::new(set));
        let cache = Arc::new(CacheManager::new(
            Arc::clone(&backend) as Arc<dyn Backend>,
            Arc::clone(&files),
            "test-model",
            Duration::from_secs(3600),
        ));
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(EchoTool));
        let transcript = Arc::new(Mutex::new(Transcript::new()));
        let orchestrator = TurnOrchestrator::new(
            Arc::clone(&backend) as Arc<dyn Backend>,
            files,
            cache,
            BudgetTracker::new(max_tokens),
            Arc::new(tools),
            Arc::clone(&transcript),
            "test-model",
            4,
        );
        Fixture { orchestrator, backend, transcript }
    }

    #[tokio::test]
    async fn plain_turn_appends_user_and_assistant() {
        let fx = fixture(
            ScriptedBackend::new(vec![ScriptedBackend::text_response("The report says yes.")]),
            0,
            1_000_000,
        );

        let reply = fx.orchestrator.send_turn("what does the report say?", None).await.unwrap();
        assert_eq!(reply.text, "The report says yes.");
        assert_eq!(reply.tool_rounds, 0);
        assert!(!reply.used_cache);
        assert!(reply.usage.is_some());

        let transcript = fx.transcript.lock().await;
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages[0].content, "what does the report say?");
    }

    #[tokio::test]
    async fn help_answered_locally_without_backend() {
        let fx = fixture(ScriptedBackend::new(vec![]), 0, 1_000_000);

        let reply = fx.orchestrator.send_turn("/help", None).await.unwrap();
        assert!(reply.text.contains("/report"));
        assert!(fx.backend.requests().is_empty());
        assert!(fx.transcript.lock().await.is_empty());
    }

    #[tokio::test]
    async fn preset_sets_system_prompt_and_depth() {
        let fx = fixture(
            ScriptedBackend::new(vec![ScriptedBackend::text_response("## Executive Summary")]),
            0,
            1_000_000,
        );

        let reply = fx.orchestrator.send_turn("/report focus on Q3", None).await.unwrap();
        assert_eq!(reply.depth, ReasoningDepth::Medium);
        assert_eq!(reply.mode, Some("REPORT MODE"));

        let requests = fx.backend.requests();
        assert!(requests[0].system_prompt.contains("executive summarizer"));
        assert_eq!(requests[0].reasoning_depth, ReasoningDepth::Medium);
        // The command text itself rides along as the user message.
        assert!(requests[0].messages.last().unwrap().content.contains("/report focus on Q3"));
    }

    #[tokio::test]
    async fn depth_override_wins_over_preset() {
        let fx = fixture(
            ScriptedBackend::new(vec![ScriptedBackend::text_response("ok")]),
            0,
            1_000_000,
        );

        let reply = fx
            .orchestrator
            .send_turn("/report", Some(ReasoningDepth::Minimal))
            .await
            .unwrap();
        assert_eq!(reply.depth, ReasoningDepth::Minimal);
        assert_eq!(fx.backend.requests()[0].reasoning_depth, ReasoningDepth::Minimal);
    }

    #[tokio::test]
    async fn over_budget_turn_rejected_before_backend() {
        let fx = fixture(ScriptedBackend::new(vec![]), 1, 100);

        let err = fx.orchestrator.send_turn("hello there", None).await.unwrap_err();
        assert!(matches!(err, TurnError::OverBudget { .. }));
        assert!(fx.backend.requests().is_empty());
        assert!(fx.transcript.lock().await.is_empty());
    }

    #[tokio::test]
    async fn empty_message_rejected() {
        let fx = fixture(ScriptedBackend::new(vec![]), 0, 1_000_000);
        assert!(matches!(
            fx.orchestrator.send_turn("   ", None).await,
            Err(TurnError::EmptyMessage)
        ));
    }

    #[tokio::test]
    async fn turn_with_files_carries_cache_handle() {
        let fx = fixture(
            ScriptedBackend::new(vec![ScriptedBackend::text_response("answer")]),
            2,
            1_000_000,
        );

        let reply = fx.orchestrator.send_turn("summarize", None).await.unwrap();
        assert!(reply.used_cache);

        let requests = fx.backend.requests();
        assert_eq!(
            requests[0].cached_content,
            Some(CacheHandle("cachedContents/script".into()))
        );
        assert!(requests[0].inline_files.is_empty());
    }

    #[tokio::test]
    async fn cache_failure_falls_back_to_inline_files() {
        let mut backend =
            ScriptedBackend::new(vec![ScriptedBackend::text_response("degraded answer")]);
        backend.fail_cache = true;
        let fx = fixture(backend, 2, 1_000_000);

        let reply = fx.orchestrator.send_turn("summarize", None).await.unwrap();
        assert!(!reply.used_cache);
        assert_eq!(reply.text, "degraded answer");

        let requests = fx.backend.requests();
        assert!(requests[0].cached_content.is_none());
        assert_eq!(requests[0].inline_files.len(), 2);
    }

    #[tokio::test]
    async fn tool_round_folds_result_into_turn() {
        let fx = fixture(
            ScriptedBackend::new(vec![
                ScriptedBackend::tool_response("echo", "call_1"),
                ScriptedBackend::text_response("the echo said ping"),
            ]),
            0,
            1_000_000,
        );

        let reply = fx.orchestrator.send_turn("run the echo", None).await.unwrap();
        assert_eq!(reply.text, "the echo said ping");
        assert_eq!(reply.tool_rounds, 1);

        // Second request carries assistant tool_calls plus the result.
        let requests = fx.backend.requests();
        assert_eq!(requests.len(), 2);
        let second = &requests[1].messages;
        let assistant = second.iter().find(|m| !m.tool_calls.is_empty()).unwrap();
        assert_eq!(assistant.tool_calls[0].name, "echo");
        let tool_msg = second.iter().find(|m| m.tool_call_id.is_some()).unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
        assert!(tool_msg.content.contains("ping"));

        // Transcript: user, assistant(tool_calls), tool result, final.
        assert_eq!(fx.transcript.lock().await.len(), 4);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_failed_result() {
        let fx = fixture(
            ScriptedBackend::new(vec![
                ScriptedBackend::tool_response("nonexistent", "call_9"),
                ScriptedBackend::text_response("recovered"),
            ]),
            0,
            1_000_000,
        );

        let reply = fx.orchestrator.send_turn("try it", None).await.unwrap();
        assert_eq!(reply.text, "recovered");

        let requests = fx.backend.requests();
        let tool_msg = requests[1]
            .messages
            .iter()
            .find(|m| m.tool_call_id.is_some())
            .unwrap();
        assert!(tool_msg.content.contains("\"success\":false"));
        assert!(tool_msg.content.contains("not found"));
    }

    #[tokio::test]
    async fn tool_loop_limit_enforced() {
        let responses: Vec<TurnResponse> = (0..6)
            .map(|i| ScriptedBackend::tool_response("echo", &format!("call_{i}")))
            .collect();
        let fx = fixture(ScriptedBackend::new(responses), 0, 1_000_000);

        let err = fx.orchestrator.send_turn("loop forever", None).await.unwrap_err();
        assert!(matches!(err, TurnError::ToolLoopExceeded { limit: 4 }));
        // A failed turn leaves the transcript untouched.
        assert!(fx.transcript.lock().await.is_empty());
    }

    #[tokio::test]
    async fn tools_declared_on_every_request() {
        let fx = fixture(
            ScriptedBackend::new(vec![ScriptedBackend::text_response("ok")]),
            0,
            1_000_000,
        );
        fx.orchestrator.send_turn("hello", None).await.unwrap();

        let defs: Vec<ToolDefinition> = fx.backend.requests()[0].tools.clone();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }
}
