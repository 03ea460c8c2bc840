//! The master-agent pipeline: drains the event hub and mutates world state
//! through the LLM tool loop.
//!
//! Two scheduling modes: N per-event workers with no cross-worker ordering,
//! or a single batch-triage collector that groups, prioritises, and then
//! processes groups strictly sequentially.

use crate::conversation::ChatMessage;
use crate::error::Result;
use crate::events::{EventHub, InfraEvent};
use crate::llm::ChatModel;
use crate::tools::ToolRegistry;
use crate::triage::{fallback_groups, groups_from_response, EventGroup};
use crate::world::WorldState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_SYSTEM_PROMPT: &str = "You are the master agent of an agentic-infrastructure control plane. \
You watch infrastructure events, maintain a concise narrative world summary, and track incidents. \
Use the provided tools to read and update the world state, create or resolve incidents, and \
delegate to remote agents when needed. Incident ids are stable human-readable slugs.";

/// Upper bound on model turns within one tool loop.
const MAX_TURNS: usize = 8;

/// How events are scheduled out of the hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulingMode {
    /// N concurrent workers, one event per tool loop.
    PerEvent { workers: usize },
    /// One collector that triages batches before processing.
    BatchTriage {
        queue_threshold: usize,
        window: Duration,
    },
}

/// Pipeline tuning derived from the master-agent config record.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub mode: SchedulingMode,
    pub system_prompt: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: SchedulingMode::PerEvent { workers: 5 },
            system_prompt: None,
        }
    }
}

/// The running pipeline. Owned by the master-agent reconciler; shut down by
/// cancelling the token passed to [`MasterAgentPipeline::run`].
pub struct MasterAgentPipeline {
    hub: Arc<EventHub>,
    world: Arc<WorldState>,
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    config: PipelineConfig,
    llm_available: AtomicBool,
}

impl MasterAgentPipeline {
    pub fn new(
        hub: Arc<EventHub>,
        world: Arc<WorldState>,
        model: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            hub,
            world,
            model,
            tools,
            config,
            llm_available: AtomicBool::new(true),
        }
    }

    /// Whether the most recent model call succeeded.
    pub fn llm_available(&self) -> bool {
        self.llm_available.load(Ordering::Relaxed)
    }

    /// Drive the pipeline until the token fires. Workers finish their
    /// current tool loop before exiting.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        match self.config.mode {
            SchedulingMode::PerEvent { workers } => {
                let workers = workers.max(1);
                info!(workers, "starting per-event pipeline");
                let mut set = JoinSet::new();
                for worker in 0..workers {
                    let pipeline = self.clone();
                    let cancel = cancel.clone();
                    set.spawn(async move { pipeline.worker_loop(worker, cancel).await });
                }
                while set.join_next().await.is_some() {}
            }
            SchedulingMode::BatchTriage {
                queue_threshold,
                window,
            } => {
                let threshold = queue_threshold.max(1);
                let window = window.max(Duration::from_secs(1));
                info!(threshold, window_secs = window.as_secs(), "starting batch-triage pipeline");
                self.collector_loop(threshold, window, cancel).await;
            }
        }
        info!("pipeline stopped");
    }

    async fn worker_loop(&self, worker: usize, cancel: CancellationToken) {
        loop {
            let Some(event) = self.hub.pop(&cancel).await else {
                debug!(worker, "worker cancelled");
                return;
            };
            if let Err(e) = self.process_single_event(&event).await {
                error!(worker, event = %event.id, error = %e, "event processing failed");
            }
            self.world.increment_events(1);
        }
    }

    async fn collector_loop(&self, threshold: usize, window: Duration, cancel: CancellationToken) {
        let mut pending: Vec<InfraEvent> = Vec::new();
        let timer = tokio::time::sleep(window);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                popped = self.hub.pop(&cancel) => {
                    let Some(event) = popped else { return };
                    pending.push(event);
                    if pending.len() >= threshold {
                        pending.extend(self.hub.drain());
                        let batch = std::mem::take(&mut pending);
                        self.process_batch(batch).await;
                        timer.as_mut().reset(tokio::time::Instant::now() + window);
                    }
                }
                _ = &mut timer => {
                    pending.extend(self.hub.drain());
                    if !pending.is_empty() {
                        let batch = std::mem::take(&mut pending);
                        self.process_batch(batch).await;
                    }
                    timer.as_mut().reset(tokio::time::Instant::now() + window);
                }
            }
        }
    }

    async fn process_batch(&self, batch: Vec<InfraEvent>) {
        debug!(events = batch.len(), "processing batch");
        if batch.len() == 1 {
            if let Err(e) = self.process_single_event(&batch[0]).await {
                error!(event = %batch[0].id, error = %e, "event processing failed");
            }
            self.world.increment_events(1);
            return;
        }

        let groups = match self.triage(&batch).await {
            Some(groups) => groups,
            None => {
                warn!("triage unusable, falling back to one group per event");
                fallback_groups(&batch)
            }
        };

        // Groups run strictly sequentially, highest priority first.
        for group in groups {
            let events_in_group = group.events.len() as u64;
            if let Err(e) = self.process_group(&group).await {
                error!(group = %group.group_id, error = %e, "group processing failed");
            }
            self.world.increment_events(events_in_group);
        }
    }

    async fn triage(&self, batch: &[InfraEvent]) -> Option<Vec<EventGroup>> {
        let messages = vec![
            ChatMessage::System {
                content: self.system_prompt(),
            },
            ChatMessage::User {
                content: self.triage_prompt(batch),
            },
        ];
        match self.model.generate(&messages, &[]).await {
            Ok(response) => {
                self.llm_available.store(true, Ordering::Relaxed);
                groups_from_response(&response.content, batch)
            }
            Err(e) => {
                self.llm_available.store(false, Ordering::Relaxed);
                error!(error = %e, "triage call failed");
                None
            }
        }
    }

    async fn process_single_event(&self, event: &InfraEvent) -> Result<()> {
        let prompt = format!(
            "Current world summary:\n{}\n\nActive incidents:\n{}\n\nProcess this infrastructure event:\n{}",
            self.world.get_summary(),
            self.world.active_incidents_summary(),
            serde_json::to_string_pretty(event)?,
        );
        self.run_tool_loop(prompt).await
    }

    async fn process_group(&self, group: &EventGroup) -> Result<()> {
        let mut rendered = String::new();
        for event in &group.events {
            rendered.push_str(&serde_json::to_string(event)?);
            rendered.push('\n');
        }
        let prompt = format!(
            "Current world summary:\n{}\n\nActive incidents:\n{}\n\nProcess this group of related \
             infrastructure events.\nGroup: {} (severity {}, priority {})\nSummary: {}\nEvents in order:\n{}",
            self.world.get_summary(),
            self.world.active_incidents_summary(),
            group.group_id,
            group.severity,
            group.priority,
            group.summary,
            rendered,
        );
        self.run_tool_loop(prompt).await
    }

    fn system_prompt(&self) -> String {
        self.config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    }

    fn triage_prompt(&self, batch: &[InfraEvent]) -> String {
        let mut rendered = String::new();
        for event in batch {
            rendered.push_str(&serde_json::to_string(event).unwrap_or_default());
            rendered.push('\n');
        }
        format!(
            "Triage the following batch of infrastructure events. Group related events by root \
             cause and assign each group a priority (1 = most urgent) and an overall severity.\n\
             Respond with ONLY a JSON object of the form:\n\
             {{\"groups\": [{{\"group_id\": \"slug\", \"summary\": \"...\", \"priority\": 1, \
             \"severity\": \"critical\", \"event_ids\": [\"...\"]}}]}}\n\nEvents:\n{rendered}"
        )
    }

    /// The standard tool-calling protocol: model turn, execute tool calls,
    /// echo each tool-call id verbatim on its paired result, repeat until a
    /// non-tool-calling turn.
    async fn run_tool_loop(&self, prompt: String) -> Result<()> {
        let mut messages = vec![
            ChatMessage::System {
                content: self.system_prompt(),
            },
            ChatMessage::User { content: prompt },
        ];
        let definitions = self.tools.definitions();

        for _turn in 0..MAX_TURNS {
            let reply = match self.model.generate(&messages, &definitions).await {
                Ok(reply) => {
                    self.llm_available.store(true, Ordering::Relaxed);
                    reply
                }
                Err(e) => {
                    self.llm_available.store(false, Ordering::Relaxed);
                    return Err(e);
                }
            };

            if reply.tool_calls.is_empty() {
                debug!("tool loop complete");
                return Ok(());
            }

            let calls = reply.tool_calls.clone();
            messages.push(ChatMessage::Assistant {
                content: reply.content,
                tool_calls: reply.tool_calls,
            });
            for call in calls {
                let content = match self.tools.invoke(&call.name, call.arguments.clone()).await {
                    Ok(value) => value.to_string(),
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "tool invocation failed");
                        format!("{{\"error\": {}}}", serde_json::Value::String(e.to_string()))
                    }
                };
                // The id pairs this result with its call; it must survive
                // verbatim.
                messages.push(ChatMessage::ToolResult {
                    call_id: call.id,
                    content,
                });
            }
        }

        warn!("tool loop hit the turn limit");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ToolCall;
    use crate::events::Severity;
    use crate::llm::{LlmResponse, ToolDefinition, TurnOutcome};
    use crate::tools::register_builtin_tools;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    /// Scripted model: answers triage prompts with a canned grouping and
    /// group prompts with one create_incident call followed by a plain
    /// completion. Tracks call counts and concurrency.
    struct StubModel {
        triage_json: String,
        triage_calls: AtomicUsize,
        loop_calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        histories: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl StubModel {
        fn new(triage_json: impl Into<String>) -> Self {
            Self {
                triage_json: triage_json.into(),
                triage_calls: AtomicUsize::new(0),
                loop_calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                histories: Mutex::new(Vec::new()),
            }
        }

        fn text_reply(content: impl Into<String>) -> LlmResponse {
            LlmResponse {
                content: content.into(),
                tool_calls: Vec::new(),
                outcome: TurnOutcome::TurnComplete,
                usage: None,
            }
        }
    }

    #[async_trait]
    impl ChatModel for StubModel {
        async fn generate(
            &self,
            messages: &[ChatMessage],
            tools: &[ToolDefinition],
        ) -> Result<LlmResponse> {
            self.histories.lock().push(messages.to_vec());
            let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(current, Ordering::SeqCst);
            // Hold the slot briefly so overlap would be observable.
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let is_triage = tools.is_empty()
                && messages
                    .last()
                    .map(|m| m.content().contains("Respond with ONLY a JSON object"))
                    .unwrap_or(false);
            if is_triage {
                self.triage_calls.fetch_add(1, Ordering::SeqCst);
                return Ok(Self::text_reply(self.triage_json.clone()));
            }

            let has_tool_result = messages
                .iter()
                .any(|m| matches!(m, ChatMessage::ToolResult { .. }));
            if has_tool_result {
                return Ok(Self::text_reply("acknowledged"));
            }

            self.loop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(LlmResponse {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "call_incident_1".into(),
                    name: "create_incident".into(),
                    arguments: serde_json::json!({
                        "id": "db-connection-exhaustion",
                        "severity": "critical",
                        "source": "db",
                        "summary": "connection pool exhausted"
                    }),
                }],
                outcome: TurnOutcome::ToolCalls,
                usage: None,
            })
        }

        fn identity(&self) -> String {
            "stub".to_string()
        }
    }

    fn pipeline_with(
        model: Arc<StubModel>,
        mode: SchedulingMode,
    ) -> (Arc<MasterAgentPipeline>, Arc<EventHub>, Arc<WorldState>) {
        let hub = Arc::new(EventHub::new(100, 100));
        let world = Arc::new(WorldState::new());
        let mut registry = ToolRegistry::new();
        register_builtin_tools(
            &mut registry,
            world.clone(),
            crate::a2a::A2aClient::new(),
            Arc::new(HashMap::new()),
        );
        let pipeline = Arc::new(MasterAgentPipeline::new(
            hub.clone(),
            world.clone(),
            model,
            Arc::new(registry),
            PipelineConfig {
                mode,
                system_prompt: None,
            },
        ));
        (pipeline, hub, world)
    }

    fn db_event(i: usize) -> InfraEvent {
        let mut e = InfraEvent::new(
            "postgres",
            "connection_error",
            Severity::Critical,
            format!("connection refused ({i})"),
        );
        e.id = format!("evt-{i}");
        e
    }

    #[tokio::test]
    async fn batch_triage_single_root_cause() {
        let ids: Vec<String> = (0..8).map(|i| format!("\"evt-{i}\"")).collect();
        let triage = format!(
            "{{\"groups\": [{{\"group_id\": \"db\", \"summary\": \"db down\", \"priority\": 1, \
             \"severity\": \"critical\", \"event_ids\": [{}]}}]}}",
            ids.join(", ")
        );
        let model = Arc::new(StubModel::new(triage));
        let (pipeline, hub, world) = pipeline_with(
            model.clone(),
            SchedulingMode::BatchTriage {
                queue_threshold: 5,
                window: Duration::from_secs(1),
            },
        );

        for i in 0..8 {
            assert!(hub.push(db_event(i)));
        }

        let cancel = CancellationToken::new();
        let runner = tokio::spawn(pipeline.clone().run(cancel.clone()));

        // Wait for the whole batch to be accounted for.
        for _ in 0..200 {
            if world.events_processed() == 8 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        runner.await.unwrap();

        // Exactly one triage call and one group tool loop, never overlapping.
        assert_eq!(model.triage_calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.loop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(world.events_processed(), 8);

        let incidents = world.get_incidents();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn single_event_batch_skips_triage() {
        let model = Arc::new(StubModel::new("{}"));
        let (pipeline, hub, world) = pipeline_with(
            model.clone(),
            SchedulingMode::BatchTriage {
                queue_threshold: 10,
                window: Duration::from_secs(1),
            },
        );
        assert!(hub.push(db_event(0)));

        let cancel = CancellationToken::new();
        let runner = tokio::spawn(pipeline.clone().run(cancel.clone()));
        for _ in 0..400 {
            if world.events_processed() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        runner.await.unwrap();

        assert_eq!(model.triage_calls.load(Ordering::SeqCst), 0);
        assert_eq!(world.events_processed(), 1);
    }

    #[tokio::test]
    async fn per_event_workers_drain_the_hub() {
        let model = Arc::new(StubModel::new("{}"));
        let (pipeline, hub, world) =
            pipeline_with(model.clone(), SchedulingMode::PerEvent { workers: 3 });
        for i in 0..6 {
            assert!(hub.push(db_event(i)));
        }

        let cancel = CancellationToken::new();
        let runner = tokio::spawn(pipeline.clone().run(cancel.clone()));
        for _ in 0..200 {
            if world.events_processed() == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        runner.await.unwrap();

        assert_eq!(world.events_processed(), 6);
        assert!(pipeline.llm_available());
    }

    #[tokio::test]
    async fn tool_loop_echoes_call_ids_verbatim() {
        let model = Arc::new(StubModel::new("{}"));
        let (pipeline, hub, world) =
            pipeline_with(model.clone(), SchedulingMode::PerEvent { workers: 1 });
        assert!(hub.push(db_event(0)));

        let cancel = CancellationToken::new();
        let runner = tokio::spawn(pipeline.clone().run(cancel.clone()));
        for _ in 0..200 {
            if world.events_processed() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        runner.await.unwrap();

        // The second model call must carry the tool result paired by id.
        let histories = model.histories.lock();
        let follow_up = histories
            .iter()
            .find(|h| h.iter().any(|m| matches!(m, ChatMessage::ToolResult { .. })))
            .expect("no follow-up call with tool results");
        let call_id = follow_up
            .iter()
            .find_map(|m| match m {
                ChatMessage::ToolResult { call_id, .. } => Some(call_id.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(call_id, "call_incident_1");
        // And the assistant message before it still names the same id.
        let assistant = follow_up
            .iter()
            .find(|m| !m.tool_calls().is_empty())
            .unwrap();
        assert_eq!(assistant.tool_calls()[0].id, "call_incident_1");
    }
}
