//! The chat agent loop.
//!
//! A dispatch opens one streamed completion, forwards its text, runs any tool
//! calls the model asks for and feeds their results back until the model
//! finishes without calling a tool. Output travels over two channels: the
//! token stream ([`StreamPart`]) and the tool event stream ([`ToolEvent`]).
//! For every tool call the tracker is updated and the `Started` event is
//! pushed before the call's frame enters the token stream, so an observer that
//! sees the frame always finds the tracker already pointing at that call.
//! A later call replaces the current one; the tracker only goes idle when the
//! dispatch ends, however it ends.
use anyhow::anyhow;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::ModelCatalog;
use crate::discovery::ToolExecutor;
use crate::errors::{BrokerError, BrokerResult, ToolError, ToolResult};
use crate::models::message::Message;
use crate::models::tool::ToolCall;
use crate::prompt::Prompt;
use crate::prompt_template::SystemTemplate;
use crate::providers::base::{CompletionRequest, Provider, ProviderEvent, ProviderStream, Usage};
use crate::tracker::ToolCallTracker;

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;
const PART_BUFFER: usize = 64;

/// One frame of the token stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPart {
    Text(String),
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        id: String,
        result: Value,
    },
    Finish {
        reason: String,
        usage: Usage,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolEvent {
    Started {
        id: String,
        name: String,
        arguments: String,
    },
    Finished {
        id: String,
        name: String,
        is_error: bool,
    },
}

/// How a dispatch ended
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Finished { reason: String },
    Cancelled,
    Failed,
}

pub struct ChatStream {
    pub parts: ReceiverStream<StreamPart>,
    pub events: UnboundedReceiverStream<ToolEvent>,
    pub completion: oneshot::Receiver<Completion>,
}

pub struct ChatDispatcher {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolExecutor>,
    catalog: ModelCatalog,
    system: SystemTemplate,
    max_tool_rounds: usize,
}

impl ChatDispatcher {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<dyn ToolExecutor>, catalog: ModelCatalog) -> Self {
        Self {
            provider,
            tools,
            catalog,
            system: SystemTemplate::default(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_system_template(mut self, system: SystemTemplate) -> Self {
        self.system = system;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Start answering a prompt.
    ///
    /// Returns once the provider has accepted the first request; everything
    /// after that is delivered through the returned [`ChatStream`].
    pub async fn dispatch(
        &self,
        prompt: Prompt,
        cancel: CancellationToken,
        tracker: ToolCallTracker,
    ) -> BrokerResult<ChatStream> {
        let command = prompt.command()?;
        let deployment = self.catalog.resolve(command.model.as_deref());
        let tools = self.tools.tools().await;
        let system = self
            .system
            .render(&tools)
            .map_err(|e| BrokerError::Internal(anyhow!("render system prompt: {}", e)))?;

        let request = CompletionRequest {
            model: deployment.model,
            system,
            messages: command.to_messages(prompt.image().as_ref()),
            tools,
            temperature: deployment.temperature,
            max_tokens: deployment.max_tokens,
            reasoning_effort: command.reasoning_effort.or(deployment.reasoning_effort),
        };

        debug!(model = %request.model, tools = request.tools.len(), "opening completion stream");
        let first = self.provider.stream(&request).await?;

        let (parts_tx, parts_rx) = mpsc::channel(PART_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        let agent = AgentLoop {
            provider: Arc::clone(&self.provider),
            tools: Arc::clone(&self.tools),
            max_tool_rounds: self.max_tool_rounds,
            cancel,
            tracker,
            parts: parts_tx,
            events: events_tx,
        };
        tokio::spawn(async move {
            let completion = agent.run(first, request).await;
            let _ = done_tx.send(completion);
        });

        Ok(ChatStream {
            parts: ReceiverStream::new(parts_rx),
            events: UnboundedReceiverStream::new(events_rx),
            completion: done_rx,
        })
    }
}

struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingCall {
    fn parsed(&self) -> ToolResult<ToolCall> {
        let arguments = if self.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&self.arguments).map_err(|e| {
                ToolError::InvalidParameters(format!(
                    "could not parse arguments for {}: {}",
                    self.name, e
                ))
            })?
        };
        Ok(ToolCall::new(&self.name, arguments))
    }
}

enum Turn {
    Done {
        text: String,
        calls: Vec<PendingCall>,
        reason: String,
        usage: Usage,
    },
    Cancelled,
    Failed(anyhow::Error),
}

struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolExecutor>,
    max_tool_rounds: usize,
    cancel: CancellationToken,
    tracker: ToolCallTracker,
    parts: mpsc::Sender<StreamPart>,
    events: mpsc::UnboundedSender<ToolEvent>,
}

impl AgentLoop {
    async fn run(self, first: ProviderStream, mut request: CompletionRequest) -> Completion {
        let mut stream = first;
        let mut rounds = 0;

        let completion = loop {
            let (text, calls, reason, usage) = match self.read_turn(stream).await {
                Turn::Done {
                    text,
                    calls,
                    reason,
                    usage,
                } => (text, calls, reason, usage),
                Turn::Cancelled => break self.cancelled().await,
                Turn::Failed(e) => break self.failed(e).await,
            };

            if calls.is_empty() {
                break self.finished(reason, usage).await;
            }
            if rounds >= self.max_tool_rounds {
                warn!(rounds, "tool round limit reached, ending response");
                break self.finished("max_tool_rounds".to_string(), usage).await;
            }
            rounds += 1;

            let mut assistant = Message::assistant();
            if !text.is_empty() {
                assistant = assistant.with_text(text);
            }
            let mut responses = Message::user();

            for call in calls {
                let parsed = call.parsed();
                assistant = assistant.with_tool_request(&call.id, parsed.clone());

                let Some(output) = self.run_tool(&call, parsed).await else {
                    break;
                };
                responses = responses.with_tool_response(&call.id, output);
            }
            if self.cancel.is_cancelled() {
                break self.cancelled().await;
            }

            request.messages.push(assistant);
            request.messages.push(responses);

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                next = self.provider.stream(&request) => Some(next),
            };
            stream = match next {
                None => break self.cancelled().await,
                Some(Ok(stream)) => stream,
                Some(Err(e)) => break self.failed(e).await,
            };
        };

        // The last call stays active until the response as a whole ends
        self.tracker.end();
        completion
    }

    /// Read one provider response to its end, forwarding text as it arrives
    async fn read_turn(&self, mut stream: ProviderStream) -> Turn {
        let mut text = String::new();
        let mut calls = Vec::new();
        let mut reason = "stop".to_string();
        let mut usage = Usage::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Turn::Cancelled,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(ProviderEvent::Text(chunk))) => {
                    text.push_str(&chunk);
                    if !self.emit(StreamPart::Text(chunk)).await {
                        return Turn::Cancelled;
                    }
                }
                Some(Ok(ProviderEvent::ToolCall {
                    id,
                    name,
                    arguments,
                })) => calls.push(PendingCall {
                    id,
                    name,
                    arguments,
                }),
                Some(Ok(ProviderEvent::Finish {
                    reason: finish_reason,
                    usage: finish_usage,
                })) => {
                    reason = finish_reason;
                    usage = finish_usage;
                }
                Some(Err(e)) => return Turn::Failed(e),
                None => break,
            }
        }

        Turn::Done {
            text,
            calls,
            reason,
            usage,
        }
    }

    /// Execute one call with the tracker and both channels kept in order.
    /// Returns `None` when cancelled while the tool was running.
    async fn run_tool(
        &self,
        call: &PendingCall,
        parsed: ToolResult<ToolCall>,
    ) -> Option<ToolResult<String>> {
        self.tracker.begin(&call.name, &call.arguments);
        info!(tool = %call.name, id = %call.id, "tool call started");
        let _ = self.events.send(ToolEvent::Started {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });

        let frame_arguments = match &parsed {
            Ok(tool_call) => tool_call.arguments.clone(),
            Err(_) => Value::String(call.arguments.clone()),
        };
        self.emit(StreamPart::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: frame_arguments,
        })
        .await;

        let output = match parsed {
            Ok(tool_call) => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return None,
                    output = self.tools.execute(tool_call) => output,
                }
            }
            Err(e) => Err(e),
        };

        let result = match &output {
            Ok(text) => json!(text),
            Err(e) => json!({ "error": e.to_string() }),
        };
        self.emit(StreamPart::ToolResult {
            id: call.id.clone(),
            result,
        })
        .await;

        let is_error = output.is_err();
        if let Err(e) = &output {
            warn!(tool = %call.name, id = %call.id, error = %e, "tool call failed");
        }
        let _ = self.events.send(ToolEvent::Finished {
            id: call.id.clone(),
            name: call.name.clone(),
            is_error,
        });
        info!(tool = %call.name, id = %call.id, is_error, "tool call finished");

        Some(output)
    }

    /// False once the consumer has gone away
    async fn emit(&self, part: StreamPart) -> bool {
        if self.parts.send(part).await.is_err() {
            self.cancel.cancel();
            return false;
        }
        true
    }

    async fn finished(&self, reason: String, usage: Usage) -> Completion {
        self.emit(StreamPart::Finish {
            reason: reason.clone(),
            usage,
        })
        .await;
        Completion::Finished { reason }
    }

    async fn cancelled(&self) -> Completion {
        info!("chat dispatch cancelled");
        self.emit(StreamPart::Finish {
            reason: "cancelled".to_string(),
            usage: Usage::default(),
        })
        .await;
        Completion::Cancelled
    }

    async fn failed(&self, err: anyhow::Error) -> Completion {
        error!(error = ?err, "chat stream failed");
        self.emit(StreamPart::Finish {
            reason: "error".to_string(),
            usage: Usage::default(),
        })
        .await;
        Completion::Failed
    }
}
