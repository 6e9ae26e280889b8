use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::sync::Mutex;

use crate::providers::base::{CompletionRequest, Provider, ProviderEvent, ProviderStream, Usage};

/// One scripted response
#[derive(Debug, Clone)]
pub struct MockTurn {
    pub events: Vec<ProviderEvent>,
    /// Never finish after the scripted events, like a backend that keeps generating
    pub hang: bool,
    /// Break the stream with this error after the scripted events
    pub error: Option<String>,
}

impl MockTurn {
    pub fn text(text: &str) -> Self {
        Self {
            events: vec![
                ProviderEvent::Text(text.to_string()),
                ProviderEvent::Finish {
                    reason: "stop".to_string(),
                    usage: Usage::default(),
                },
            ],
            hang: false,
            error: None,
        }
    }

    pub fn events(events: Vec<ProviderEvent>) -> Self {
        Self {
            events,
            hang: false,
            error: None,
        }
    }

    pub fn hanging(events: Vec<ProviderEvent>) -> Self {
        Self {
            events,
            hang: true,
            error: None,
        }
    }

    pub fn broken(events: Vec<ProviderEvent>, error: &str) -> Self {
        Self {
            events,
            hang: false,
            error: Some(error.to_string()),
        }
    }
}

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    turns: Arc<Mutex<Vec<MockTurn>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    fail: bool,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            turns: Arc::new(Mutex::new(turns)),
            requests: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    /// A provider whose backend rejects every request
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![])
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn stream(&self, request: &CompletionRequest) -> Result<ProviderStream> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(anyhow!("connection refused by backend at 10.0.0.7"));
        }

        let turn = {
            let mut turns = self.turns.lock().unwrap();
            if turns.is_empty() {
                MockTurn::text("")
            } else {
                turns.remove(0)
            }
        };

        let scripted = stream::iter(turn.events.into_iter().map(Ok));
        if let Some(error) = turn.error {
            Ok(scripted.chain(stream::once(async move { Err(anyhow!(error)) })).boxed())
        } else if turn.hang {
            Ok(scripted.chain(stream::pending()).boxed())
        } else {
            Ok(scripted.boxed())
        }
    }
}
