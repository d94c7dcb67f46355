#![allow(dead_code)]

use async_trait::async_trait;
use socratic_tutor::gateway::{GatewayError, GatewayResult, TutorGateway};
use socratic_tutor::{ChatTurn, ReasoningMode};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub prompt: String,
    pub history: Vec<ChatTurn>,
    pub mode: ReasoningMode,
}

/// Gateway double: replays scripted results, then answers `r1`, `r2`, ...
#[derive(Default)]
pub struct FakeGateway {
    calls: Mutex<Vec<RecordedCall>>,
    script: Mutex<VecDeque<GatewayResult<String>>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: GatewayResult<String>) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TutorGateway for FakeGateway {
    async fn generate_tutor_reply(
        &self,
        prompt: &str,
        history: &[ChatTurn],
        mode: ReasoningMode,
    ) -> GatewayResult<String> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(RecordedCall {
                prompt: prompt.to_string(),
                history: history.to_vec(),
                mode,
            });
            calls.len()
        };
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(format!("r{n}")))
    }

    async fn synthesize_speech(&self, _text: &str) -> GatewayResult<Vec<u8>> {
        Err(GatewayError::NoAudio)
    }
}
