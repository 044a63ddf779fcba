use serde_json::{Map, Value};
use switchyard_provider_core::{Attempt, CanonicalRequest, CanonicalResponse, CredentialId};

use crate::error::DispatchError;

/// Where a committed stream is coming from, as seen by post hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMeta {
    pub provider: String,
    pub model: String,
    pub credential_id: CredentialId,
    /// Attempts made before the stream was committed.
    pub attempts: Vec<Attempt>,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Response(CanonicalResponse),
    Stream(StreamMeta),
    Error(DispatchError),
}

/// Per-request state threaded through the plugin chain.
#[derive(Debug)]
pub struct PluginContext {
    request: CanonicalRequest,
    frozen: bool,
    outcome: Option<Outcome>,
    short_circuited: bool,
    extensions: Map<String, Value>,
}

impl PluginContext {
    pub fn new(request: CanonicalRequest) -> Self {
        Self {
            request,
            frozen: false,
            outcome: None,
            short_circuited: false,
            extensions: Map::new(),
        }
    }

    pub fn request(&self) -> &CanonicalRequest {
        &self.request
    }

    /// `None` once dispatch has begun.
    pub fn request_mut(&mut self) -> Option<&mut CanonicalRequest> {
        if self.frozen {
            None
        } else {
            Some(&mut self.request)
        }
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Short-circuits with a final response.
    pub fn respond(&mut self, response: CanonicalResponse) {
        self.outcome = Some(Outcome::Response(response));
        self.short_circuited = true;
    }

    /// Short-circuits with a final error.
    pub fn fail(&mut self, error: DispatchError) {
        self.outcome = Some(Outcome::Error(error));
        self.short_circuited = true;
    }

    pub fn is_short_circuited(&self) -> bool {
        self.short_circuited
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn outcome_mut(&mut self) -> Option<&mut Outcome> {
        self.outcome.as_mut()
    }

    pub fn set_outcome(&mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
    }

    pub(crate) fn take_outcome(&mut self) -> Option<Outcome> {
        self.outcome.take()
    }

    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    pub fn set_extension(&mut self, key: impl Into<String>, value: Value) {
        self.extensions.insert(key.into(), value);
    }
}
