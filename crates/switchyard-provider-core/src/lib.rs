//! Provider-facing building blocks for switchyard.
//!
//! Canonical request/response shapes, the error taxonomy, the adapter trait and
//! registry, the credential pool and the event hub. Nothing here performs
//! upstream I/O; adapters do, and the dispatch engine lives in `switchyard-core`.

pub mod attempt;
pub mod config;
pub mod credential;
pub mod errors;
pub mod events;
pub mod headers;
pub mod provider;
pub mod registry;
pub mod request;
pub mod response;

pub use attempt::{Attempt, AttemptLog, AttemptOutcome};
pub use config::{
    Candidate, CandidateOrdering, PolicyTable, RetryPolicy, RoutingPolicy, WeightedCandidate,
};
pub use credential::{
    AcquireError, CredentialHandle, CredentialHealth, CredentialId, CredentialPool,
    CredentialSpec, CredentialState, HealthSnapshot, PoolError, SecretRef, UnavailableReason,
};
pub use errors::{ErrorKind, ProviderError, ProviderResult, TransientKind, ValidationError};
pub use events::{
    CredentialDisabledEvent, CredentialEnabledEvent, Event, EventHub, EventSink, EventSinkError,
    OperationalEvent, RequestSummary, SummaryOutcome, TracingEventSink, UnavailableEndEvent,
    UnavailableStartEvent,
};
pub use headers::{Headers, header_get, header_set, parse_retry_after};
pub use provider::{
    CallContext, ChunkStream, ParamBounds, ProviderAdapter, ProviderDescriptor, RateLimits,
    TransportErrorKind, classify_http_failure, classify_transport_failure,
};
pub use registry::{ProviderRegistry, RegisteredProvider, RegistryError};
pub use request::{
    CanonicalRequest, GenerationParams, Message, OperationKind, Payload, RawRequest, Role,
    RoutePreferences,
};
pub use response::{
    CanonicalResponse, FinishReason, ProviderReply, ResponseChunk, ResponseOutput, Usage,
};
pub use switchyard_common::RequestId;
