mod hub;
mod tracing_sink;
mod types;

pub use hub::{EventHub, EventSink, EventSinkError};
pub use tracing_sink::TracingEventSink;
pub use types::{
    CredentialDisabledEvent, CredentialEnabledEvent, Event, OperationalEvent, RequestSummary,
    SummaryOutcome, UnavailableEndEvent, UnavailableStartEvent,
};
