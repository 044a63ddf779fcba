//! Dispatch and resilience engine: plugins, routing, concurrency slots,
//! retries with fallback, and streaming.

pub mod dispatcher;
pub mod error;
pub mod governor;
pub mod plugin;
pub mod retry;
pub mod router;
pub mod stream;

mod summary;

pub use dispatcher::{BuildError, Dispatched, Dispatcher, DispatcherBuilder};
pub use error::{CancelReason, DispatchError, Exclusion, ExclusionReason};
pub use governor::{ConcurrencyGovernor, GovernorError, Slot, SlotKey, SlotStats};
pub use plugin::{
    ModelAliasPlugin, Outcome, Plugin, PluginContext, PluginError, PluginPipeline, StreamMeta,
};
pub use retry::backoff_delay;
pub use router::Router;
pub use stream::DispatchStream;

pub use switchyard_common as common;
pub use switchyard_provider_core as provider;
