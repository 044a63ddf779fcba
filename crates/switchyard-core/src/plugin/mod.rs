//! Request interceptors run around provider execution.

mod alias;
mod context;

pub use alias::ModelAliasPlugin;
pub use context::{Outcome, PluginContext, StreamMeta};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::DispatchError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PluginError {
    pub message: String,
}

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An interceptor. Both hooks default to pass-through.
///
/// `pre` may edit the request or short-circuit by calling
/// [`PluginContext::respond`] / [`PluginContext::fail`]. `post` sees the final
/// outcome and may replace it.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn pre(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let _ = ctx;
        Ok(())
    }

    async fn post(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let _ = ctx;
        Ok(())
    }
}

/// Ordered plugin chain. Stateless across requests.
#[derive(Clone, Default)]
pub struct PluginPipeline {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginPipeline {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Runs `pre` hooks in order, stopping at the first short-circuit or
    /// error. Returns how many plugins ran, the failing one included.
    pub async fn run_pre(&self, ctx: &mut PluginContext) -> usize {
        let mut ran = 0;
        for plugin in &self.plugins {
            ran += 1;
            if let Err(err) = plugin.pre(ctx).await {
                warn!(
                    request_id = %ctx.request().id,
                    plugin = plugin.name(),
                    error = %err,
                    "pre plugin failed"
                );
                ctx.fail(DispatchError::plugin(plugin.name(), err.message));
                break;
            }
            if ctx.is_short_circuited() {
                break;
            }
        }
        ran
    }

    /// Runs `post` hooks for the first `ran` plugins in reverse order. A
    /// failing hook replaces the outcome; the remaining hooks still run.
    pub async fn run_post(&self, ctx: &mut PluginContext, ran: usize) {
        for plugin in self.plugins.iter().take(ran).rev() {
            if let Err(err) = plugin.post(ctx).await {
                warn!(
                    request_id = %ctx.request().id,
                    plugin = plugin.name(),
                    error = %err,
                    "post plugin failed"
                );
                ctx.set_outcome(Outcome::Error(DispatchError::plugin(
                    plugin.name(),
                    err.message,
                )));
            }
        }
    }
}
