use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{Plugin, PluginContext, PluginError};

/// Rewrites alias model ids to their target before routing.
#[derive(Debug, Clone, Default)]
pub struct ModelAliasPlugin {
    aliases: HashMap<String, String>,
}

impl ModelAliasPlugin {
    pub fn new(aliases: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            aliases: aliases.into_iter().collect(),
        }
    }

    pub fn alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.aliases.insert(from.into(), to.into());
        self
    }
}

#[async_trait]
impl Plugin for ModelAliasPlugin {
    fn name(&self) -> &str {
        "model_alias"
    }

    async fn pre(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let Some(target) = self.aliases.get(&ctx.request().model).cloned() else {
            return Ok(());
        };
        let request = ctx
            .request_mut()
            .ok_or_else(|| PluginError::new("request already frozen"))?;
        let original = std::mem::replace(&mut request.model, target);
        debug!(
            request_id = %request.id,
            from = %original,
            to = %request.model,
            "model alias applied"
        );
        ctx.set_extension("model_alias.original", Value::String(original));
        Ok(())
    }
}
