mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use switchyard_core::provider::{
    CanonicalResponse, ErrorKind, Event, FinishReason, ResponseOutput, Usage,
};
use switchyard_core::{DispatchError, Outcome, Plugin, PluginContext, PluginError, SlotKey};
use tokio::time::timeout;

use support::{ScriptedAdapter, Step, builder, chat, policy};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Act {
    Pass,
    ShortCircuit,
    FailPre,
    FailPost,
}

struct Recorder {
    name: &'static str,
    act: Act,
    log: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn new(name: &'static str, act: Act, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            act,
            log: log.clone(),
        })
    }
}

fn cached(ctx: &PluginContext) -> CanonicalResponse {
    CanonicalResponse {
        request_id: ctx.request().id,
        output: ResponseOutput::Text("cached".into()),
        usage: Usage::default(),
        provider: "cache".into(),
        model: ctx.request().model.clone(),
        credential_id: None,
        latency: Duration::ZERO,
        attempts: Vec::new(),
    }
}

#[async_trait]
impl Plugin for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    async fn pre(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        self.log.lock().unwrap().push(format!("pre:{}", self.name));
        match self.act {
            Act::ShortCircuit => {
                let response = cached(ctx);
                ctx.respond(response);
                Ok(())
            }
            Act::FailPre => Err(PluginError::new("quota exceeded")),
            Act::Pass | Act::FailPost => Ok(()),
        }
    }

    async fn post(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        self.log.lock().unwrap().push(format!("post:{}", self.name));
        assert!(ctx.request_mut().is_none() || ctx.is_short_circuited());
        match self.act {
            Act::FailPost => Err(PluginError::new("redaction failed")),
            _ => Ok(()),
        }
    }
}

fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test(start_paused = true)]
async fn short_circuit_unwinds_only_plugins_that_ran() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let a = ScriptedAdapter::ok();
    let d = builder(&[("a", a.clone(), &[1])])
        .plugin(Recorder::new("p1", Act::Pass, &log))
        .plugin(Recorder::new("p2", Act::ShortCircuit, &log))
        .plugin(Recorder::new("p3", Act::Pass, &log))
        .build()
        .await
        .unwrap();
    let mut rx = d.events().subscribe();

    let resp = d.dispatch(chat("m"), &policy(&["a"], 3)).await.unwrap();

    assert_eq!(resp.provider, "cache");
    assert_eq!(resp.output, ResponseOutput::Text("cached".into()));
    assert_eq!(a.call_count(), 0);
    assert_eq!(entries(&log), vec!["pre:p1", "pre:p2", "post:p2", "post:p1"]);

    let Event::Request(summary) = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap()
    else {
        panic!("expected request summary");
    };
    assert!(summary.short_circuited);
    assert!(summary.attempts.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failing_pre_hook_becomes_plugin_error() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let a = ScriptedAdapter::ok();
    let d = builder(&[("a", a.clone(), &[1])])
        .plugin(Recorder::new("p1", Act::Pass, &log))
        .plugin(Recorder::new("quota", Act::FailPre, &log))
        .plugin(Recorder::new("p3", Act::Pass, &log))
        .build()
        .await
        .unwrap();

    let err = d.dispatch(chat("m"), &policy(&["a"], 3)).await.unwrap_err();

    assert!(matches!(
        err,
        DispatchError::Plugin { ref plugin, ref message }
            if plugin == "quota" && message == "quota exceeded"
    ));
    assert_eq!(a.call_count(), 0);
    assert_eq!(
        entries(&log),
        vec!["pre:p1", "pre:quota", "post:quota", "post:p1"]
    );
}

#[tokio::test(start_paused = true)]
async fn failing_post_hook_replaces_success() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let a = ScriptedAdapter::ok();
    let d = builder(&[("a", a.clone(), &[1])])
        .plugin(Recorder::new("outer", Act::Pass, &log))
        .plugin(Recorder::new("redact", Act::FailPost, &log))
        .build()
        .await
        .unwrap();

    let err = d.dispatch(chat("m"), &policy(&["a"], 3)).await.unwrap_err();

    assert_eq!(err.code(), "plugin");
    assert_eq!(a.call_count(), 1);
    assert_eq!(
        entries(&log),
        vec!["pre:outer", "pre:redact", "post:redact", "post:outer"]
    );
}

struct Rewriter;

#[async_trait]
impl Plugin for Rewriter {
    fn name(&self) -> &str {
        "rewriter"
    }

    async fn pre(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let request = ctx
            .request_mut()
            .ok_or_else(|| PluginError::new("frozen"))?;
        request.params.max_tokens = Some(64);
        ctx.set_extension("rewriter.touched", Value::Bool(true));
        Ok(())
    }

    async fn post(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        if ctx.extension("rewriter.touched") != Some(&Value::Bool(true)) {
            return Err(PluginError::new("extension lost"));
        }
        if let Some(Outcome::Response(response)) = ctx.outcome_mut() {
            response.model = format!("{}+post", response.model);
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn hooks_can_edit_request_and_response() {
    let a = ScriptedAdapter::ok();
    let d = builder(&[("a", a.clone(), &[1])])
        .plugin(Arc::new(Rewriter))
        .build()
        .await
        .unwrap();

    let resp = d.dispatch(chat("m"), &policy(&["a"], 3)).await.unwrap();

    assert_eq!(resp.model, "m+post");
}

#[tokio::test(start_paused = true)]
async fn short_circuit_on_stream_yields_single_chunk() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let a = ScriptedAdapter::ok();
    let d = builder(&[("a", a.clone(), &[1])])
        .plugin(Recorder::new("cache", Act::ShortCircuit, &log))
        .build()
        .await
        .unwrap();

    let mut stream = d
        .dispatch_stream(chat("m"), &policy(&["a"], 3))
        .await
        .unwrap();

    assert!(stream.meta().is_none());
    let chunk = stream.next().await.unwrap().unwrap();
    assert_eq!(chunk.delta, "cached");
    assert_eq!(chunk.finish_reason, Some(FinishReason::Stop));
    assert!(stream.next().await.is_none());
    assert_eq!(a.call_count(), 0);
}

/// Replaces a live upstream stream with a canned response.
struct Buffering;

#[async_trait]
impl Plugin for Buffering {
    fn name(&self) -> &str {
        "buffering"
    }

    async fn post(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        if matches!(ctx.outcome(), Some(Outcome::Stream(_))) {
            let response = cached(ctx);
            *ctx.outcome_mut().unwrap() = Outcome::Response(response);
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn replaced_stream_is_closed_and_recorded() {
    let a = ScriptedAdapter::new([Step::Stream {
        items: vec![Ok("x".into())],
        hang: true,
    }]);
    let d = builder(&[("a", a.clone(), &[1])])
        .plugin(Arc::new(Buffering))
        .build()
        .await
        .unwrap();
    let mut rx = d.events().subscribe();

    let mut stream = d
        .dispatch_stream(chat("m"), &policy(&["a"], 3))
        .await
        .unwrap();

    assert!(stream.meta().is_none());
    assert_eq!(stream.next().await.unwrap().unwrap().delta, "cached");
    let summary = loop {
        match timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap() {
            Event::Request(summary) => break summary,
            Event::Operational(_) => continue,
        }
    };
    assert_eq!(summary.attempts.len(), 1);
    assert_eq!(
        summary.attempts[0].outcome.error_kind(),
        Some(ErrorKind::Cancelled)
    );
    let key = SlotKey::new("a", 1);
    assert_eq!(d.governor().stats(&key).await.unwrap().in_flight, 0);
}
