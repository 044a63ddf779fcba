mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use switchyard_core::provider::{
    Event, EventSink, EventSinkError, OperationalEvent, TracingEventSink, UnavailableReason,
};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use support::{ScriptedAdapter, Step, builder, chat, policy, rate_limited};

#[derive(Default)]
struct Collect {
    events: Mutex<Vec<Event>>,
}

#[async_trait]
impl EventSink for Collect {
    fn name(&self) -> &'static str {
        "collect"
    }

    async fn write(&self, event: &Event) -> Result<(), EventSinkError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

impl Collect {
    async fn wait_for(&self, pred: impl Fn(&[Event]) -> bool) {
        for _ in 0..200 {
            if pred(self.events.lock().unwrap().as_slice()) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("events never arrived: {:?}", self.events.lock().unwrap());
    }
}

fn is_start(event: &Event) -> bool {
    matches!(
        event,
        Event::Operational(OperationalEvent::UnavailableStart(start))
            if start.reason == UnavailableReason::RateLimit && start.credential_id == 1
    )
}

fn is_end(event: &Event) -> bool {
    matches!(
        event,
        Event::Operational(OperationalEvent::UnavailableEnd(end)) if end.credential_id == 1
    )
}

#[tokio::test(start_paused = true)]
async fn sinks_see_cooldown_lifecycle_and_summary() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let a = ScriptedAdapter::new([Step::Fail(rate_limited(Some(Duration::from_secs(1))))]);
    let b = ScriptedAdapter::ok();
    let collect = Arc::new(Collect::default());
    let d = builder(&[("a", a.clone(), &[1]), ("b", b.clone(), &[2])])
        .sink(Arc::new(TracingEventSink::new()))
        .sink(collect.clone())
        .build()
        .await
        .unwrap();

    let resp = d.dispatch(chat("m"), &policy(&["a", "b"], 3)).await.unwrap();
    assert_eq!(resp.provider, "b");

    collect
        .wait_for(|events| {
            events.iter().any(is_start)
                && events
                    .iter()
                    .any(|e| matches!(e, Event::Request(s) if s.request_id == resp.request_id))
        })
        .await;
    collect.wait_for(|events| events.iter().any(is_end)).await;

    let events = collect.events.lock().unwrap();
    let start = events.iter().position(is_start).unwrap();
    let end = events.iter().position(is_end).unwrap();
    assert!(start < end);
}
