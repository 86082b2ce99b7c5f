//! Log lines and telemetry emitted during a call carry the call's identity.

mod common;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context as LayerContext, Layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

use common::lua_dispatcher;
use linna::runtime::InboundRequest;

#[derive(Debug, Clone, Default)]
struct Fields(HashMap<String, String>);

impl Visit for Fields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().to_string(), format!("{value:?}"));
    }
}

/// An event and the fields of the `rpc` span it was emitted in.
#[derive(Debug, Clone)]
struct Captured {
    message: String,
    rpc: Option<HashMap<String, String>>,
}

#[derive(Clone, Default)]
struct CaptureLayer {
    events: Arc<Mutex<Vec<Captured>>>,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: LayerContext<'_, S>) {
        let mut fields = Fields::default();
        attrs.record(&mut fields);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(fields);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: LayerContext<'_, S>) {
        let mut fields = Fields::default();
        event.record(&mut fields);

        let rpc = ctx.event_scope(event).and_then(|scope| {
            scope
                .from_root()
                .find(|span| span.name() == "rpc")
                .and_then(|span| {
                    let extensions = span.extensions();
                    extensions.get::<Fields>().map(|f| f.0.clone())
                })
        });
        self.events.lock().unwrap().push(Captured {
            message: fields.0.remove("message").unwrap_or_default(),
            rpc,
        });
    }
}

const SCORE_MODULE: &str = r#"
return function(ctx, logger, nk, initializer)
  initializer:register_rpc("score", function(ctx, logger, nk, payload)
    logger:info("score accepted")
    nk.metrics_counter_add("scores", { mode = "ranked" }, 1)
    return payload
  end)
end
"#;

#[tokio::test(flavor = "multi_thread")]
async fn test_events_inside_a_call_are_attributed() {
    let layer = CaptureLayer::default();
    let events = Arc::clone(&layer.events);
    tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layer))
        .expect("Failed to install subscriber");

    let (dispatcher, _dir) = lua_dispatcher(&[("score.lua", SCORE_MODULE)]);

    for (user, session) in [("u-1", "s-1"), ("u-2", "s-2")] {
        let mut request = InboundRequest::new(" Score ", "10");
        request.user_id = user.to_string();
        request.session_id = session.to_string();
        assert_eq!(dispatcher.dispatch(request).await.unwrap(), "10");
    }

    let events = events.lock().unwrap().clone();
    for message in ["score accepted", "counter add"] {
        let attributed: Vec<_> = events
            .iter()
            .filter(|e| e.message == message)
            .filter_map(|e| e.rpc.clone())
            .collect();
        assert_eq!(attributed.len(), 2, "{message}: {events:?}");
        for (rpc, user) in attributed.iter().zip(["u-1", "u-2"]) {
            assert_eq!(rpc["rpc_id"], "score");
            assert_eq!(rpc["user_id"], user);
        }
    }

    // Startup logging happens outside any call.
    assert!(events
        .iter()
        .any(|e| e.message.starts_with("Loaded") && e.rpc.is_none()));
}
