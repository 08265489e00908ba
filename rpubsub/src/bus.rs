use std::num::NonZeroUsize;
use std::sync::Arc;

use serde_json::Value;

use rpubsub_conf::BusSettings;

use crate::handler::HandlerId;
use crate::pipeline::Delivery;
use crate::registry::{HandlerRegistry, Phase};
use crate::request::{Listen, Messages, Publish, Stop, Subscribe, Unsubscribe};
use crate::route::{Channels, RouteTable};
use crate::stats::Stats;
use crate::topic::{self, MessagePattern};
use crate::{Error, Result};

/// An in-process message bus.
///
/// Cloning is cheap and every clone shares the same registry, so handlers can
/// capture a clone and register or remove handlers while a publish runs.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

struct BusInner {
    settings: BusSettings,
    registry: HandlerRegistry,
    routes: RouteTable,
    stats: Stats,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    #[inline]
    pub fn new() -> Self {
        Self::with_settings(&BusSettings::default())
    }

    pub fn with_settings(settings: &BusSettings) -> Self {
        Self {
            inner: Arc::new(BusInner {
                settings: settings.clone(),
                registry: HandlerRegistry::new(),
                routes: RouteTable::new(),
                stats: Stats::new(),
            }),
        }
    }

    #[inline]
    pub fn settings(&self) -> &BusSettings {
        &self.inner.settings
    }

    #[inline]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    #[inline]
    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    /// Parses a topic with this bus's namespace and segment settings.
    #[inline]
    pub fn parse(&self, topic: &str) -> Result<MessagePattern> {
        let s = &self.inner.settings;
        MessagePattern::parse_with(topic, &s.default_namespace, s.topic_segments)
    }

    fn parse_all(&self, messages: &Messages) -> Result<Vec<MessagePattern>> {
        if messages.is_empty() {
            return Err(Error::invalid("no message given"));
        }
        messages.iter().map(|m| self.parse(m)).collect()
    }

    #[inline]
    fn namespace_or_default(&self, namespace: Option<String>) -> String {
        match namespace {
            Some(ns) if !ns.is_empty() => ns,
            _ => self.inner.settings.default_namespace.clone(),
        }
    }

    /// Registers the handler once per message pattern, returning the ids in order.
    pub fn listen(&self, req: Listen) -> Result<Vec<HandlerId>> {
        let Listen { messages, handler, channel, limit } = req;
        let limit = match limit {
            None => None,
            Some(l) => Some(NonZeroUsize::new(l).ok_or_else(|| Error::invalid("limit must be positive"))?),
        };
        if channel.as_deref() == Some("") {
            return Err(Error::invalid("channel name is empty"));
        }
        let patterns = self.parse_all(&messages)?;
        let ids = patterns
            .into_iter()
            .map(|p| {
                log::info!("listen {}:{} channel: {:?}, limit: {:?}", p.namespace(), p, channel, limit);
                self.inner.registry.add_handler(p, channel.clone(), handler.clone(), limit)
            })
            .collect();
        Ok(ids)
    }

    /// [`listen`](Self::listen) with a call limit of one.
    #[inline]
    pub fn once(&self, req: Listen) -> Result<Vec<HandlerId>> {
        self.listen(req.limit(1))
    }

    /// Returns the number of handlers removed.
    pub fn stop(&self, req: Stop) -> Result<usize> {
        let Stop { messages, channel, handler } = req;
        let patterns = self.parse_all(&messages)?;
        let removed: usize = patterns
            .iter()
            .map(|p| self.inner.registry.remove_handlers(p, channel.as_deref(), handler.as_deref()))
            .sum();
        log::info!("stop {:?} channel: {:?}, removed: {}", messages, channel, removed);
        Ok(removed)
    }

    pub fn subscribe(&self, req: Subscribe) -> Result<HandlerId> {
        let Subscribe { handler, namespace, phase } = req;
        let phase = match phase {
            Some(p) => p.parse::<Phase>()?,
            None => Phase::default(),
        };
        let namespace = self.namespace_or_default(namespace);
        log::info!("subscribe {} namespace: {}", phase, namespace);
        Ok(self.inner.registry.subscribe(handler, namespace, phase))
    }

    /// Returns the number of subscribers removed.
    pub fn unsubscribe(&self, req: Unsubscribe) -> Result<usize> {
        let Unsubscribe { namespace, phase } = req;
        let phase = phase.map(|p| p.parse::<Phase>()).transpose()?;
        let namespace = self.namespace_or_default(namespace);
        let removed = self.inner.registry.unsubscribe(&namespace, phase);
        log::info!("unsubscribe namespace: {}, phase: {:?}, removed: {}", namespace, phase, removed);
        Ok(removed)
    }

    /// Delivers every message in order. The route is checked before any
    /// handler runs; `on_complete` fires once, after the last message.
    pub async fn publish(&self, req: Publish) -> Result<()> {
        let Publish { messages, route, payload, mut on_publish, on_complete } = req;
        let patterns = self.parse_all(&messages)?;
        let channels: Option<Channels> = match route.as_deref() {
            Some(name) => Some(self.inner.routes.resolve(name)?),
            None => None,
        };
        let payload = payload.unwrap_or_else(|| Value::Object(Default::default()));

        let inner = self.inner.as_ref();
        inner.stats.publishes.inc();
        for message in &patterns {
            inner.stats.messages.inc();
            let payload = payload.clone();
            Delivery::new(&inner.registry, &inner.stats, message, &payload, channels.as_ref(), &mut on_publish)
                .run()
                .await?;
        }

        if let Some(f) = on_complete {
            f();
        }
        Ok(())
    }

    #[inline]
    pub fn add_route<N, I, C>(&self, name: N, channels: I) -> Result<()>
    where
        N: Into<String>,
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        self.inner.routes.add_route(name, channels)
    }

    #[inline]
    pub fn get_route(&self, name: &str) -> Option<Channels> {
        self.inner.routes.get_route(name)
    }

    #[inline]
    pub fn has_route(&self, name: &str) -> bool {
        self.inner.routes.has_route(name)
    }

    /// Drops every handler, subscriber and route.
    pub fn clear(&self) {
        self.inner.registry.clear();
        self.inner.routes.clear();
        log::info!("bus cleared");
    }

    /// Strict specificity comparison of two raw topics, see [`topic::compare`].
    #[inline]
    pub fn compare(a: &str, b: &str, check_specificity: bool) -> bool {
        topic::compare(a, b, check_specificity)
    }

    pub fn stats(&self) -> Value {
        let counts = self.inner.registry.counts();
        self.inner.stats.to_json(&counts, self.inner.routes.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::handler::Handler;

    type Trace = Arc<Mutex<Vec<String>>>;

    fn trace() -> Trace {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn push(t: &Trace, tag: &'static str) -> Handler {
        let t = t.clone();
        Handler::sync(move |_, _| {
            t.lock().push(tag.to_owned());
            Ok(json!(tag))
        })
    }

    #[tokio::test]
    async fn test_listen_and_publish() {
        let bus = Bus::new();
        let got = Arc::new(Mutex::new(Vec::new()));
        let g = got.clone();
        bus.listen(Listen::new(
            "UI.tab",
            Handler::sync(move |m, p| {
                g.lock().push((m.to_string(), p.clone()));
                Ok(Value::Null)
            }),
        ))
        .unwrap();

        bus.publish(Publish::new("UI.tab.opened.MAIN").payload(json!({ "id": 1 }))).await.unwrap();
        bus.publish(Publish::new("UI.tab")).await.unwrap();
        bus.publish(Publish::new("UI.window")).await.unwrap();

        let got = got.lock();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], ("UI.tab.opened.MAIN".to_string(), json!({ "id": 1 })));
        // default payload is an empty object
        assert_eq!(got[1].1, json!({}));
    }

    #[tokio::test]
    async fn test_once() {
        let bus = Bus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        bus.once(Listen::new(
            "a.b",
            Handler::sync(move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }),
        ))
        .unwrap();

        bus.publish(Publish::new("a.b")).await.unwrap();
        bus.publish(Publish::new("a.b")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.registry().counts().handlers, 0);
    }

    #[tokio::test]
    async fn test_once_same_publish() {
        // two messages in one publish still reach a once handler a single time
        let bus = Bus::new();
        let t = trace();
        bus.once(Listen::new("a.*", push(&t, "once"))).unwrap();
        bus.publish(Publish::new(["a.b", "a.c"])).await.unwrap();
        assert_eq!(*t.lock(), vec!["once"]);
    }

    #[tokio::test]
    async fn test_async_once_overlapping_publishes() {
        let bus = Bus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        bus.once(Listen::new(
            "a.b",
            Handler::async_fn(move |_, _, next| {
                c.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    next.done();
                });
            }),
        ))
        .unwrap();

        let (a, b) = tokio::join!(bus.publish(Publish::new("a.b")), bus.publish(Publish::new("a.b")));
        a.unwrap();
        b.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.registry().counts().handlers, 0);
    }

    #[tokio::test]
    async fn test_channel_barrier() {
        let bus = Bus::new();
        let t = trace();
        let ta = t.clone();
        bus.listen(
            Listen::new(
                "x.y",
                Handler::async_fn(move |_, _, next| {
                    let ta = ta.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        ta.lock().push("A".into());
                        next.done();
                    });
                }),
            )
            .channel("C1"),
        )
        .unwrap();
        bus.listen(Listen::new("x.y", push(&t, "B")).channel("C2")).unwrap();
        bus.add_route("R", ["C1", "C2"]).unwrap();

        bus.publish(Publish::new("x.y").route("R")).await.unwrap();
        assert_eq!(*t.lock(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_stage_order() {
        let bus = Bus::new();
        let t = trace();
        bus.subscribe(Subscribe::new(push(&t, "after"))).unwrap();
        bus.listen(Listen::new("a.b", push(&t, "channel")).channel("C")).unwrap();
        bus.listen(Listen::new("a.b", push(&t, "global"))).unwrap();
        bus.subscribe(Subscribe::new(push(&t, "before")).phase("before")).unwrap();
        bus.add_route("R", ["C"]).unwrap();

        let results = Arc::new(Mutex::new(Vec::new()));
        let r = results.clone();
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();
        bus.publish(
            Publish::new("a.b")
                .route("R")
                .on_publish(move |v| r.lock().push(v.clone()))
                .on_complete(move || {
                    d.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .await
        .unwrap();

        assert_eq!(*t.lock(), vec!["before", "global", "channel", "after"]);
        assert_eq!(*results.lock(), vec![json!("before"), json!("global"), json!("channel"), json!("after")]);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_array_publish_completes_once() {
        let bus = Bus::new();
        let t = trace();
        bus.listen(Listen::new("a.*", push(&t, "h"))).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();
        bus.publish(Publish::new(vec!["a.b", "a.c", "z.z"]).on_complete(move || {
            d.fetch_add(1, Ordering::SeqCst);
        }))
        .await
        .unwrap();
        assert_eq!(t.lock().len(), 2);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_result_reaches_on_publish() {
        let bus = Bus::new();
        bus.listen(Listen::new(
            "a.b",
            Handler::async_fn(|_, p, next| {
                let p = p.clone();
                tokio::spawn(async move { next.complete(json!({ "seen": p })) });
            }),
        ))
        .unwrap();
        let results = Arc::new(Mutex::new(Vec::new()));
        let r = results.clone();
        bus.publish(Publish::new("a.b").payload(json!(5)).on_publish(move |v| r.lock().push(v.clone())))
            .await
            .unwrap();
        assert_eq!(*results.lock(), vec![json!({ "seen": 5 })]);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let bus = Bus::new();
        let t = trace();
        bus.subscribe(Subscribe::new(push(&t, "before")).phase(Phase::Before)).unwrap();
        bus.listen(Listen::new("a.b", push(&t, "global"))).unwrap();
        let err = bus.publish(Publish::new("a.b").route("missing")).await.unwrap_err();
        assert!(err.is_unknown_route());
        assert!(t.lock().is_empty());
    }

    #[tokio::test]
    async fn test_handler_fault() {
        let bus = Bus::new();
        let t = trace();
        bus.listen(Listen::new("a.b", Handler::sync(|_, _| Err(anyhow::anyhow!("broken"))))).unwrap();
        bus.subscribe(Subscribe::new(push(&t, "after"))).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();
        let err = bus
            .publish(Publish::new("a.b").on_complete(move || {
                d.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HandlerFault(_)));
        assert!(t.lock().is_empty());
        assert_eq!(done.load(Ordering::SeqCst), 0);
        assert_eq!(bus.stats()["faults.count"], 1);
    }

    #[tokio::test]
    async fn test_mutation_during_publish() {
        let bus = Bus::new();
        let t = trace();
        let inner = bus.clone();
        let tl = t.clone();
        // removes itself and registers a newcomer while the stage runs
        bus.listen(Listen::new(
            "a.b",
            Handler::sync(move |_, _| {
                tl.lock().push("first".into());
                inner.stop(Stop::new("a.b")).expect("");
                inner.listen(Listen::new("a.b", push(&tl, "newcomer"))).expect("");
                Ok(Value::Null)
            }),
        ))
        .unwrap();
        bus.listen(Listen::new("a.b", push(&t, "second"))).unwrap();

        bus.publish(Publish::new("a.b")).await.unwrap();
        // the running stage keeps its snapshot
        assert_eq!(*t.lock(), vec!["first", "second"]);

        t.lock().clear();
        bus.publish(Publish::new("a.b")).await.unwrap();
        assert_eq!(*t.lock(), vec!["newcomer"]);
    }

    #[tokio::test]
    async fn test_stop() {
        let bus = Bus::new();
        let t = trace();
        let ids = bus.listen(Listen::new(["a.b", "c.d"], push(&t, "x"))).unwrap();
        assert_eq!(ids.len(), 2);
        bus.listen(Listen::new("ns:a.b", push(&t, "ns"))).unwrap();

        assert_eq!(bus.stop(Stop::new("a.b").handler(ids[0].clone())).unwrap(), 1);
        assert_eq!(bus.stop(Stop::new("c.d")).unwrap(), 1);
        bus.publish(Publish::new(["a.b", "c.d"])).await.unwrap();
        assert_eq!(*t.lock(), vec!["ns"]);
        assert_eq!(bus.stop(Stop::new("ns:a.b")).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = Bus::new();
        let t = trace();
        bus.subscribe(Subscribe::new(push(&t, "mine")).namespace("mine").phase("before")).unwrap();
        bus.subscribe(Subscribe::new(push(&t, "default"))).unwrap();
        bus.subscribe(Subscribe::new(push(&t, "mine-after")).namespace("mine")).unwrap();

        assert_eq!(bus.unsubscribe(Unsubscribe::new().namespace("mine").phase(Phase::After)).unwrap(), 1);
        bus.publish(Publish::new("a")).await.unwrap();
        assert_eq!(*t.lock(), vec!["mine", "default"]);

        assert_eq!(bus.unsubscribe(Unsubscribe::new()).unwrap(), 1);
        assert_eq!(bus.unsubscribe(Unsubscribe::new().namespace("mine")).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let bus = Bus::new();
        let h = || Handler::sync(|_, _| Ok(Value::Null));
        assert!(bus.listen(Listen::new("", h())).unwrap_err().is_invalid_argument());
        assert!(bus.listen(Listen::new("a.b", h()).limit(0)).unwrap_err().is_invalid_argument());
        assert!(bus.listen(Listen::new("a.b", h()).channel("")).unwrap_err().is_invalid_argument());
        assert!(bus.listen(Listen::new(Vec::<String>::new(), h())).unwrap_err().is_invalid_argument());
        assert!(bus.subscribe(Subscribe::new(h()).phase("during")).unwrap_err().is_invalid_argument());
        assert!(bus.unsubscribe(Unsubscribe::new().phase("x")).unwrap_err().is_invalid_argument());
        assert!(bus.publish(Publish::new("ns:")).await.unwrap_err().is_invalid_argument());
        assert!(bus.add_route("", ["a"]).unwrap_err().is_invalid_argument());
        // nothing was registered along the way
        assert_eq!(bus.registry().counts().handlers, 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let bus = Bus::new();
        let t = trace();
        bus.listen(Listen::new("a.b", push(&t, "h"))).unwrap();
        bus.subscribe(Subscribe::new(push(&t, "s"))).unwrap();
        bus.add_route("R", ["C"]).unwrap();

        bus.clear();
        bus.clear();
        assert!(!bus.has_route("R"));
        assert!(bus.get_route("R").is_none());
        bus.publish(Publish::new("a.b")).await.unwrap();
        assert!(t.lock().is_empty());
        assert_eq!(bus.stats()["handlers.count"], 0);
    }

    #[tokio::test]
    async fn test_with_settings() {
        let settings = BusSettings { default_namespace: "app".into(), topic_segments: 3 };
        let bus = Bus::with_settings(&settings);
        let p = bus.parse("a.b").unwrap();
        assert_eq!(p.namespace(), "app");
        assert_eq!(p.serialize(), "a.b.*");

        let t = trace();
        bus.subscribe(Subscribe::new(push(&t, "s"))).unwrap();
        // the configured default namespace is the one unsubscribe falls back to
        assert_eq!(bus.unsubscribe(Unsubscribe::new()).unwrap(), 1);
    }

    #[test]
    fn test_compare() {
        assert!(Bus::compare("foo.bar.baz", "foo.bar.*", true));
        assert!(!Bus::compare("foo.bar.*", "foo.bar.baz", true));
    }

    #[tokio::test]
    async fn test_stats() {
        let bus = Bus::new();
        let t = trace();
        bus.listen(Listen::new("a.b", push(&t, "h")).limit(1)).unwrap();
        bus.add_route("R", Vec::<String>::new()).unwrap();
        bus.publish(Publish::new(["a.b", "a.b"]).route("R")).await.unwrap();
        let stats = bus.stats();
        assert_eq!(stats["publishes.count"], 1);
        assert_eq!(stats["messages.count"], 2);
        assert_eq!(stats["invocations.count"], 1);
        assert_eq!(stats["exhausted.count"], 1);
        assert_eq!(stats["routes.count"], 1);
    }
}
