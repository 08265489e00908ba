//! Request builders for the [`Bus`](crate::Bus) entry points.
//!
//! Builders only collect raw input. Topics, limits and phases are parsed and
//! validated when the request reaches the bus, which reports problems as
//! [`Error::InvalidArgument`](crate::Error::InvalidArgument).
//!
//! ```rust,no_run
//! use rpubsub::{Bus, Handler, Listen, Publish};
//! use serde_json::json;
//!
//! # async fn run() -> rpubsub::Result<()> {
//! let bus = Bus::new();
//! bus.listen(Listen::new("UI.tab.opened", Handler::sync(|_, p| Ok(p.clone()))).channel("Reports"))?;
//! bus.add_route("ui", ["Reports"])?;
//! bus.publish(Publish::new("UI.tab.opened.MAIN").route("ui").payload(json!({ "id": 7 }))).await?;
//! # Ok(())
//! # }
//! ```

use serde_json::Value;

use crate::handler::{Handler, HandlerId, OnComplete, OnPublish};

/// One topic string or an ordered list of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Messages(pub(crate) Vec<String>);

impl Messages {
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }
}

impl From<&str> for Messages {
    fn from(m: &str) -> Self {
        Messages(vec![m.to_owned()])
    }
}

impl From<String> for Messages {
    fn from(m: String) -> Self {
        Messages(vec![m])
    }
}

impl From<&String> for Messages {
    fn from(m: &String) -> Self {
        Messages(vec![m.clone()])
    }
}

impl<S: Into<String>> From<Vec<S>> for Messages {
    fn from(ms: Vec<S>) -> Self {
        Messages(ms.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for Messages {
    fn from(ms: [S; N]) -> Self {
        Messages(ms.into_iter().map(Into::into).collect())
    }
}

/// Registers `handler` for every message pattern.
#[derive(Debug)]
pub struct Listen {
    pub(crate) messages: Messages,
    pub(crate) handler: Handler,
    pub(crate) channel: Option<String>,
    pub(crate) limit: Option<usize>,
}

impl Listen {
    pub fn new<M: Into<Messages>>(messages: M, handler: Handler) -> Self {
        Self { messages: messages.into(), handler, channel: None, limit: None }
    }

    /// Scopes the handler to a channel, reached only through routes.
    pub fn channel<N: Into<String>>(mut self, channel: N) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Unregisters the handler after `limit` calls, must be positive.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Removes handlers registered under the message patterns.
#[derive(Debug, Clone)]
pub struct Stop {
    pub(crate) messages: Messages,
    pub(crate) channel: Option<String>,
    pub(crate) handler: Option<HandlerId>,
}

impl Stop {
    pub fn new<M: Into<Messages>>(messages: M) -> Self {
        Self { messages: messages.into(), channel: None, handler: None }
    }

    pub fn channel<N: Into<String>>(mut self, channel: N) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Removes only the handler with this id.
    pub fn handler<H: Into<HandlerId>>(mut self, id: H) -> Self {
        self.handler = Some(id.into());
        self
    }
}

#[derive(Debug)]
pub struct Subscribe {
    pub(crate) handler: Handler,
    pub(crate) namespace: Option<String>,
    pub(crate) phase: Option<String>,
}

impl Subscribe {
    pub fn new(handler: Handler) -> Self {
        Self { handler, namespace: None, phase: None }
    }

    pub fn namespace<N: Into<String>>(mut self, namespace: N) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// `before` or `after`, accepts a [`Phase`](crate::Phase) as well.
    pub fn phase<P: ToString>(mut self, phase: P) -> Self {
        self.phase = Some(phase.to_string());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Unsubscribe {
    pub(crate) namespace: Option<String>,
    pub(crate) phase: Option<String>,
}

impl Unsubscribe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace<N: Into<String>>(mut self, namespace: N) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn phase<P: ToString>(mut self, phase: P) -> Self {
        self.phase = Some(phase.to_string());
        self
    }
}

pub struct Publish {
    pub(crate) messages: Messages,
    pub(crate) route: Option<String>,
    pub(crate) payload: Option<Value>,
    pub(crate) on_publish: Option<OnPublish>,
    pub(crate) on_complete: Option<OnComplete>,
}

impl Publish {
    pub fn new<M: Into<Messages>>(messages: M) -> Self {
        Self { messages: messages.into(), route: None, payload: None, on_publish: None, on_complete: None }
    }

    pub fn route<N: Into<String>>(mut self, route: N) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Defaults to an empty object.
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Receives every handler and subscriber result.
    pub fn on_publish<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.on_publish = Some(Box::new(f));
        self
    }

    /// Runs once, after all messages went through all stages.
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_complete = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for Publish {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publish")
            .field("messages", &self.messages)
            .field("route", &self.route)
            .field("payload", &self.payload)
            .field("on_publish", &self.on_publish.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}
