use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::ser::{Serialize, Serializer};
use serde_json::json;

use crate::registry::RegistryCounts;

/// Monotonic event counter.
#[derive(Default)]
pub struct Counter(AtomicUsize);

impl Counter {
    #[inline]
    pub fn inc(&self) {
        self.incs(1);
    }

    #[inline]
    pub fn incs(&self, c: usize) {
        self.0.fetch_add(c, Ordering::SeqCst);
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.count())
    }
}

impl Serialize for Counter {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(self.count() as u64)
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct Stats {
    /// Publish calls that passed validation
    pub publishes: Counter,
    /// Individual messages delivered, one per element of a publish
    pub messages: Counter,
    /// Handler and subscriber invocations
    pub invocations: Counter,
    /// Handlers removed because they reached their call limit
    pub exhausted: Counter,
    /// Invocations that failed the publish
    pub faults: Counter,
}

impl Stats {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_json(&self, registry: &RegistryCounts, routes: usize) -> serde_json::Value {
        json!({
            "publishes.count": self.publishes.count(),
            "messages.count": self.messages.count(),
            "invocations.count": self.invocations.count(),
            "exhausted.count": self.exhausted.count(),
            "faults.count": self.faults.count(),
            "handlers.count": registry.handlers,
            "global_keys.count": registry.global_keys,
            "channel_keys.count": registry.channel_keys,
            "before_subscribers.count": registry.before_subscribers,
            "after_subscribers.count": registry.after_subscribers,
            "routes.count": routes,
        })
    }
}
