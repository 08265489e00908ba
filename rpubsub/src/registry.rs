//! Handler and subscriber storage.
//!
//! Handlers are grouped under the serialized form of the pattern they were
//! registered with, either in the global scope or in the scope of a channel.
//! Keys keep the order in which they were first registered and every key keeps
//! its entries in insertion order, so a lookup returns handlers in a stable,
//! predictable sequence.
//!
//! Lookups return `Arc` snapshots. The pipeline iterates a snapshot while
//! handlers are free to register or remove entries; call counts live on the
//! shared entry so a removal that happens mid-stage is still observed.

use std::collections::{BTreeMap, HashMap as StdHashMap};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::handler::{next_id, Handler, HandlerId};
use crate::topic::MessagePattern;
use crate::{Error, Result};

type HashMap<K, V> = StdHashMap<K, V, ahash::RandomState>;

pub type ChannelName = String;

pub struct HandlerEntry {
    id: HandlerId,
    pattern: MessagePattern,
    channel: Option<ChannelName>,
    handler: Handler,
    limit: Option<NonZeroUsize>,
    count: AtomicUsize,
}

impl HandlerEntry {
    #[inline]
    pub fn id(&self) -> &HandlerId {
        &self.id
    }

    #[inline]
    pub fn pattern(&self) -> &MessagePattern {
        &self.pattern
    }

    #[inline]
    pub fn namespace(&self) -> &str {
        self.pattern.namespace()
    }

    #[inline]
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    #[inline]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    #[inline]
    pub fn is_async(&self) -> bool {
        self.handler.is_async()
    }

    #[inline]
    pub fn limit(&self) -> Option<NonZeroUsize> {
        self.limit
    }

    #[inline]
    pub fn call_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// No limit, or fewer calls so far than the limit.
    #[inline]
    pub fn is_eligible(&self) -> bool {
        self.limit.map(|l| self.call_count() < l.get()).unwrap_or(true)
    }

    /// Counts one invocation, returns true when the limit has just been reached.
    #[inline]
    pub(crate) fn record_call(&self) -> bool {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        self.limit.map(|l| count >= l.get()).unwrap_or(false)
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("id", &self.id)
            .field("pattern", &self.pattern.serialize())
            .field("namespace", &self.pattern.namespace())
            .field("channel", &self.channel)
            .field("handler", &self.handler)
            .field("limit", &self.limit)
            .field("count", &self.call_count())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Before,
    #[default]
    After,
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "before" => Ok(Phase::Before),
            "after" => Ok(Phase::After),
            _ => Err(Error::invalid(format!("unknown phase `{}`, expected before|after", s))),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Before => f.write_str("before"),
            Phase::After => f.write_str("after"),
        }
    }
}

#[derive(Debug)]
pub struct SubscriberEntry {
    id: HandlerId,
    handler: Handler,
    namespace: String,
    phase: Phase,
}

impl SubscriberEntry {
    #[inline]
    pub fn id(&self) -> &HandlerId {
        &self.id
    }

    #[inline]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    #[inline]
    pub fn is_async(&self) -> bool {
        self.handler.is_async()
    }

    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }
}

struct Slot {
    pattern: MessagePattern,
    entries: Vec<Arc<HandlerEntry>>,
}

/// Pattern keys of one scope, in registration order.
#[derive(Default)]
struct Scope {
    seq: u64,
    keys: HashMap<String, u64>,
    slots: BTreeMap<u64, Slot>,
}

impl Scope {
    fn push(&mut self, entry: Arc<HandlerEntry>) {
        let key = entry.pattern.serialize();
        let seq = match self.keys.get(key) {
            Some(seq) => *seq,
            None => {
                self.seq += 1;
                self.keys.insert(key.to_owned(), self.seq);
                self.slots.insert(self.seq, Slot { pattern: entry.pattern.clone(), entries: Vec::new() });
                self.seq
            }
        };
        if let Some(slot) = self.slots.get_mut(&seq) {
            slot.entries.push(entry);
        }
    }

    fn retain<F>(&mut self, key: &str, mut keep: F) -> usize
    where
        F: FnMut(&HandlerEntry) -> bool,
    {
        let Some(seq) = self.keys.get(key).copied() else {
            return 0;
        };
        let Some(slot) = self.slots.get_mut(&seq) else {
            return 0;
        };
        let before = slot.entries.len();
        slot.entries.retain(|e| keep(e));
        let removed = before - slot.entries.len();
        if slot.entries.is_empty() {
            self.slots.remove(&seq);
            self.keys.remove(key);
        }
        removed
    }

    fn lookup(&self, message: &MessagePattern, out: &mut Vec<Arc<HandlerEntry>>) {
        for slot in self.slots.values() {
            if message.matches(&slot.pattern) {
                out.extend(slot.entries.iter().cloned());
            }
        }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    fn keys(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn entries(&self) -> usize {
        self.slots.values().map(|s| s.entries.len()).sum()
    }
}

#[derive(Default)]
struct Inner {
    globals: Scope,
    channels: HashMap<ChannelName, Scope>,
    before: Vec<Arc<SubscriberEntry>>,
    after: Vec<Arc<SubscriberEntry>>,
}

impl Inner {
    #[inline]
    fn scope_mut(&mut self, channel: Option<&str>) -> Option<&mut Scope> {
        match channel {
            None => Some(&mut self.globals),
            Some(c) => self.channels.get_mut(c),
        }
    }

    #[inline]
    fn subscribers_mut(&mut self, phase: Phase) -> &mut Vec<Arc<SubscriberEntry>> {
        match phase {
            Phase::Before => &mut self.before,
            Phase::After => &mut self.after,
        }
    }

    fn prune_channel(&mut self, channel: Option<&str>) {
        if let Some(c) = channel {
            if self.channels.get(c).map(|s| s.is_empty()).unwrap_or(false) {
                self.channels.remove(c);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryCounts {
    pub global_keys: usize,
    pub channel_keys: usize,
    pub handlers: usize,
    pub before_subscribers: usize,
    pub after_subscribers: usize,
}

#[derive(Default)]
pub struct HandlerRegistry {
    inner: RwLock<Inner>,
}

impl HandlerRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(
        &self,
        pattern: MessagePattern,
        channel: Option<ChannelName>,
        handler: Handler,
        limit: Option<NonZeroUsize>,
    ) -> HandlerId {
        let id = next_id();
        let entry = Arc::new(HandlerEntry {
            id: id.clone(),
            pattern,
            channel,
            handler,
            limit,
            count: AtomicUsize::new(0),
        });
        log::debug!("add handler {:?}", entry);
        let mut inner = self.inner.write();
        match entry.channel.clone() {
            None => inner.globals.push(entry),
            Some(c) => inner.channels.entry(c).or_default().push(entry),
        }
        id
    }

    /// Removes handlers under `pattern`'s key whose namespace matches, or only
    /// the one with id `handler` when given. Returns the number removed.
    pub fn remove_handlers(
        &self,
        pattern: &MessagePattern,
        channel: Option<&str>,
        handler: Option<&str>,
    ) -> usize {
        let namespace = pattern.namespace();
        let mut inner = self.inner.write();
        let removed = match inner.scope_mut(channel) {
            Some(scope) => scope.retain(pattern.serialize(), |e| {
                let selected = e.namespace() == namespace && handler.map(|id| e.id == id).unwrap_or(true);
                !selected
            }),
            None => 0,
        };
        inner.prune_channel(channel);
        removed
    }

    /// Removes exactly this entry, if still registered.
    pub(crate) fn remove_entry(&self, entry: &HandlerEntry) -> bool {
        let channel = entry.channel();
        let mut inner = self.inner.write();
        let removed = match inner.scope_mut(channel) {
            Some(scope) => scope.retain(entry.pattern.serialize(), |e| e.id != entry.id),
            None => 0,
        };
        inner.prune_channel(channel);
        removed > 0
    }

    /// Matching entries in key-registration order, then insertion order.
    pub fn lookup(&self, message: &MessagePattern, channel: Option<&str>) -> Vec<Arc<HandlerEntry>> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        match channel {
            None => inner.globals.lookup(message, &mut out),
            Some(c) => {
                if let Some(scope) = inner.channels.get(c) {
                    scope.lookup(message, &mut out);
                }
            }
        }
        out
    }

    pub fn subscribe(&self, handler: Handler, namespace: String, phase: Phase) -> HandlerId {
        let id = next_id();
        let entry = Arc::new(SubscriberEntry { id: id.clone(), handler, namespace, phase });
        log::debug!("add subscriber {:?}", entry);
        self.inner.write().subscribers_mut(phase).push(entry);
        id
    }

    /// Removes subscribers of `namespace`, from one phase or from both.
    pub fn unsubscribe(&self, namespace: &str, phase: Option<Phase>) -> usize {
        let mut inner = self.inner.write();
        let phases: &[Phase] = match phase {
            Some(Phase::Before) => &[Phase::Before],
            Some(Phase::After) => &[Phase::After],
            None => &[Phase::Before, Phase::After],
        };
        let mut removed = 0;
        for p in phases {
            let subs = inner.subscribers_mut(*p);
            let before = subs.len();
            subs.retain(|s| s.namespace != namespace);
            removed += before - subs.len();
        }
        removed
    }

    #[inline]
    pub fn subscribers(&self, phase: Phase) -> Vec<Arc<SubscriberEntry>> {
        let inner = self.inner.read();
        match phase {
            Phase::Before => inner.before.clone(),
            Phase::After => inner.after.clone(),
        }
    }

    #[inline]
    pub fn clear(&self) {
        *self.inner.write() = Inner::default();
    }

    pub fn counts(&self) -> RegistryCounts {
        let inner = self.inner.read();
        RegistryCounts {
            global_keys: inner.globals.keys(),
            channel_keys: inner.channels.values().map(|s| s.keys()).sum(),
            handlers: inner.globals.entries() + inner.channels.values().map(|s| s.entries()).sum::<usize>(),
            before_subscribers: inner.before.len(),
            after_subscribers: inner.after.len(),
        }
    }
}
