//! Delivery of one message through the bus.
//!
//! A delivery walks a fixed sequence of stages:
//!
//! ```text
//! BeforeSubscribers -> GlobalHandlers -> ChannelRoute -> AfterSubscribers -> Done
//! ```
//!
//! Every handler of a stage runs to completion, asynchronous ones included,
//! before the next handler starts. `ChannelRoute` visits the channels of the
//! published route one after the other, so each channel acts as a barrier.
//!
//! The registry is read once per stage (and once per channel). The resulting
//! snapshot is what the stage iterates, so handlers registering or removing
//! entries while they run affect the next stage, not the running one. Call
//! limits are checked against the live count of each entry. The count moves
//! as soon as a handler has been called, before an asynchronous one completes,
//! and an entry that reaches its limit is unregistered right away.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::handler::OnPublish;
use crate::registry::{HandlerEntry, HandlerRegistry, Phase};
use crate::route::Channels;
use crate::stats::Stats;
use crate::topic::MessagePattern;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    BeforeSubscribers,
    GlobalHandlers,
    ChannelRoute,
    AfterSubscribers,
    Done,
}

impl Stage {
    #[inline]
    pub fn next(self) -> Stage {
        match self {
            Stage::BeforeSubscribers => Stage::GlobalHandlers,
            Stage::GlobalHandlers => Stage::ChannelRoute,
            Stage::ChannelRoute => Stage::AfterSubscribers,
            Stage::AfterSubscribers | Stage::Done => Stage::Done,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::BeforeSubscribers => "before-subscribers",
            Stage::GlobalHandlers => "global-handlers",
            Stage::ChannelRoute => "channel-route",
            Stage::AfterSubscribers => "after-subscribers",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

pub(crate) struct Delivery<'a> {
    registry: &'a HandlerRegistry,
    stats: &'a Stats,
    message: &'a MessagePattern,
    payload: &'a Value,
    channels: Option<&'a Channels>,
    on_publish: &'a mut Option<OnPublish>,
}

impl<'a> Delivery<'a> {
    pub(crate) fn new(
        registry: &'a HandlerRegistry,
        stats: &'a Stats,
        message: &'a MessagePattern,
        payload: &'a Value,
        channels: Option<&'a Channels>,
        on_publish: &'a mut Option<OnPublish>,
    ) -> Self {
        Self { registry, stats, message, payload, channels, on_publish }
    }

    pub(crate) async fn run(mut self) -> Result<()> {
        let mut stage = Stage::BeforeSubscribers;
        while stage != Stage::Done {
            log::debug!("{} enter stage {}", self.message, stage);
            match stage {
                Stage::BeforeSubscribers => self.subscribers(Phase::Before).await?,
                Stage::GlobalHandlers => self.handlers(None).await?,
                Stage::ChannelRoute => {
                    if let Some(channels) = self.channels {
                        for channel in channels.iter() {
                            self.handlers(Some(channel.as_str())).await?;
                        }
                    }
                }
                Stage::AfterSubscribers => self.subscribers(Phase::After).await?,
                Stage::Done => {}
            }
            stage = stage.next();
        }
        Ok(())
    }

    async fn subscribers(&mut self, phase: Phase) -> Result<()> {
        for sub in self.registry.subscribers(phase) {
            log::debug!("{} -> subscriber {} ({})", self.message, sub.id(), sub.namespace());
            self.stats.invocations.inc();
            let res = sub.handler().call(sub.id(), self.message, self.payload).await;
            self.emit(res)?;
        }
        Ok(())
    }

    async fn handlers(&mut self, channel: Option<&str>) -> Result<()> {
        let snapshot = self.registry.lookup(self.message, channel);
        for entry in snapshot {
            if !entry.is_eligible() {
                continue;
            }
            log::debug!(
                "{} -> handler {} {} channel: {:?}",
                self.message,
                entry.id(),
                entry.pattern(),
                entry.channel()
            );
            self.stats.invocations.inc();
            let invocation = entry.handler().invoke(self.message, self.payload);
            //counted once called, not once completed; a failed sync call does not count
            if !invocation.is_fault() {
                self.exhaust(&entry);
            }
            let res = invocation.wait(entry.id()).await;
            self.emit(res)?;
        }
        Ok(())
    }

    fn exhaust(&self, entry: &Arc<HandlerEntry>) {
        if entry.record_call() && self.registry.remove_entry(entry) {
            log::debug!("handler {} reached its call limit and was removed", entry.id());
            self.stats.exhausted.inc();
        }
    }

    fn emit(&mut self, res: Result<Value>) -> Result<()> {
        match res {
            Ok(v) => {
                if let Some(f) = self.on_publish.as_mut() {
                    f(&v);
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("{} delivery aborted, {}", self.message, e);
                self.stats.faults.inc();
                Err(e)
            }
        }
    }
}
