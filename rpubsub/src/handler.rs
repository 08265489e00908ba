use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::topic::MessagePattern;
use crate::{Error, Result};

pub type HandlerId = String;

pub type SyncFn = dyn Fn(&MessagePattern, &Value) -> anyhow::Result<Value> + Send + Sync;
pub type AsyncFn = dyn Fn(&MessagePattern, &Value, Continuation) + Send + Sync;

/// Called with every handler result of a publish.
pub type OnPublish = Box<dyn FnMut(&Value) + Send>;
/// Called once, after the last stage of the last message of a publish.
pub type OnComplete = Box<dyn FnOnce() + Send>;

#[inline]
pub(crate) fn next_id() -> HandlerId {
    Uuid::new_v4().as_simple().encode_lower(&mut Uuid::encode_buffer()).to_string()
}

/// A callable registered on the bus.
///
/// `Sync` handlers return their result directly. `Async` handlers receive a
/// [`Continuation`] and the pipeline does not advance until it is completed,
/// either inside the call or later from another task.
#[derive(Clone)]
pub enum Handler {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl Handler {
    #[inline]
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&MessagePattern, &Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Handler::Sync(Arc::new(f))
    }

    #[inline]
    pub fn async_fn<F>(f: F) -> Self
    where
        F: Fn(&MessagePattern, &Value, Continuation) + Send + Sync + 'static,
    {
        Handler::Async(Arc::new(f))
    }

    #[inline]
    pub fn is_async(&self) -> bool {
        matches!(self, Handler::Async(_))
    }

    /// Runs the handler up to the point where it hands back control. For
    /// async handlers the result arrives later through the continuation.
    pub(crate) fn invoke(&self, message: &MessagePattern, payload: &Value) -> Invocation {
        match self {
            Handler::Sync(f) => Invocation::Ready(f(message, payload).map_err(Error::HandlerFault)),
            Handler::Async(f) => {
                let (tx, rx) = oneshot::channel();
                f(message, payload, Continuation { tx });
                Invocation::Pending(rx)
            }
        }
    }

    #[inline]
    pub(crate) async fn call(&self, id: &str, message: &MessagePattern, payload: &Value) -> Result<Value> {
        self.invoke(message, payload).wait(id).await
    }
}

/// A handler that has been called but whose result may not be in yet.
pub(crate) enum Invocation {
    Ready(Result<Value>),
    Pending(oneshot::Receiver<anyhow::Result<Value>>),
}

impl Invocation {
    /// True for a synchronous handler that returned an error.
    #[inline]
    pub(crate) fn is_fault(&self) -> bool {
        matches!(self, Invocation::Ready(Err(_)))
    }

    pub(crate) async fn wait(self, id: &str) -> Result<Value> {
        match self {
            Invocation::Ready(res) => res,
            Invocation::Pending(rx) => match rx.await {
                Ok(res) => res.map_err(Error::HandlerFault),
                Err(_) => Err(Error::ContinuationDropped { handler: id.to_owned() }),
            },
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Sync(_) => write!(f, "Handler::Sync"),
            Handler::Async(_) => write!(f, "Handler::Async"),
        }
    }
}

/// Completion signal handed to an asynchronous handler.
///
/// Consumed on use, so a handler can complete at most once. Dropping it
/// without completing fails the publish with [`Error::ContinuationDropped`].
pub struct Continuation {
    tx: oneshot::Sender<anyhow::Result<Value>>,
}

impl Continuation {
    #[inline]
    pub fn complete(self, result: Value) {
        //the receiver is gone only if the publish future was dropped
        let _ = self.tx.send(Ok(result));
    }

    #[inline]
    pub fn done(self) {
        self.complete(Value::Null)
    }

    #[inline]
    pub fn fail(self, err: anyhow::Error) {
        let _ = self.tx.send(Err(err));
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Continuation {{ closed: {} }}", self.tx.is_closed())
    }
}
