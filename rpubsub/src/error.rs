use crate::handler::HandlerId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A request field is missing or malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Publish named a route that was never added
    #[error("route `{0}` does not exist")]
    UnknownRoute(String),
    /// A synchronous handler returned an error
    #[error("handler fault: {0}")]
    HandlerFault(#[source] anyhow::Error),
    /// An asynchronous handler dropped its continuation without calling it
    #[error("handler {handler} dropped its continuation without completing")]
    ContinuationDropped { handler: HandlerId },
}

impl Error {
    #[inline]
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    #[inline]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    #[inline]
    pub fn is_unknown_route(&self) -> bool {
        matches!(self, Error::UnknownRoute(_))
    }

    #[inline]
    pub fn is_handler_fault(&self) -> bool {
        matches!(self, Error::HandlerFault(_) | Error::ContinuationDropped { .. })
    }
}
