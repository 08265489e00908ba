use std::sync::Arc;

use crate::registry::ChannelName;
use crate::{Error, Result};

type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;

pub type Channels = Arc<Vec<ChannelName>>;

/// Named, ordered channel lists. A publish that names a route visits the
/// channels in this order, one at a time.
#[derive(Default)]
pub struct RouteTable {
    routes: DashMap<String, Channels>,
}

impl RouteTable {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `channels` under `name`, replacing any previous route.
    pub fn add_route<N, I, C>(&self, name: N, channels: I) -> Result<()>
    where
        N: Into<String>,
        I: IntoIterator<Item = C>,
        C: Into<ChannelName>,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid("route name is empty"));
        }
        let channels: Vec<ChannelName> = channels.into_iter().map(Into::into).collect();
        log::info!("add route {} => {:?}", name, channels);
        self.routes.insert(name, Arc::new(channels));
        Ok(())
    }

    #[inline]
    pub fn get_route(&self, name: &str) -> Option<Channels> {
        self.routes.get(name).map(|r| r.value().clone())
    }

    #[inline]
    pub fn has_route(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Like [`get_route`](Self::get_route) but a missing route is an error.
    #[inline]
    pub fn resolve(&self, name: &str) -> Result<Channels> {
        self.get_route(name).ok_or_else(|| Error::UnknownRoute(name.to_owned()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    #[inline]
    pub fn clear(&self) {
        self.routes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes() {
        let routes = RouteTable::new();
        assert!(!routes.has_route("ui"));
        routes.add_route("ui", ["Reports", "Charts"]).unwrap();
        assert!(routes.has_route("ui"));
        assert_eq!(*routes.get_route("ui").unwrap(), vec!["Reports".to_string(), "Charts".to_string()]);

        // last write wins
        routes.add_route("ui", vec!["Charts".to_string()]).unwrap();
        assert_eq!(routes.get_route("ui").unwrap().len(), 1);
        assert_eq!(routes.len(), 1);

        routes.add_route("empty", Vec::<String>::new()).unwrap();
        assert!(routes.get_route("empty").unwrap().is_empty());
    }

    #[test]
    fn test_errors() {
        let routes = RouteTable::new();
        assert!(routes.add_route("", ["a"]).unwrap_err().is_invalid_argument());
        assert!(routes.resolve("missing").unwrap_err().is_unknown_route());
        routes.add_route("x", ["a"]).unwrap();
        routes.clear();
        assert!(routes.is_empty());
        routes.clear();
        assert!(routes.get_route("x").is_none());
    }
}
