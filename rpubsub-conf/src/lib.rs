#![deny(unsafe_code)]

//! Settings for the rpubsub message bus.
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. `/etc/rpubsub/rpubsub.{toml,...}` (optional)
//! 2. `rpubsub.{toml,...}` in the working directory (optional)
//! 3. `RPUBSUB_*` environment variables, nested keys separated by `__`
//!    (e.g. `RPUBSUB_BUS__DEFAULT_NAMESPACE=app`)
//! 4. the file named by [`Options::cfg_name`], if any
//!
//! ```rust,no_run
//! use rpubsub_conf::{Options, Settings};
//!
//! let settings = Settings::init(Options::default()).unwrap();
//! assert_eq!(settings.bus.topic_segments, 4);
//! ```

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use config::{Config, File};
use once_cell::sync::OnceCell;
use serde::Deserialize;

use self::logging::Log;

pub mod logging;

/// Namespace given to patterns and subscribers that do not name one.
pub const DEFAULT_NAMESPACE: &str = "__default";

/// Segment count of a fully specified topic: originator, subject, verb, descriptor.
pub const DEFAULT_TOPIC_SEGMENTS: usize = 4;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub log: Log,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    pub fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/rpubsub/rpubsub").required(false))
            .add_source(File::with_name("rpubsub").required(false))
            .add_source(
                config::Environment::with_prefix("rpubsub")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(true));
        }

        let mut inner: Inner = builder.build()?.try_deserialize()?;
        inner.bus.validate()?;

        //Command line configuration overriding file configuration
        if let Some(ns) = opts.default_namespace.as_ref() {
            inner.bus.default_namespace.clone_from(ns);
        }

        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    #[inline]
    pub fn instance() -> &'static Self {
        match SETTINGS.get() {
            Some(c) => c,
            None => {
                unreachable!("Settings not initialized");
            }
        }
    }

    #[inline]
    pub fn try_instance() -> Option<&'static Self> {
        SETTINGS.get()
    }

    #[inline]
    pub fn init(opts: Options) -> Result<&'static Self> {
        SETTINGS.set(Settings::new(opts)?).map_err(|_| anyhow!("Settings init failed"))?;
        SETTINGS.get().ok_or_else(|| anyhow!("Settings init failed"))
    }

    #[inline]
    pub fn logs() -> Result<()> {
        let cfg = Self::try_instance().ok_or_else(|| anyhow!("Settings not initialized"))?;
        log::debug!("Config info is {:?}", cfg.0);
        log::info!("bus.default_namespace is {}", cfg.bus.default_namespace);
        log::info!("bus.topic_segments is {}", cfg.bus.topic_segments);
        log::info!("log config is: {:?}", cfg.log);
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self(Arc::new(Inner::default()))
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusSettings {
    //Namespace assigned to handlers and subscribers registered without one.
    #[serde(default = "BusSettings::default_namespace_default")]
    pub default_namespace: String,

    //Dotted topics with fewer segments than this are padded with wildcards.
    #[serde(default = "BusSettings::topic_segments_default")]
    pub topic_segments: usize,
}

impl Default for BusSettings {
    #[inline]
    fn default() -> Self {
        Self {
            default_namespace: Self::default_namespace_default(),
            topic_segments: Self::topic_segments_default(),
        }
    }
}

impl BusSettings {
    fn default_namespace_default() -> String {
        DEFAULT_NAMESPACE.into()
    }
    fn topic_segments_default() -> usize {
        DEFAULT_TOPIC_SEGMENTS
    }

    fn validate(&self) -> Result<()> {
        if self.default_namespace.is_empty() {
            return Err(anyhow!("bus.default_namespace must not be empty"));
        }
        if self.topic_segments == 0 {
            return Err(anyhow!("bus.topic_segments must be greater than 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    //Config filename
    pub cfg_name: Option<String>,
    //Overrides bus.default_namespace
    pub default_namespace: Option<String>,
}
