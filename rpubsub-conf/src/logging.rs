use std::ops::Deref;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::Deserialize;

/// Where bus log records are written and at which level.
#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    #[serde(default = "Log::to_default")]
    pub to: To,
    #[serde(default = "Log::level_default")]
    pub level: Level,
    #[serde(default)]
    pub dir: String,
    #[serde(default = "Log::file_default")]
    pub file: String,
}

impl Default for Log {
    #[inline]
    fn default() -> Self {
        Self { to: Self::to_default(), level: Self::level_default(), dir: String::new(), file: Self::file_default() }
    }
}

impl Log {
    #[inline]
    fn to_default() -> To {
        To::Console
    }
    #[inline]
    fn level_default() -> Level {
        Level { inner: slog::Level::Info }
    }
    #[inline]
    fn file_default() -> String {
        "rpubsub.log".into()
    }

    /// Full path of the log file, `dir` joined with `file`.
    #[inline]
    pub fn filename(&self) -> String {
        if self.file.is_empty() {
            return String::new();
        }
        if self.dir.is_empty() {
            return self.file.clone();
        }
        let dir = self.dir.trim_end_matches(['/', '\\']);
        format!("{dir}/{}", self.file)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum To {
    Off,
    File,
    Console,
    Both,
}

impl To {
    #[inline]
    pub fn file(&self) -> bool {
        matches!(self, To::Both | To::File)
    }
    #[inline]
    pub fn console(&self) -> bool {
        matches!(self, To::Both | To::Console)
    }
    #[inline]
    pub fn off(&self) -> bool {
        matches!(self, To::Off)
    }
}

impl FromStr for To {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(To::Off),
            "file" => Ok(To::File),
            "console" => Ok(To::Console),
            "both" => Ok(To::Both),
            _ => Err(anyhow::anyhow!("invalid log target `{}`, expected off|file|console|both", s)),
        }
    }
}

impl<'de> Deserialize<'de> for To {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let to = String::deserialize(deserializer)?;
        To::from_str(&to).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    inner: slog::Level,
}

impl Level {
    #[inline]
    pub fn new(inner: slog::Level) -> Self {
        Self { inner }
    }

    #[inline]
    pub fn inner(&self) -> slog::Level {
        self.inner
    }

    /// The same level expressed for the `log` facade.
    #[inline]
    pub fn as_log_level(&self) -> log::Level {
        match self.inner {
            slog::Level::Trace => log::Level::Trace,
            slog::Level::Debug => log::Level::Debug,
            slog::Level::Info => log::Level::Info,
            slog::Level::Warning => log::Level::Warn,
            slog::Level::Error | slog::Level::Critical => log::Level::Error,
        }
    }
}

impl Deref for Level {
    type Target = slog::Level;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'de> Deserialize<'de> for Level {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level = String::deserialize(deserializer)?;
        let level = slog::Level::from_str(&level).map_err(|_e| de::Error::missing_field("level"))?;
        Ok(Level { inner: level })
    }
}
