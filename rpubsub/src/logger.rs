//! Log output for the bus.
//!
//! The crate itself only uses the `log` facade. [`logger_init`] builds a
//! `slog` root logger from the `log` section of the settings and installs it
//! as the `log` backend; applications that already have a logger can skip it.

use std::fs::{File, OpenOptions};
use std::io::{self, Stdout, Write};

use anyhow::Result;
use slog::{o, Drain, Logger, Record};

use rpubsub_conf::logging::{Level, Log, To};

/// Builds the logger and makes it the `log` backend.
pub fn logger_init(cfg: &Log) -> Result<Logger> {
    let logger = config_logger(cfg.filename(), cfg.to, cfg.level);
    log::set_boxed_logger(Box::new(LoggerEx(logger.clone())))
        .map_err(|e| anyhow::anyhow!("logger init failed, {}", e))?;
    log::set_max_level(cfg.level.as_log_level().to_level_filter());
    Ok(logger)
}

struct LoggerEx(Logger);

impl log::Log for LoggerEx {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, r: &log::Record) {
        let level = log_to_slog_level(r.metadata().level());
        let args = r.args();
        let target = r.target();
        let location = &record_as_location(r);
        let s = slog::RecordStatic { location, level, tag: target };

        self.0.log(&slog::Record::new(&s, args, slog::b!()))
    }

    fn flush(&self) {}
}

fn log_to_slog_level(level: log::Level) -> slog::Level {
    match level {
        log::Level::Trace => slog::Level::Trace,
        log::Level::Debug => slog::Level::Debug,
        log::Level::Info => slog::Level::Info,
        log::Level::Warn => slog::Level::Warning,
        log::Level::Error => slog::Level::Error,
    }
}

fn record_as_location(r: &log::Record) -> slog::RecordLocation {
    let module = r.module_path_static().unwrap_or("<unknown>");
    let file = r.file_static().unwrap_or("<unknown>");
    let line = r.line().unwrap_or_default();

    slog::RecordLocation { file, line, column: 0, function: "", module }
}

pub fn config_logger(filename: String, to: To, level: Level) -> Logger {
    let decorator = slog_term::PlainDecorator::new(WriteFilter::new(filename, to));
    let drain = slog_term::FullFormat::new(decorator)
        .use_custom_timestamp(|io: &mut dyn io::Write| {
            write!(io, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        })
        .build()
        .ignore_res();

    let drain = LevelFilter { drain, level }.fuse();

    let drain = slog_async::Async::new(drain)
        .chan_size(4096)
        .overflow_strategy(slog_async::OverflowStrategy::DropAndReport)
        .build()
        .fuse();

    Logger::root(drain, o!())
}

struct LevelFilter<D> {
    drain: D,
    level: Level,
}

impl<D> Drain for LevelFilter<D>
where
    D: Drain,
{
    type Ok = Option<D::Ok>;
    type Err = Option<D::Err>;

    fn log(&self, record: &Record, values: &slog::OwnedKVList) -> std::result::Result<Self::Ok, Self::Err> {
        if record.level().is_at_least(self.level.inner()) {
            self.drain.log(record, values).map(Some).map_err(Some)
        } else {
            Ok(None)
        }
    }
}

struct WriteFilter {
    filename: String,
    to: To,

    file: Option<File>,
    console: Stdout,
}

impl WriteFilter {
    fn new(filename: String, to: To) -> Self {
        Self { filename, to, file: None, console: io::stdout() }
    }

    fn file(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            self.file = Some(open_file(&self.filename)?);
        }
        self.file.as_mut().ok_or_else(|| io::Error::other("log file unavailable"))
    }
}

impl io::Write for WriteFilter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match self.to {
            To::Console => self.console.write(buf)?,
            To::File => self.file()?.write(buf)?,
            To::Both => {
                let _ = self.console.write(buf)?;
                self.file()?.write(buf)?
            }
            To::Off => buf.len(),
        };
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.to {
            To::Console => self.console.flush()?,
            To::File => self.file()?.flush()?,
            To::Both => {
                self.console.flush()?;
                self.file()?.flush()?;
            }
            To::Off => {}
        };
        Ok(())
    }
}

fn open_file(filename: &str) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(filename).map_err(|e| {
        io::Error::new(e.kind(), format!("logger file config error, filename: {}, {:?}", filename, e))
    })
}
