//! Logging setup and the process-wide log file sink.
//!
//! Log records are produced with `tracing` everywhere. [`init`] installs a
//! subscriber with an `EnvFilter`, a stdout layer, and, if configured, a
//! file layer writing through a [`LogSink`].
//!
//! The sink is lifecycle-scoped. During shutdown the supervisor calls
//! [`LogSink::begin_shutdown`], after which file writes are quietly
//! discarded, and then [`LogSink::close`]. Neither a write after shutdown
//! nor a failing disk ever surfaces an error to the code that logged.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingSettings;

struct SinkInner {
    path: Option<PathBuf>,
    file: Mutex<Option<BufWriter<File>>>,
    shutting_down: AtomicBool,
}

/// Shared handle to the log file.
///
/// Cloning is cheap; every clone writes to the same file.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

impl LogSink {
    /// A sink with no file behind it. Writes are discarded.
    pub fn disabled() -> Self {
        Self::with_file(None, None)
    }

    /// Opens `path` for appending, creating it and its parent directory if
    /// needed.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::with_file(Some(path.to_path_buf()), Some(BufWriter::new(file))))
    }

    fn with_file(path: Option<PathBuf>, file: Option<BufWriter<File>>) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                path,
                file: Mutex::new(file),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Suppresses all further writes.
    pub fn begin_shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Flushes and releases the file. Later writes are discarded.
    pub fn close(&self) {
        if let Some(mut file) = self.lock().take() {
            // Nowhere left to report a failed flush.
            let _ = file.flush();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<BufWriter<File>>> {
        self.inner.file.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("path", &self.inner.path)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

/// Writer handed out to the file layer for each record.
pub struct SinkWriter {
    sink: LogSink,
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.sink.is_shutting_down() {
            return Ok(buf.len());
        }
        if let Some(file) = self.sink.lock().as_mut() {
            // A full disk must not take the server down with it.
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.sink.lock().as_mut() {
            let _ = file.flush();
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SinkWriter { sink: self.clone() }
    }
}

/// Installs the global subscriber and returns the file sink.
///
/// `RUST_LOG` overrides `settings.level`. If a global subscriber is
/// already installed (tests, embedding), the existing one is kept.
pub fn init(settings: &LoggingSettings) -> io::Result<LogSink> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let sink = match &settings.file_path {
        Some(path) => LogSink::open(path)?,
        None => LogSink::disabled(),
    };
    let file_layer = settings.file_path.as_ref().map(|_| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(sink.clone())
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init();
    if let Err(e) = installed {
        tracing::debug!(error = %e, "global subscriber already installed");
    }
    Ok(sink)
}
