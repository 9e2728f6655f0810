use std::fmt;
use std::sync::Mutex;

pub use tracing::Level;

/// Who a log line is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
	Pool(String),
	/// `None` until the process has been launched.
	Process(Option<u32>),
}

impl fmt::Display for Source {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Source::Pool(name) => write!(f, "pool:{}", name),
			Source::Process(Some(pid)) => write!(f, "process:{}", pid),
			Source::Process(None) => write!(f, "process:-"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
	pub level: Level,
	pub source: Source,
	pub message: String,
}

/// Destination for everything the pool and its processes report.
pub trait LogSink: Send + Sync {
	fn record(&self, record: &LogRecord);
}

/// Forwards records to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
	fn record(&self, record: &LogRecord) {
		match &record.source {
			Source::Pool(name) => emit_pool(record.level, name, &record.message),
			Source::Process(pid) => emit_process(record.level, *pid, &record.message),
		}
	}
}

fn emit_pool(level: Level, pool: &str, message: &str) {
	match level {
		Level::ERROR => tracing::error!(pool, "{}", message),
		Level::WARN => tracing::warn!(pool, "{}", message),
		Level::INFO => tracing::info!(pool, "{}", message),
		Level::DEBUG => tracing::debug!(pool, "{}", message),
		_ => tracing::trace!(pool, "{}", message),
	}
}

fn emit_process(level: Level, pid: Option<u32>, message: &str) {
	match level {
		Level::ERROR => tracing::error!(pid, "{}", message),
		Level::WARN => tracing::warn!(pid, "{}", message),
		Level::INFO => tracing::info!(pid, "{}", message),
		Level::DEBUG => tracing::debug!(pid, "{}", message),
		_ => tracing::trace!(pid, "{}", message),
	}
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
	records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn records(&self) -> Vec<LogRecord> {
		self.records.lock().map(|r| r.clone()).unwrap_or_default()
	}

	pub fn messages(&self) -> Vec<String> {
		self.records().into_iter().map(|r| r.message).collect()
	}

	pub fn contains(&self, needle: &str) -> bool {
		self.records().iter().any(|r| r.message.contains(needle))
	}
}

impl LogSink for MemorySink {
	fn record(&self, record: &LogRecord) {
		if let Ok(mut records) = self.records.lock() {
			records.push(record.clone());
		}
	}
}
