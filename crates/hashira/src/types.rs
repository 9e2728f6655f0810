use std::fmt;

use serde::Serialize;

use crate::args::Arguments;
use crate::process::ExternalProcess;

/// Completion hook. Anything the callback needs is captured by the closure.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A queued command, not yet launched.
pub struct Job {
	pub command: String,
	pub arguments: Arguments,
	pub callback: Option<Callback>,
}

impl Job {
	pub fn new(command: impl Into<String>, arguments: Arguments) -> Self {
		Self {
			command: command.into(),
			arguments,
			callback: None,
		}
	}

	pub fn on_complete(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
		self.callback = Some(Box::new(callback));
		self
	}
}

impl fmt::Debug for Job {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Job")
			.field("command", &self.command)
			.field("arguments", &self.arguments)
			.field("callback", &self.callback.is_some())
			.finish()
	}
}

/// A launched job the pool is still watching.
pub struct RunningProcess {
	pub pid: u32,
	pub command: String,
	pub process: ExternalProcess,
	pub callback: Option<Callback>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
	Idle,
	Running,
	Draining,
	TimedOut,
	Done,
}

impl fmt::Display for PoolState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			PoolState::Idle => "idle",
			PoolState::Running => "running",
			PoolState::Draining => "draining",
			PoolState::TimedOut => "timed out",
			PoolState::Done => "done",
		};
		f.write_str(s)
	}
}

/// Counters for one `run_all`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
	pub total: usize,
	pub launched: usize,
	pub failed: usize,
	pub completed: usize,
	/// Never launched because the time limit ran out.
	pub abandoned: usize,
	/// Launched but still running when the pool gave up on them.
	pub untracked: usize,
	pub peak_in_flight: usize,
	pub timed_out: bool,
	pub elapsed_secs: f64,
}
