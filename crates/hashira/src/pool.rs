use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use crate::args::Arguments;
use crate::config::{ConfigProvider, PoolSettings};
use crate::log::{Level, LogRecord, LogSink, Source};
use crate::process::ExternalProcess;
use crate::types::*;

/// Runs a batch of jobs, at most `max_simultaneous_processes` at a time,
/// until the batch drains or the time limit passes.
///
/// Completion is detected by polling each PID every `process_check_delay`.
/// Processes still running when the time limit passes are left alone; see
/// [`terminate_remaining`](Self::terminate_remaining).
pub struct ProcessPool {
	name: String,
	settings: PoolSettings,
	log: Arc<dyn LogSink>,
	queue: VecDeque<Job>,
	running: HashMap<u32, RunningProcess>,
	final_callback: Option<Callback>,
	state: PoolState,
	started_at: Option<Instant>,
	report: RunReport,
}

impl ProcessPool {
	/// Settings are read from `config` under `pools.<name>.*`.
	pub fn new(name: &str, config: &dyn ConfigProvider, log: Arc<dyn LogSink>) -> Self {
		let name = pool_name(name);
		let settings = PoolSettings::resolve(&name, config);
		Self::with_settings(&name, settings, log)
	}

	pub fn with_settings(name: &str, settings: PoolSettings, log: Arc<dyn LogSink>) -> Self {
		let pool = Self {
			name: pool_name(name),
			settings,
			log,
			queue: VecDeque::new(),
			running: HashMap::new(),
			final_callback: None,
			state: PoolState::Idle,
			started_at: None,
			report: RunReport::default(),
		};
		pool.log(
			Level::DEBUG,
			format!(
				"max {} processes, time limit {:?}, check every {:?}",
				pool.settings.max_simultaneous_processes,
				pool.settings.time_limit,
				pool.settings.process_check_delay
			),
		);
		pool
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn settings(&self) -> &PoolSettings {
		&self.settings
	}

	pub fn state(&self) -> PoolState {
		self.state
	}

	pub fn report(&self) -> RunReport {
		self.report.clone()
	}

	pub fn queued_count(&self) -> usize {
		self.queue.len()
	}

	pub fn running_count(&self) -> usize {
		self.running.len()
	}

	pub fn running_pids(&self) -> Vec<u32> {
		self.running.keys().copied().collect()
	}

	/// Jobs launch in the order they were added.
	pub fn add_job(&mut self, command: &str, arguments: Arguments, callback: Option<Callback>) {
		self.push(Job {
			command: command.to_string(),
			arguments,
			callback,
		});
	}

	pub fn push(&mut self, job: Job) {
		if self.state != PoolState::Idle {
			self.log(
				Level::WARN,
				format!("pool is {}, dropping command {}", self.state, job.command),
			);
			return;
		}
		self.log(Level::DEBUG, format!("adding command {}", job.command));
		self.queue.push_back(job);
	}

	/// Replaces any callback set earlier.
	pub fn set_final_callback(&mut self, callback: impl FnOnce() + Send + 'static) {
		self.final_callback = Some(Box::new(callback));
	}

	pub fn time_limit_exceeded(&self) -> bool {
		match self.started_at {
			Some(start) => start.elapsed() >= self.settings.time_limit,
			None => false,
		}
	}

	pub fn max_allowed_processes_are_running(&self) -> bool {
		self.running.len() >= self.settings.max_simultaneous_processes
	}

	/// Launch every queued job and wait for all of them, or for the time
	/// limit. The final callback runs only if the limit was never hit.
	pub async fn run_all(&mut self) {
		if self.state != PoolState::Idle {
			self.log(Level::WARN, format!("pool is already {}, not running again", self.state));
			return;
		}

		self.set_state(PoolState::Running);
		self.started_at = Some(Instant::now());
		self.report.total = self.queue.len();

		while !self.queue.is_empty() {
			if self.max_allowed_processes_are_running() {
				self.log(
					Level::INFO,
					format!(
						"reached {} simultaneous processes, waiting for one to finish",
						self.settings.max_simultaneous_processes
					),
				);
				self.wait_for_slot().await;
			}

			if self.time_limit_exceeded() {
				self.time_out();
				break;
			}

			let Some(job) = self.queue.pop_front() else {
				break;
			};
			self.launch(job).await;
		}

		if self.state == PoolState::TimedOut {
			self.report.abandoned = self.queue.len();
			self.queue.clear();
		} else {
			self.set_state(PoolState::Draining);
		}

		self.drain().await;

		let launched = self.report.launched + self.report.failed;
		self.log(
			Level::INFO,
			format!("finished running commands, ran {} out of {}", launched, self.report.total),
		);

		if self.state != PoolState::TimedOut && self.time_limit_exceeded() {
			self.time_out();
		}
		self.report.timed_out = self.state == PoolState::TimedOut;
		self.report.elapsed_secs = self
			.started_at
			.map(|start| start.elapsed().as_secs_f64())
			.unwrap_or_default();

		if self.report.timed_out {
			self.log(Level::WARN, "time limit exceeded, not running final callback");
		} else if let Some(callback) = self.final_callback.take() {
			self.log(Level::INFO, "calling final callback");
			callback();
			self.log(Level::INFO, "final callback is complete");
		}

		self.set_state(PoolState::Done);
	}

	/// Send SIGTERM to every process still tracked and stop tracking them.
	/// Their callbacks are dropped. Returns how many were confirmed gone.
	pub fn terminate_remaining(&mut self) -> usize {
		let mut dead = 0;
		for (pid, running) in self.running.drain() {
			if running.process.terminate() {
				dead += 1;
			} else {
				self.log.record(&LogRecord {
					level: Level::WARN,
					source: Source::Pool(self.name.clone()),
					message: format!("process {} did not stop on SIGTERM", pid),
				});
			}
		}
		dead
	}

	async fn wait_for_slot(&mut self) {
		loop {
			let reaped = self.reap_completed();
			if reaped > 0 || self.time_limit_exceeded() {
				return;
			}
			self.log(
				Level::TRACE,
				format!("sleeping, will check again in {:?}", self.settings.process_check_delay),
			);
			tokio::time::sleep(self.settings.process_check_delay).await;
		}
	}

	async fn drain(&mut self) {
		loop {
			self.reap_completed();
			if self.running.is_empty() {
				break;
			}
			if self.time_limit_exceeded() {
				if self.state != PoolState::TimedOut {
					self.time_out();
				}
				break;
			}
			tokio::time::sleep(self.settings.process_check_delay).await;
		}

		self.report.untracked = self.running.len();
		if !self.running.is_empty() {
			let mut pids = self.running_pids();
			pids.sort_unstable();
			self.log(
				Level::WARN,
				format!("leaving {} processes running: {:?}", pids.len(), pids),
			);
		}
	}

	/// One pass over the in-flight set. Returns how many were reaped.
	fn reap_completed(&mut self) -> usize {
		let finished: Vec<u32> = self
			.running
			.iter()
			.filter(|(_, running)| !running.process.is_running())
			.map(|(pid, _)| *pid)
			.collect();

		for pid in &finished {
			if let Some(running) = self.running.remove(pid) {
				self.log(Level::INFO, format!("process {} is complete", pid));
				self.finish(running);
			}
		}
		finished.len()
	}

	fn finish(&mut self, running: RunningProcess) {
		self.report.completed += 1;
		if let Some(callback) = running.callback {
			self.log(Level::DEBUG, format!("calling callback for {}", running.pid));
			callback();
		}
	}

	async fn launch(&mut self, job: Job) {
		let Job {
			command,
			arguments,
			callback,
		} = job;

		let mut process = ExternalProcess::new(
			&command,
			&arguments,
			self.settings.interpreter.clone(),
			Arc::clone(&self.log),
		);

		let pid = match process.launch().await {
			Ok(pid) => pid,
			Err(e) => {
				self.report.failed += 1;
				self.log(Level::ERROR, format!("skipping {:?}: {}", command, e));
				return;
			}
		};

		self.track(pid, process, callback);
	}

	fn track(&mut self, pid: u32, process: ExternalProcess, callback: Option<Callback>) {
		// the OS only hands out a PID again once the old holder has exited
		if let Some(previous) = self.running.remove(&pid) {
			self.log(
				Level::WARN,
				format!("pid {} was reused before it was reaped ({})", pid, previous.command),
			);
			self.finish(previous);
		}

		self.log(Level::INFO, format!("adding process {} {}", pid, process.command()));
		self.running.insert(
			pid,
			RunningProcess {
				pid,
				command: process.command().to_string(),
				process,
				callback,
			},
		);
		self.report.launched += 1;
		self.report.peak_in_flight = self.report.peak_in_flight.max(self.running.len());
		debug_assert!(self.running.len() <= self.settings.max_simultaneous_processes);
	}

	fn time_out(&mut self) {
		self.log(Level::WARN, "time limit has been exceeded");
		self.set_state(PoolState::TimedOut);
	}

	fn set_state(&mut self, state: PoolState) {
		self.log(Level::DEBUG, format!("{} -> {}", self.state, state));
		self.state = state;
	}

	fn log(&self, level: Level, message: impl Into<String>) {
		self.log.record(&LogRecord {
			level,
			source: Source::Pool(self.name.clone()),
			message: message.into(),
		});
	}
}

fn pool_name(name: &str) -> String {
	let name = name.trim();
	if name.is_empty() {
		"default".to_string()
	} else {
		name.to_string()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;
	use crate::log::MemorySink;

	fn counter_callback(count: &Arc<AtomicUsize>) -> Option<Callback> {
		let count = Arc::clone(count);
		Some(Box::new(move || {
			count.fetch_add(1, Ordering::SeqCst);
		}))
	}

	#[test]
	fn test_reused_pid_finishes_previous_holder() {
		let sink = Arc::new(MemorySink::new());
		let settings = PoolSettings::default().with_max_simultaneous_processes(2);
		let mut pool = ProcessPool::with_settings("reuse", settings, sink.clone());
		let process = |cmd: &str| {
			ExternalProcess::new(cmd, &Arguments::none(), Some("sh".into()), sink.clone())
		};

		let first = Arc::new(AtomicUsize::new(0));
		let second = Arc::new(AtomicUsize::new(0));
		pool.track(4242, process("first.sh"), counter_callback(&first));
		pool.track(4242, process("second.sh"), counter_callback(&second));

		assert_eq!(first.load(Ordering::SeqCst), 1);
		assert_eq!(second.load(Ordering::SeqCst), 0);
		assert_eq!(pool.running_count(), 1);
		assert_eq!(pool.running[&4242].command, "second.sh");

		let report = pool.report();
		assert_eq!(report.launched, 2);
		assert_eq!(report.completed, 1);
		assert!(report.peak_in_flight <= pool.settings().max_simultaneous_processes);
		assert!(sink.contains("pid 4242 was reused before it was reaped (first.sh)"));
	}
}
