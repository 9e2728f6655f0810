use std::fmt;
use std::io;
use std::process::Stdio;
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Command;

use crate::args::{escape_command, Arguments, EscapedArguments};
use crate::log::{Level, LogRecord, LogSink, Source};

/// Why a process could not be started. None of these are retried.
#[derive(Debug)]
pub enum LaunchError {
	/// The command was empty.
	EmptyCommand,
	/// No interpreter is configured for the pool.
	NoInterpreter,
	/// `sh` itself could not be spawned.
	Spawn(io::Error),
	/// The shell did not report a usable PID.
	NoPid(String),
}

impl fmt::Display for LaunchError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LaunchError::EmptyCommand => write!(f, "no command given"),
			LaunchError::NoInterpreter => write!(
				f,
				"no interpreter configured (set pools.<name>.interpreter or interpreter)"
			),
			LaunchError::Spawn(e) => write!(f, "spawn failed: {}", e),
			LaunchError::NoPid(out) => write!(f, "no pid reported (got {:?})", out),
		}
	}
}

impl std::error::Error for LaunchError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			LaunchError::Spawn(e) => Some(e),
			_ => None,
		}
	}
}

/// A command run detached in the background, tracked only by its PID.
pub struct ExternalProcess {
	command: String,
	arguments: EscapedArguments,
	interpreter: Option<String>,
	pid: Option<u32>,
	log: Arc<dyn LogSink>,
}

impl ExternalProcess {
	/// Escapes `command` and every argument value up front. An empty command
	/// is accepted here and rejected by [`launch`](Self::launch).
	pub fn new(
		command: &str,
		arguments: &Arguments,
		interpreter: Option<String>,
		log: Arc<dyn LogSink>,
	) -> Self {
		Self {
			command: escape_command(command.trim()),
			arguments: arguments.escaped(),
			interpreter: interpreter.filter(|i| !i.trim().is_empty()),
			pid: None,
			log,
		}
	}

	pub fn command(&self) -> &str {
		&self.command
	}

	pub fn arguments(&self) -> &EscapedArguments {
		&self.arguments
	}

	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	/// The full shell invocation: detached with `nohup`, output discarded,
	/// backgrounded, and the background PID echoed back.
	pub fn command_line(&self) -> Result<String, LaunchError> {
		if self.command.is_empty() {
			return Err(LaunchError::EmptyCommand);
		}
		let interpreter = self.interpreter.as_deref().ok_or(LaunchError::NoInterpreter)?;

		let mut line = format!("nohup {} {}", interpreter, self.command);
		let args = self.arguments.render();
		if !args.is_empty() {
			line.push(' ');
			line.push_str(&args);
		}
		line.push_str(" 1>/dev/null 2>/dev/null & echo $!");
		Ok(line)
	}

	pub async fn launch(&mut self) -> Result<u32, LaunchError> {
		let command_line = match self.command_line() {
			Ok(line) => line,
			Err(e) => {
				self.log(Level::ERROR, &format!("cannot execute command: {}", e));
				return Err(e);
			}
		};

		self.log(Level::INFO, &format!("running command: {}", command_line));

		// own process group so the child is not tied to ours
		let output = Command::new("sh")
			.arg("-c")
			.arg(&command_line)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.process_group(0)
			.output()
			.await
			.map_err(|e| {
				self.log(Level::ERROR, &format!("spawn failed: {}", e));
				LaunchError::Spawn(e)
			})?;

		let stdout = String::from_utf8_lossy(&output.stdout);
		let pid = stdout
			.lines()
			.next()
			.and_then(|line| line.trim().parse::<u32>().ok())
			.filter(|pid| *pid > 0);

		match pid {
			Some(pid) => {
				self.pid = Some(pid);
				self.log(Level::DEBUG, &format!("process id is {}", pid));
				Ok(pid)
			}
			None => {
				let got = stdout.trim().to_string();
				self.log(Level::ERROR, &format!("no pid in shell output {:?}", got));
				Err(LaunchError::NoPid(got))
			}
		}
	}

	/// Point-in-time check of the process table. The answer can be stale by
	/// the time the caller acts on it.
	pub fn is_running(&self) -> bool {
		match self.pid {
			Some(pid) => pid_is_alive(pid),
			None => false,
		}
	}

	/// Send SIGTERM and report whether the process is gone right after.
	/// `false` only means it had not exited yet.
	pub fn terminate(&self) -> bool {
		let Some(pid) = self.pid else {
			return true;
		};
		let Ok(raw) = i32::try_from(pid) else {
			self.log(Level::WARN, &format!("pid {} is out of range, not signalling", pid));
			return !self.is_running();
		};
		self.log(Level::INFO, &format!("killing process {}", pid));
		if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
			self.log(Level::DEBUG, &format!("SIGTERM failed: {}", e));
		}

		if self.is_running() {
			self.log(Level::WARN, &format!("process {} is still running", pid));
			return false;
		}
		self.log(Level::INFO, &format!("process {} is dead", pid));
		true
	}

	fn log(&self, level: Level, message: &str) {
		self.log.record(&LogRecord {
			level,
			source: Source::Process(self.pid),
			message: message.to_string(),
		});
	}
}

/// Signal 0 probes existence; EPERM still means the PID is taken.
pub fn pid_is_alive(pid: u32) -> bool {
	let Ok(raw) = i32::try_from(pid) else {
		return false;
	};
	if raw <= 0 {
		return false;
	}
	let exists = match kill(Pid::from_raw(raw), None::<Signal>) {
		Ok(()) => true,
		Err(Errno::EPERM) => true,
		Err(_) => false,
	};
	exists && !is_zombie(pid)
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
	let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
		return false;
	};
	// "<pid> (<comm>) <state> ..."; comm may itself contain ')'
	stat.rfind(')')
		.and_then(|pos| stat[pos + 1..].trim_start().chars().next())
		.is_some_and(|state| state == 'Z' || state == 'X')
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
	false
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::log::MemorySink;

	#[test]
	fn test_terminate_out_of_range_pid_sends_nothing() {
		let sink = Arc::new(MemorySink::new());
		let mut process = ExternalProcess::new("x", &Arguments::none(), Some("sh".into()), sink.clone());
		process.pid = Some(u32::MAX);
		assert!(!process.is_running());
		assert!(process.terminate());
		assert!(sink.contains("out of range"));
		assert!(!sink.contains("killing process"));
	}
}
