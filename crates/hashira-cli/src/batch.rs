use std::path::{Path, PathBuf};

use hashira::{Arguments, MapConfig};
use serde::Deserialize;

/// A batch file: optional `[pool]` overrides plus `[[jobs]]`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BatchFile {
	#[serde(default)]
	pub pool: PoolSection,
	#[serde(default)]
	pub jobs: Vec<JobDef>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PoolSection {
	pub name: Option<String>,
	pub max_simultaneous_processes: Option<i64>,
	pub time_limit: Option<f64>,
	pub process_check_delay: Option<f64>,
	pub interpreter: Option<String>,
	#[serde(default)]
	pub kill_on_timeout: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobDef {
	pub command: String,
	pub label: Option<String>,
	#[serde(default)]
	pub args: Vec<String>,
	/// Named options in file order. `true` or `""` renders a bare flag,
	/// `false` leaves the option out.
	#[serde(default)]
	pub options: toml::Table,
}

pub struct BatchJob {
	pub label: String,
	pub command: String,
	pub arguments: Arguments,
}

impl BatchFile {
	pub fn parse(content: &str) -> Result<Self, String> {
		toml::from_str(content).map_err(|e| e.to_string())
	}

	pub fn pool_name(&self) -> String {
		self.pool
			.name
			.clone()
			.filter(|n| !n.trim().is_empty())
			.unwrap_or_else(|| "default".to_string())
	}

	/// The `[pool]` table as config keys for `pool_name()`.
	pub fn overrides(&self) -> MapConfig {
		let name = self.pool_name();
		let key = |k: &str| format!("pools.{}.{}", name, k);
		let mut config = MapConfig::new();
		if let Some(max) = self.pool.max_simultaneous_processes {
			config.insert(key("max_simultaneous_processes"), max);
		}
		if let Some(limit) = self.pool.time_limit {
			config.insert(key("time_limit"), limit);
		}
		if let Some(delay) = self.pool.process_check_delay {
			config.insert(key("process_check_delay"), delay);
		}
		if let Some(ref interpreter) = self.pool.interpreter {
			config.insert(key("interpreter"), interpreter);
		}
		config
	}

	/// Relative commands that exist next to the batch file are resolved
	/// against its directory; anything else is passed through as written.
	pub fn jobs(&self, base_dir: &Path) -> Result<Vec<BatchJob>, String> {
		self.jobs
			.iter()
			.enumerate()
			.map(|(i, def)| {
				let arguments = def.arguments().map_err(|e| format!("job {}: {}", i + 1, e))?;
				let command = resolve_command(base_dir, &def.command);
				let label = def.label.clone().unwrap_or_else(|| def.command.clone());
				Ok(BatchJob {
					label,
					command,
					arguments,
				})
			})
			.collect()
	}
}

impl JobDef {
	fn arguments(&self) -> Result<Arguments, String> {
		if !self.args.is_empty() && !self.options.is_empty() {
			return Err("use either args or options, not both".to_string());
		}
		if !self.options.is_empty() {
			let mut args = Arguments::Named(Vec::new());
			for (name, value) in &self.options {
				args = match value {
					toml::Value::Boolean(true) => args.flag(name.as_str()),
					toml::Value::Boolean(false) => args,
					toml::Value::String(s) => args.option(name.as_str(), s.as_str()),
					toml::Value::Integer(n) => args.option(name.as_str(), n.to_string()),
					toml::Value::Float(f) => args.option(name.as_str(), f.to_string()),
					other => {
						return Err(format!("option {} has unsupported value {}", name, other));
					}
				};
			}
			return Ok(args);
		}
		Ok(Arguments::positional(self.args.iter().cloned()))
	}
}

fn resolve_command(base_dir: &Path, command: &str) -> String {
	let path = Path::new(command);
	if path.is_relative() && !command.contains(char::is_whitespace) {
		let candidate: PathBuf = base_dir.join(path);
		if candidate.exists() {
			return candidate.to_string_lossy().into_owned();
		}
	}
	command.to_string()
}

pub fn load(path: &Path) -> Result<BatchFile, String> {
	let content = std::fs::read_to_string(path)
		.map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
	BatchFile::parse(&content).map_err(|e| format!("failed to parse {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
	use super::*;
	use hashira::{ConfigProvider, PoolSettings};
	use std::time::Duration;

	const DEMO: &str = r#"
[pool]
name = "demo"
max_simultaneous_processes = 3
time_limit = 3600
process_check_delay = 1

[[jobs]]
command = "sleeper.sh"
label = "Doc"
options = { "-h" = true, "--wait-time" = 2, "--iterations" = 1, "--id" = "Doc" }

[[jobs]]
command = "echo.sh"
args = ["a", "b"]
"#;

	#[test]
	fn test_parse_demo_batch() {
		let batch = BatchFile::parse(DEMO).unwrap();
		assert_eq!(batch.pool_name(), "demo");
		assert_eq!(batch.jobs.len(), 2);

		let jobs = batch.jobs(Path::new("/nonexistent")).unwrap();
		assert_eq!(jobs[0].label, "Doc");
		assert_eq!(jobs[0].command, "sleeper.sh");
		assert_eq!(
			jobs[0].arguments.render(),
			"-h --wait-time='2' --iterations='1' --id='Doc'"
		);
		assert_eq!(jobs[1].label, "echo.sh");
		assert_eq!(jobs[1].arguments.render(), "'a' 'b'");
	}

	#[test]
	fn test_overrides_resolve_for_pool() {
		let batch = BatchFile::parse(DEMO).unwrap();
		let overrides = batch.overrides();
		let provider: &dyn ConfigProvider = &overrides;
		assert_eq!(provider.value("pools.demo.time_limit").as_deref(), Some("3600"));

		let settings = PoolSettings::resolve("demo", &overrides);
		assert_eq!(settings.max_simultaneous_processes, 3);
		assert_eq!(settings.process_check_delay, Duration::from_secs(1));
	}

	#[test]
	fn test_false_option_is_left_out() {
		let batch = BatchFile::parse(
			r#"
[[jobs]]
command = "w.sh"
options = { "--dry-run" = false, "--id" = "" }
"#,
		)
		.unwrap();
		let jobs = batch.jobs(Path::new(".")).unwrap();
		assert_eq!(jobs[0].arguments.render(), "--id");
		assert_eq!(batch.pool_name(), "default");
	}

	#[test]
	fn test_args_and_options_conflict() {
		let batch = BatchFile::parse(
			r#"
[[jobs]]
command = "w.sh"
args = ["x"]
options = { "-v" = true }
"#,
		)
		.unwrap();
		let err = batch.jobs(Path::new(".")).err().unwrap();
		assert!(err.contains("job 1"));
	}

	#[test]
	fn test_relative_command_resolved_next_to_batch() {
		let dir = std::env::temp_dir().join(format!("hashira-cli-test-{}", std::process::id()));
		let _ = std::fs::create_dir_all(&dir);
		std::fs::write(dir.join("work.sh"), "exit 0\n").unwrap();

		assert_eq!(resolve_command(&dir, "work.sh"), dir.join("work.sh").to_string_lossy());
		assert_eq!(resolve_command(&dir, "missing.sh"), "missing.sh");
		assert_eq!(resolve_command(&dir, "/bin/true"), "/bin/true");

		let _ = std::fs::remove_dir_all(&dir);
	}
}
