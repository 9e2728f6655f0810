use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_SIMULTANEOUS_PROCESSES: usize = 5;
pub const DEFAULT_TIME_LIMIT_SECS: f64 = 600.0;
pub const DEFAULT_PROCESS_CHECK_DELAY_SECS: f64 = 2.0;
pub const DEFAULT_INTERPRETER: &str = "sh";

/// Key-value lookup the pool reads its tunables from.
pub trait ConfigProvider: Send + Sync {
	fn value(&self, key: &str) -> Option<String>;
}

impl<'a> dyn ConfigProvider + 'a {
	/// Parse `key` as `T`, falling back to `default` when missing or malformed.
	pub fn get<T: FromStr>(&self, key: &str, default: T) -> T {
		self.value(key)
			.and_then(|v| v.trim().parse().ok())
			.unwrap_or(default)
	}
}

/// Provider with nothing in it; every lookup falls back to defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConfig;

impl ConfigProvider for NoConfig {
	fn value(&self, _key: &str) -> Option<String> {
		None
	}
}

#[derive(Debug, Default, Clone)]
pub struct MapConfig {
	values: BTreeMap<String, String>,
}

impl MapConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set(mut self, key: impl Into<String>, value: impl ToString) -> Self {
		self.values.insert(key.into(), value.to_string());
		self
	}

	pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
		self.values.insert(key.into(), value.to_string());
	}
}

impl ConfigProvider for MapConfig {
	fn value(&self, key: &str) -> Option<String> {
		self.values.get(key).cloned()
	}
}

/// Dotted-key view of a TOML document: `pools.demo.time_limit` reads
/// `[pools.demo] time_limit = ...`.
#[derive(Debug, Default, Clone)]
pub struct TomlConfig {
	table: toml::Table,
}

impl TomlConfig {
	pub fn new(table: toml::Table) -> Self {
		Self { table }
	}

	pub fn parse(content: &str) -> Result<Self, String> {
		toml::from_str::<toml::Table>(content)
			.map(Self::new)
			.map_err(|e| e.to_string())
	}

	fn lookup(&self, key: &str) -> Option<&toml::Value> {
		let mut parts = key.split('.');
		let mut current = self.table.get(parts.next()?)?;
		for part in parts {
			current = current.as_table()?.get(part)?;
		}
		Some(current)
	}
}

impl ConfigProvider for TomlConfig {
	fn value(&self, key: &str) -> Option<String> {
		match self.lookup(key)? {
			toml::Value::String(s) => Some(s.clone()),
			toml::Value::Integer(i) => Some(i.to_string()),
			toml::Value::Float(f) => Some(f.to_string()),
			toml::Value::Boolean(b) => Some(b.to_string()),
			_ => None,
		}
	}
}

/// Providers searched in order; the first one with the key wins.
#[derive(Default, Clone)]
pub struct Layered {
	layers: Vec<Arc<dyn ConfigProvider>>,
}

impl Layered {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, layer: Arc<dyn ConfigProvider>) -> Self {
		self.layers.push(layer);
		self
	}
}

impl ConfigProvider for Layered {
	fn value(&self, key: &str) -> Option<String> {
		self.layers.iter().find_map(|layer| layer.value(key))
	}
}

pub fn config_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
		PathBuf::from(dir).join("hashira")
	} else if let Ok(home) = std::env::var("HOME") {
		PathBuf::from(home).join(".config").join("hashira")
	} else {
		PathBuf::from("/tmp").join("hashira").join("config")
	}
}

pub fn default_config_path() -> PathBuf {
	config_dir().join("config.toml")
}

/// Load a TOML config file. A missing or broken file yields an empty config.
pub fn load_config(path: &Path) -> TomlConfig {
	if !path.exists() {
		return TomlConfig::default();
	}
	match std::fs::read_to_string(path) {
		Ok(content) => match TomlConfig::parse(&content) {
			Ok(config) => config,
			Err(e) => {
				tracing::warn!("failed to parse {}: {}", path.display(), e);
				TomlConfig::default()
			}
		},
		Err(e) => {
			tracing::warn!("failed to read {}: {}", path.display(), e);
			TomlConfig::default()
		}
	}
}

/// Tunables for one pool, resolved by pool name.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
	pub max_simultaneous_processes: usize,
	pub time_limit: Duration,
	pub process_check_delay: Duration,
	/// `None` means no interpreter is configured and nothing can launch.
	/// Passed to `sh` as written, without escaping.
	pub interpreter: Option<String>,
}

impl Default for PoolSettings {
	fn default() -> Self {
		Self {
			max_simultaneous_processes: DEFAULT_MAX_SIMULTANEOUS_PROCESSES,
			time_limit: Duration::from_secs_f64(DEFAULT_TIME_LIMIT_SECS),
			process_check_delay: Duration::from_secs_f64(DEFAULT_PROCESS_CHECK_DELAY_SECS),
			interpreter: Some(DEFAULT_INTERPRETER.to_string()),
		}
	}
}

impl PoolSettings {
	pub fn resolve(pool: &str, config: &dyn ConfigProvider) -> Self {
		let key = |name: &str| format!("pools.{}.{}", pool, name);

		let max: i64 = config.get(
			&key("max_simultaneous_processes"),
			DEFAULT_MAX_SIMULTANEOUS_PROCESSES as i64,
		);
		let time_limit: f64 = config.get(&key("time_limit"), DEFAULT_TIME_LIMIT_SECS);
		let delay: f64 = config.get(&key("process_check_delay"), DEFAULT_PROCESS_CHECK_DELAY_SECS);
		let interpreter = config
			.value(&key("interpreter"))
			.or_else(|| config.value("interpreter"))
			.unwrap_or_else(|| DEFAULT_INTERPRETER.to_string());

		Self {
			max_simultaneous_processes: max.max(1) as usize,
			time_limit: seconds(time_limit),
			process_check_delay: seconds(delay),
			interpreter: Some(interpreter.trim().to_string()).filter(|s| !s.is_empty()),
		}
	}

	pub fn with_max_simultaneous_processes(mut self, max: usize) -> Self {
		self.max_simultaneous_processes = max.max(1);
		self
	}

	pub fn with_time_limit(mut self, limit: Duration) -> Self {
		self.time_limit = limit;
		self
	}

	pub fn with_process_check_delay(mut self, delay: Duration) -> Self {
		self.process_check_delay = delay;
		self
	}

	pub fn with_interpreter(mut self, interpreter: Option<String>) -> Self {
		self.interpreter = interpreter.filter(|s| !s.trim().is_empty());
		self
	}
}

/// Negative and NaN clamp to zero; anything too large for a `Duration`
/// (including infinity) saturates.
fn seconds(value: f64) -> Duration {
	if value.is_nan() || value <= 0.0 {
		return Duration::ZERO;
	}
	Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults_without_config() {
		let settings = PoolSettings::resolve("default", &NoConfig);
		assert_eq!(settings, PoolSettings::default());
		assert_eq!(settings.max_simultaneous_processes, 5);
		assert_eq!(settings.time_limit, Duration::from_secs(600));
		assert_eq!(settings.process_check_delay, Duration::from_secs(2));
	}

	#[test]
	fn test_settings_namespaced_by_pool() {
		let config = MapConfig::new()
			.set("pools.demo.max_simultaneous_processes", 3)
			.set("pools.demo.time_limit", 3600)
			.set("pools.demo.process_check_delay", "0.5")
			.set("pools.other.max_simultaneous_processes", 9);
		let demo = PoolSettings::resolve("demo", &config);
		assert_eq!(demo.max_simultaneous_processes, 3);
		assert_eq!(demo.time_limit, Duration::from_secs(3600));
		assert_eq!(demo.process_check_delay, Duration::from_millis(500));

		let other = PoolSettings::resolve("other", &config);
		assert_eq!(other.max_simultaneous_processes, 9);
		assert_eq!(other.time_limit, Duration::from_secs(600));
	}

	#[test]
	fn test_settings_clamped() {
		let config = MapConfig::new()
			.set("pools.x.max_simultaneous_processes", 0)
			.set("pools.x.time_limit", -5)
			.set("pools.x.process_check_delay", "soon");
		let settings = PoolSettings::resolve("x", &config);
		assert_eq!(settings.max_simultaneous_processes, 1);
		assert_eq!(settings.time_limit, Duration::ZERO);
		assert_eq!(settings.process_check_delay, Duration::from_secs(2));
	}

	#[test]
	fn test_huge_time_limit_saturates() {
		let config = MapConfig::new()
			.set("pools.p.time_limit", "1e20")
			.set("pools.q.time_limit", "inf")
			.set("pools.r.time_limit", "1e19");
		assert_eq!(PoolSettings::resolve("p", &config).time_limit, Duration::MAX);
		assert_eq!(PoolSettings::resolve("q", &config).time_limit, Duration::MAX);
		assert!(PoolSettings::resolve("r", &config).time_limit > Duration::from_secs(1 << 40));

		let config = MapConfig::new().set("pools.n.time_limit", "NaN");
		assert_eq!(PoolSettings::resolve("n", &config).time_limit, Duration::ZERO);
	}

	#[test]
	fn test_interpreter_fallback_chain() {
		let config = MapConfig::new().set("interpreter", "bash");
		assert_eq!(PoolSettings::resolve("a", &config).interpreter.as_deref(), Some("bash"));

		let config = config.set("pools.a.interpreter", "/bin/bash");
		assert_eq!(
			PoolSettings::resolve("a", &config).interpreter.as_deref(),
			Some("/bin/bash")
		);

		let config = MapConfig::new().set("pools.a.interpreter", "");
		assert_eq!(PoolSettings::resolve("a", &config).interpreter, None);
	}

	#[test]
	fn test_toml_dotted_lookup() {
		let config = TomlConfig::parse(
			r#"
interpreter = "bash"

[pools.nightly]
max_simultaneous_processes = 2
time_limit = 7200
process_check_delay = 0.25
"#,
		)
		.unwrap();
		assert_eq!(config.value("interpreter").as_deref(), Some("bash"));
		assert_eq!(config.value("pools.nightly.time_limit").as_deref(), Some("7200"));
		assert_eq!(config.value("pools.nightly.missing"), None);
		assert_eq!(config.value("pools.nightly"), None);

		let settings = PoolSettings::resolve("nightly", &config);
		assert_eq!(settings.max_simultaneous_processes, 2);
		assert_eq!(settings.process_check_delay, Duration::from_millis(250));
		assert_eq!(settings.interpreter.as_deref(), Some("bash"));
	}

	#[test]
	fn test_layered_first_hit_wins() {
		let top: Arc<dyn ConfigProvider> = Arc::new(MapConfig::new().set("pools.p.time_limit", 5));
		let bottom: Arc<dyn ConfigProvider> = Arc::new(
			MapConfig::new()
				.set("pools.p.time_limit", 50)
				.set("pools.p.max_simultaneous_processes", 4),
		);
		let layered = Layered::new().with(top).with(bottom);
		let settings = PoolSettings::resolve("p", &layered);
		assert_eq!(settings.time_limit, Duration::from_secs(5));
		assert_eq!(settings.max_simultaneous_processes, 4);
	}

	#[test]
	fn test_load_missing_file_is_empty() {
		let config = load_config(Path::new("/nonexistent/hashira/config.toml"));
		assert_eq!(config.value("interpreter"), None);
	}
}
