mod batch;
mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashira::config::{self, ConfigProvider, Layered};
use hashira::{Job, PoolSettings, ProcessPool, TracingSink};
use owo_colors::OwoColorize;

#[derive(Debug, Default)]
struct Opts {
	positional: Vec<String>,
	config: Option<PathBuf>,
	json: bool,
	kill_on_timeout: bool,
}

impl Opts {
	fn parse(args: &[String]) -> Result<Self, String> {
		let mut opts = Opts::default();
		let mut iter = args.iter();
		while let Some(arg) = iter.next() {
			match arg.as_str() {
				"--config" | "-c" => {
					let path = iter.next().ok_or("--config needs a path")?;
					opts.config = Some(PathBuf::from(path));
				}
				"--json" => opts.json = true,
				"--kill-on-timeout" => opts.kill_on_timeout = true,
				flag if flag.starts_with("--") => return Err(format!("unknown option: {}", flag)),
				_ => opts.positional.push(arg.clone()),
			}
		}
		Ok(opts)
	}

	fn config_path(&self) -> PathBuf {
		self.config.clone().unwrap_or_else(config::default_config_path)
	}
}

#[tokio::main]
async fn main() {
	let args: Vec<String> = std::env::args().skip(1).collect();
	let verbose = args.iter().any(|a| a == "-v" || a == "--verbose");
	init_tracing(verbose);
	let args: Vec<String> = args
		.into_iter()
		.filter(|a| a != "-v" && a != "--verbose")
		.collect();

	if args.is_empty() {
		print_usage();
		return;
	}

	let opts = match Opts::parse(&args[1..]) {
		Ok(opts) => opts,
		Err(e) => fail(&e),
	};

	match args[0].as_str() {
		"help" | "--help" | "-h" => print_usage(),
		"version" | "--version" | "-V" => println!("hashira {}", env!("CARGO_PKG_VERSION")),
		"run" => cmd_run(&opts).await,
		"settings" => cmd_settings(&opts),
		other => {
			eprintln!("unknown command: {}", other);
			eprintln!("run 'hashira help' for usage");
			std::process::exit(1);
		}
	}
}

fn init_tracing(verbose: bool) {
	let level = if verbose {
		tracing::Level::DEBUG
	} else {
		tracing::Level::WARN
	};
	tracing_subscriber::fmt()
		.with_max_level(level)
		.with_writer(std::io::stderr)
		.with_target(false)
		.init();
}

fn print_usage() {
	eprintln!("{} {} — run batches of detached commands", "hashira".bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} <command> [options]", "hashira".bold());
	eprintln!();
	eprintln!("{}", "commands".cyan().bold());
	eprintln!("  {} <batch.toml>       Run every job in a batch file", "run".bold());
	eprintln!("  {} [pool]        Show resolved settings for a pool", "settings".bold());
	eprintln!("  {}                   Show this help", "help".bold());
	eprintln!("  {}                Show version", "version".bold());
	eprintln!();
	eprintln!("{}", "options".cyan().bold());
	eprintln!("  {} <path>        Config file (default {})", "--config".bold(), config::default_config_path().display());
	eprintln!("  {}                 Print the run report as JSON", "--json".bold());
	eprintln!("  {}      SIGTERM jobs still running after a timeout", "--kill-on-timeout".bold());
	eprintln!("  {}            Debug logging", "-v, --verbose".bold());
}

fn fail(message: &str) -> ! {
	eprintln!("{} {}", "error:".red().bold(), message);
	std::process::exit(1);
}

async fn cmd_run(opts: &Opts) {
	let Some(path) = opts.positional.first() else {
		fail("usage: hashira run <batch.toml>");
	};
	let path = Path::new(path);
	let batch = batch::load(path).unwrap_or_else(|e| fail(&e));
	let base_dir = path.parent().unwrap_or(Path::new("."));
	let jobs = batch.jobs(base_dir).unwrap_or_else(|e| fail(&e));

	let name = batch.pool_name();
	let file_config: Arc<dyn ConfigProvider> = Arc::new(config::load_config(&opts.config_path()));
	let config = Layered::new()
		.with(Arc::new(batch.overrides()))
		.with(file_config);
	let mut pool = ProcessPool::new(&name, &config, Arc::new(TracingSink));

	for job in jobs {
		let label = job.label;
		pool.push(Job::new(job.command, job.arguments).on_complete(move || output::job_finished(&label)));
	}
	let final_name = name.clone();
	pool.set_final_callback(move || output::all_done(&final_name));

	pool.run_all().await;

	let report = pool.report();
	if report.timed_out && (opts.kill_on_timeout || batch.pool.kill_on_timeout) {
		let remaining = pool.running_count();
		let stopped = pool.terminate_remaining();
		tracing::warn!(pool = %name, "terminated {} of {} remaining processes", stopped, remaining);
	}

	if opts.json {
		match serde_json::to_string_pretty(&report) {
			Ok(json) => println!("{}", json),
			Err(e) => fail(&format!("failed to encode report: {}", e)),
		}
	} else {
		output::summary(&name, &report);
	}

	if report.timed_out {
		std::process::exit(2);
	}
}

fn cmd_settings(opts: &Opts) {
	let name = opts
		.positional
		.first()
		.cloned()
		.unwrap_or_else(|| "default".to_string());
	let config = config::load_config(&opts.config_path());
	let settings = PoolSettings::resolve(&name, &config);
	output::settings(&name, &settings);
}
