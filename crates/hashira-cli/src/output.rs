use hashira::{PoolSettings, RunReport};
use owo_colors::OwoColorize;

pub fn job_finished(label: &str) {
	println!("  {} {} is finished", "✓".green(), label);
}

pub fn all_done(pool: &str) {
	println!("{} {}: all jobs complete", "●".green(), pool.bold());
}

pub fn summary(pool: &str, report: &RunReport) {
	let status = if report.timed_out {
		"timed out".yellow().to_string()
	} else {
		"done".green().to_string()
	};
	eprintln!(
		"{}: {} in {:.1}s, {} launched / {} total, peak {} at once",
		pool.bold(),
		status,
		report.elapsed_secs,
		report.launched,
		report.total,
		report.peak_in_flight,
	);
	if report.failed > 0 {
		eprintln!("  {} {} failed to launch", "✗".red(), report.failed);
	}
	if report.abandoned > 0 {
		eprintln!("  {} {} never started", "-".dimmed(), report.abandoned);
	}
	if report.untracked > 0 {
		eprintln!("  {} {} still running, no longer tracked", "!".yellow(), report.untracked);
	}
}

pub fn settings(pool: &str, settings: &PoolSettings) {
	println!("{}", pool.cyan().bold());
	println!("  {:<28}{}", "max_simultaneous_processes", settings.max_simultaneous_processes);
	println!("  {:<28}{}s", "time_limit", settings.time_limit.as_secs_f64());
	println!("  {:<28}{}s", "process_check_delay", settings.process_check_delay.as_secs_f64());
	match settings.interpreter {
		Some(ref interpreter) => println!("  {:<28}{}", "interpreter", interpreter),
		None => println!("  {:<28}{}", "interpreter", "(not set)".red()),
	}
}
