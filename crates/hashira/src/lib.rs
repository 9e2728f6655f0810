//! # hashira
//!
//! Process pool toolkit for Rust CLIs.
//!
//! Queue commands, run them detached in the background under a concurrency
//! limit and a wall-clock time limit, and get a callback as each one finishes
//! plus one when the whole batch is done.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hashira::{Arguments, MapConfig, ProcessPool, TracingSink};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = MapConfig::new()
//!     .set("pools.demo.max_simultaneous_processes", 3)
//!     .set("pools.demo.process_check_delay", 1);
//! let mut pool = ProcessPool::new("demo", &config, Arc::new(TracingSink));
//!
//! for id in ["Doc", "Dopey", "Sneezy"] {
//!     let args = Arguments::none().flag("-h").option("--id", id);
//!     pool.add_job(
//!         "demos/sleeper.sh",
//!         args,
//!         Some(Box::new(move || println!("{} is finished sleeping", id))),
//!     );
//! }
//! pool.set_final_callback(|| println!("all done"));
//! pool.run_all().await;
//! # }
//! ```

pub mod args;
pub mod config;
pub mod log;
pub mod pool;
pub mod process;
pub mod types;

pub use args::{escape_arg, escape_command, Arguments, EscapedArguments};
pub use config::{load_config, ConfigProvider, Layered, MapConfig, NoConfig, PoolSettings, TomlConfig};
pub use log::{LogRecord, LogSink, MemorySink, Source, TracingSink};
pub use pool::ProcessPool;
pub use process::{ExternalProcess, LaunchError};
pub use types::*;
