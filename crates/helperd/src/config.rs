//! Process-lifetime configuration.
//!
//! The helper server is started by a privileged supervisor with a fixed
//! positional argument list; nothing is read from files or the environment
//! besides the service temp dir override.

use std::os::fd::RawFd;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Workers created per pool slot.
pub const WORKERS_PER_POOL_SLOT: u32 = 4;

/// Invocation arguments, in the supervisor's fixed order.
#[derive(Debug, Parser)]
#[command(name = "helperd", about = "Application helper server", version)]
pub struct Config {
    /// Server root directory; the spawn server lives under its bin/.
    pub root_dir: PathBuf,

    /// Interpreter used to run the spawn server.
    pub interpreter: PathBuf,

    /// Inherited read end of the supervisor's admin pipe.
    pub admin_fd: RawFd,

    /// Log verbosity, 0 (errors only) through 4 (trace).
    pub log_level: u8,

    /// Upper bound on concurrently alive application backends.
    pub max_pool_size: u32,

    /// Upper bound on backends per application.
    pub max_instances_per_app: u32,

    /// Seconds an idle backend may linger before eviction.
    pub pool_idle_time: u64,
}

impl Config {
    /// The fixed worker-set cardinality for this configuration.
    #[must_use]
    pub const fn worker_count(&self) -> u32 {
        self.max_pool_size * WORKERS_PER_POOL_SLOT
    }

    /// Pool idle time as a [`Duration`].
    #[must_use]
    pub const fn pool_idle_time(&self) -> Duration {
        Duration::from_secs(self.pool_idle_time)
    }

    /// Path of the spawn server script under the root directory.
    #[must_use]
    pub fn spawn_server_path(&self) -> PathBuf {
        self.root_dir.join("bin").join("helper-spawn-server")
    }

    /// The `tracing` filter directive for the numeric log level.
    #[must_use]
    pub const fn log_filter(&self) -> &'static str {
        match self.log_level {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(args).expect("parse")
    }

    #[test]
    fn positional_arguments_in_supervisor_order() {
        let config = parse(&["helperd", "/opt/hs", "/usr/bin/ruby", "3", "2", "6", "0", "300"]);
        assert_eq!(config.root_dir, PathBuf::from("/opt/hs"));
        assert_eq!(config.interpreter, PathBuf::from("/usr/bin/ruby"));
        assert_eq!(config.admin_fd, 3);
        assert_eq!(config.log_level, 2);
        assert_eq!(config.max_pool_size, 6);
        assert_eq!(config.max_instances_per_app, 0);
        assert_eq!(config.pool_idle_time(), Duration::from_secs(300));
    }

    #[test]
    fn worker_count_is_four_per_pool_slot() {
        let config = parse(&["helperd", "/opt/hs", "/usr/bin/ruby", "3", "0", "6", "0", "300"]);
        assert_eq!(config.worker_count(), 24);
    }

    #[test]
    fn log_levels_map_onto_tracing_filters() {
        let config = parse(&["helperd", "/r", "/i", "3", "0", "1", "0", "0"]);
        assert_eq!(config.log_filter(), "error");
        let config = parse(&["helperd", "/r", "/i", "3", "4", "1", "0", "0"]);
        assert_eq!(config.log_filter(), "trace");
    }

    #[test]
    fn spawn_server_lives_under_bin() {
        let config = parse(&["helperd", "/opt/hs", "/i", "3", "0", "1", "0", "0"]);
        assert_eq!(
            config.spawn_server_path(),
            PathBuf::from("/opt/hs/bin/helper-spawn-server")
        );
    }
}
