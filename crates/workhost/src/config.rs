//! Construction options for a [`Dispatcher`](crate::pool::Dispatcher), and
//! the command line layer of the `workhost` binary.

use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use workhost_core::types::{LogLevel, Manifest};

/// Default time `shutdown` waits for in-flight jobs before closing workers.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Capacity of the protocol fault broadcast. Slow subscribers miss the oldest
/// faults first.
pub const DEFAULT_FAULT_BUFFER_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Verbosity pushed to every worker in its handshake.
    pub log_level: LogLevel,

    /// How long `shutdown` waits for in-flight jobs to settle.
    pub shutdown_timeout: Duration,

    /// Methods the workers understand. When set, `submit` rejects other
    /// methods without dispatching them.
    pub manifest: Option<Manifest>,

    /// Capacity of the [`faults`](crate::pool::Dispatcher::faults) broadcast.
    pub fault_buffer_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            manifest: None,
            fault_buffer_size: DEFAULT_FAULT_BUFFER_SIZE,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = Some(manifest);
        self
    }
}

/// Runtime configuration for the `workhost` binary.
///
/// Every value can be given on the command line or through the environment,
/// including a `.env` file in the working directory.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "workhost",
    version,
    about = "Runs a batch of demo jobs on a pool of in-process workers"
)]
pub struct CliArgs {
    /// Number of workers in the pool.
    ///
    /// Defaults to one less than the available parallelism so the dispatcher
    /// keeps a core to itself, but never fewer than one.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = default_num_workers())]
    pub num_workers: usize,

    /// Verbosity sent to every worker in its handshake. Also the console
    /// filter when `RUST_LOG` is unset.
    ///
    /// Environment variable: `LOG_LEVEL`
    #[arg(long, env = "LOG_LEVEL", default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Seconds to wait for in-flight jobs on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = DEFAULT_SHUTDOWN_TIMEOUT.as_secs())]
    pub shutdown_timeout: u64,

    /// Number of pi estimation jobs to submit.
    ///
    /// Environment variable: `JOBS`
    #[arg(long, env = "JOBS", default_value_t = 16)]
    pub jobs: usize,

    /// Terms of the series summed by each pi job.
    ///
    /// Environment variable: `PI_TERMS`
    #[arg(long, env = "PI_TERMS", default_value_t = 10_000_000)]
    pub pi_terms: u64,
}

fn default_num_workers() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// Validated form of [`CliArgs`].
#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub num_workers: usize,
    pub jobs: usize,
    pub pi_terms: u64,
    pub pool: PoolConfig,
}

impl TryFrom<CliArgs> for DemoConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.pi_terms == 0 {
            bail!("PI_TERMS must be greater than 0");
        }

        Ok(Self {
            num_workers: args.num_workers,
            jobs: args.jobs,
            pi_terms: args.pi_terms,
            pool: PoolConfig::default()
                .with_log_level(args.log_level)
                .with_shutdown_timeout(Duration::from_secs(args.shutdown_timeout)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(core::iter::once("workhost").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_leave_at_least_one_worker() {
        assert!(default_num_workers() >= 1);
        assert_eq!(PoolConfig::default().log_level, LogLevel::Error);
        assert!(PoolConfig::default().manifest.is_none());
    }

    #[test]
    fn cli_values_reach_the_pool_config() {
        let args = parse(&[
            "--num-workers",
            "3",
            "--log-level",
            "debug",
            "--shutdown-timeout",
            "7",
            "--jobs",
            "5",
        ]);
        let config = DemoConfig::try_from(args).unwrap();
        assert_eq!(config.num_workers, 3);
        assert_eq!(config.jobs, 5);
        assert_eq!(config.pool.log_level, LogLevel::Debug);
        assert_eq!(config.pool.shutdown_timeout, Duration::from_secs(7));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = DemoConfig::try_from(parse(&["--num-workers", "0"])).unwrap_err();
        assert!(err.to_string().contains("NUM_WORKERS"));
    }

    #[test]
    fn unknown_log_level_fails_to_parse() {
        let res = CliArgs::try_parse_from(["workhost", "--log-level", "loud"]);
        assert!(res.is_err());
    }
}
