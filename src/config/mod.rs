//! Turns parsed CLI arguments into a validated run configuration.

mod duration;

pub use duration::parse_duration;

use crate::cli::{CommonArgs, MixedArgs, TransferArgs};
use loadtest_engine::{
    ConfigError, IsolationLevel, Mix, MixedConfig, RetryPolicy, RunConfig, TransferConfig,
    WorkloadConfig,
};

/// Extra connections beyond `concurrency` for setup and the final read.
pub const POOL_HEADROOM: usize = 2;

fn run_config(common: &CommonArgs, workload: WorkloadConfig) -> Result<RunConfig, ConfigError> {
    let isolation: IsolationLevel = common.isolation.parse()?;
    let retry = RetryPolicy {
        max_attempts: common.max_retries,
        ..Default::default()
    };

    let config = RunConfig::new(workload)
        .with_qps(common.qps)
        .with_concurrency(common.concurrency)
        .with_duration(common.duration)
        .with_isolation(isolation)
        .with_retry(retry)
        .with_drain_timeout(common.drain_timeout)
        .with_status_interval(common.status_interval)
        .with_seed(common.seed);

    config.validate()?;
    Ok(config)
}

pub fn transfer_config(args: &TransferArgs) -> Result<RunConfig, ConfigError> {
    let workload = WorkloadConfig::Transfer(TransferConfig {
        accounts: args.accounts,
        selection: args.selection,
        initial_balance: args.initial_balance,
        amount: args.amount,
    });
    run_config(&args.common, workload)
}

pub fn mixed_config(args: &MixedArgs) -> Result<RunConfig, ConfigError> {
    let mix = match (args.read_qps, args.write_qps) {
        (Some(read_qps), Some(write_qps)) => Mix::Explicit {
            read_qps,
            write_qps,
        },
        _ => Mix::WritePercent(args.write_percent),
    };
    let workload = WorkloadConfig::Mixed(MixedConfig {
        products: args.products,
        selection: args.selection,
        mix,
    });
    run_config(&args.common, workload)
}

/// Connection pool size for a run.
pub fn pool_size(config: &RunConfig) -> usize {
    config.concurrency + POOL_HEADROOM
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Backend, OutputFormat};
    use rust_decimal::Decimal;
    use std::time::Duration;

    fn common() -> CommonArgs {
        CommonArgs {
            url: None,
            backend: Backend::Memory,
            qps: 100,
            concurrency: 8,
            duration: Duration::from_secs(10),
            isolation: "serializable".to_string(),
            max_retries: 50,
            drain_timeout: Duration::from_secs(5),
            status_interval: Duration::from_secs(1),
            seed: None,
            format: OutputFormat::Text,
            batch_size: 500,
        }
    }

    fn transfer(common: CommonArgs) -> TransferArgs {
        TransferArgs {
            accounts: 100,
            selection: 10,
            initial_balance: Decimal::from(10_000),
            amount: Decimal::from(5),
            keep_data: false,
            fail_on_violation: false,
            common,
        }
    }

    #[test]
    fn test_transfer_args_map_to_config() {
        let config = transfer_config(&transfer(common())).unwrap();

        assert_eq!(config.isolation, IsolationLevel::Serializable);
        assert_eq!(config.retry.max_attempts, 50);
        assert_eq!(pool_size(&config), 10);
    }

    #[test]
    fn test_isolation_error_surfaces() {
        let mut args = common();
        args.isolation = "snapshot".to_string();

        let err = transfer_config(&transfer(args)).unwrap_err();
        assert_eq!(err, ConfigError::InvalidIsolation("snapshot".to_string()));
    }

    #[test]
    fn test_explicit_rates_override_percent() {
        let args = MixedArgs {
            products: 100,
            selection: None,
            write_percent: 20,
            read_qps: Some(30),
            write_qps: Some(70),
            common: common(),
        };

        let config = mixed_config(&args).unwrap();
        assert_eq!(
            config.workload,
            WorkloadConfig::Mixed(MixedConfig {
                products: 100,
                selection: None,
                mix: Mix::Explicit {
                    read_qps: 30,
                    write_qps: 70
                },
            })
        );
    }
}
