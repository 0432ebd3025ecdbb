use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tracing::info;
use vmsctl_common::{Parameters, PollerOptions, PoolOptions, WorkItem};
use vmsctl_orchestrator::{AggregateReport, Orchestrator, RemoteRequest};
use vmsctl_poller::RemoteTaskPoller;

use crate::args::{ScanArgs, StatsArgs};
use crate::output::print_report;
use crate::sim::{RecorderStatsTask, SimulatedServer};

pub async fn run_stats(args: StatsArgs) -> Result<()> {
    let report = collect_stats(&args).await?;
    print_report(&report, &args.output_format)
}

pub async fn run_scan(args: ScanArgs) -> Result<()> {
    let report = scan_hardware(&args).await?;
    print_report(&report, &args.output_format)
}

async fn collect_stats(args: &StatsArgs) -> Result<AggregateReport> {
    let options = pool_options(args)?;
    info!("Collecting statistics from {} recorder(s)", args.recorders);
    info!("Concurrency: {}", options.capacity);

    let task = Arc::new(RecorderStatsTask::new(
        Duration::from_millis(args.delay_ms),
        args.fail_every,
    ));
    let items = (0..args.recorders)
        .map(|i| {
            WorkItem::new(
                format!("rec-{}", i + 1),
                task.clone(),
                Parameters::new().with("index", i as u64),
            )
        })
        .collect();

    let orchestrator = Orchestrator::new(options).context("Invalid pool configuration")?;
    let report = orchestrator
        .fan_out(items)
        .await
        .context("Statistics collection failed")?;
    Ok(report)
}

async fn scan_hardware(args: &ScanArgs) -> Result<AggregateReport> {
    let options = poller_options(args);
    info!("Scanning {} hardware device(s)", args.hardware);
    info!("Poll interval: {:?}", options.interval);

    let server = SimulatedServer::new(args.max_polls, args.fail_every, args.transient_failures);
    let poller = RemoteTaskPoller::new(Arc::new(server.clone()), options)
        .context("Invalid polling configuration")?;

    let requests = (0..args.hardware)
        .map(|i| RemoteRequest::new(format!("hw-{}", i + 1), Parameters::new()))
        .collect();

    let orchestrator = Orchestrator::new(PoolOptions::default())?;
    let report = orchestrator.fan_out_remote(&server, &poller, requests).await;
    info!("Opened {} server connection(s)", server.connects());
    Ok(report)
}

fn pool_options(args: &StatsArgs) -> Result<PoolOptions> {
    let options = match args.concurrency {
        Some(capacity) => PoolOptions::default().with_capacity(capacity),
        None => PoolOptions::from_env().context("Failed to read pool configuration")?,
    };
    Ok(options.with_poll_interval(Duration::from_millis(args.poll_interval_ms.max(1))))
}

fn poller_options(args: &ScanArgs) -> PollerOptions {
    let base = match args.preset.as_str() {
        "patient" => PollerOptions::patient(),
        "default" => PollerOptions::default(),
        _ => PollerOptions::fast(),
    };
    let base = match args.interval_ms {
        Some(ms) => base.with_interval(Duration::from_millis(ms.max(1))),
        None => base,
    };
    base.with_cleanup(args.cleanup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmsctl_orchestrator::TargetStatus;

    fn stats_args() -> StatsArgs {
        StatsArgs {
            recorders: 6,
            concurrency: Some(2),
            delay_ms: 5,
            fail_every: 3,
            poll_interval_ms: 5,
            output_format: "json".into(),
        }
    }

    fn scan_args() -> ScanArgs {
        ScanArgs {
            hardware: 4,
            max_polls: 3,
            fail_every: 2,
            transient_failures: 2,
            cleanup: true,
            preset: "fast".into(),
            interval_ms: Some(5),
            output_format: "csv".into(),
        }
    }

    #[tokio::test]
    async fn stats_report_covers_every_recorder() {
        let report = collect_stats(&stats_args()).await.unwrap();
        assert_eq!(report.len(), 6);
        // index 2 and 5 fail
        assert_eq!(report.get("rec-3").unwrap().status, TargetStatus::Failed);
        assert_eq!(report.get("rec-6").unwrap().status, TargetStatus::Failed);
        assert_ne!(report.get("rec-1").unwrap().status, TargetStatus::Failed);
    }

    #[tokio::test]
    async fn scan_report_survives_transient_failures() {
        let report = scan_hardware(&scan_args()).await.unwrap();
        assert_eq!(report.len(), 4);
        // ids 2 and 4 end in the Error state
        assert_eq!(report.get("hw-2").unwrap().status, TargetStatus::Failed);
        assert_eq!(report.get("hw-4").unwrap().status, TargetStatus::Failed);
        assert_eq!(report.get("hw-1").unwrap().status, TargetStatus::Passed);
    }

    #[tokio::test]
    async fn commands_print_reports() {
        run_stats(stats_args()).await.unwrap();
        run_scan(scan_args()).await.unwrap();
    }

    #[test]
    fn scan_presets() {
        let mut args = scan_args();
        args.interval_ms = None;
        args.preset = "patient".into();
        assert_eq!(poller_options(&args).interval, Duration::from_secs(2));
        assert!(poller_options(&args).cleanup);

        args.preset = "fast".into();
        args.interval_ms = Some(20);
        assert_eq!(poller_options(&args).interval, Duration::from_millis(20));
    }

    #[test]
    fn explicit_concurrency_wins() {
        let options = pool_options(&stats_args()).unwrap();
        assert_eq!(options.capacity, 2);
        assert_eq!(options.poll_interval, Duration::from_millis(5));
    }
}
