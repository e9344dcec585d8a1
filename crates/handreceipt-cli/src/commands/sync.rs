use std::sync::Arc;
use std::time::Duration;

use handreceipt_core::network::NetworkMonitor;

use crate::commands::common::{format_report_lines, Context};
use crate::error::CliError;

const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run_sync(ctx: &Context, as_json: bool) -> Result<(), CliError> {
    let (orchestrator, _signal) = ctx.open_orchestrator().await?;
    let report = orchestrator.drain().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_report_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}

/// Keep draining until Ctrl-C.
///
/// Each interval the API host is checked and the reading fed to the network
/// monitor, which debounces it and drains when connectivity settles online.
/// While online, every interval also asks for a pass so backed-off retries
/// are picked up.
pub async fn run_sync_watch(ctx: &Context, interval_secs: u64) -> Result<(), CliError> {
    let (orchestrator, signal) = ctx.open_orchestrator().await?;
    let api = ctx.api()?;
    let monitor = NetworkMonitor::spawn(signal, Arc::new(orchestrator), &ctx.engine().network);
    let mut status = monitor.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    println!("Watching queue; press Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let online = api.is_reachable(REACHABILITY_TIMEOUT).await;
                monitor.report(online);
                if online {
                    monitor.on_foreground();
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let connectivity = *status.borrow_and_update();
                println!("Connectivity: {connectivity:?}");
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    monitor.shutdown();
    println!("Stopped");
    Ok(())
}
