/// Drive the scheduler from stdin with the system clock
use anyhow::{Context, Result};
use std::{future::Future, io, sync::Arc};
use serpwake_core::{
    ChannelIdleService, Config, JsonLinesSink, PingBatcher, TelemetrySink, WakeReportingScheduler,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use super::script::{apply_event, parse_line};

pub async fn run_live(config: Config, batch: bool) -> Result<()> {
    let sink = build_sink(
        io::stdout(),
        batch,
        config.telemetry.ping_submission_threshold,
    );

    let idle = ChannelIdleService::new();
    let mut scheduler = WakeReportingScheduler::new(
        config.scheduler.clone(),
        config.environment.clone(),
        Arc::new(idle.clone()),
        sink,
    );
    scheduler.init()?;
    log::info!(
        "Reading events from stdin (wake timeout {}ms)",
        scheduler.wake_timeout_ms()
    );

    let result = drive(
        &mut scheduler,
        &idle,
        BufReader::new(tokio::io::stdin()),
        tokio::signal::ctrl_c(),
    )
    .await;
    idle.close();
    result
}

/// Events are written one per line, or batched into pings when `batch` is set
fn build_sink<W: io::Write + 'static>(
    writer: W,
    batch: bool,
    threshold: usize,
) -> Box<dyn TelemetrySink> {
    if batch {
        Box::new(PingBatcher::new(JsonLinesSink::new(writer), threshold))
    } else {
        Box::new(JsonLinesSink::new(writer))
    }
}

/// Apply events from `reader` until end of input, a read error, or `shutdown`
/// completes. Pending records are always flushed before returning.
async fn drive<R, S, F>(
    scheduler: &mut WakeReportingScheduler<S>,
    idle: &ChannelIdleService,
    reader: R,
    shutdown: F,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    S: TelemetrySink,
    F: Future,
{
    tokio::pin!(shutdown);
    let mut lines = reader.lines();
    let mut read_error = None;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => handle_line(scheduler, idle, &line),
                    Ok(None) => {
                        log::info!("End of input, shutting down...");
                        break;
                    }
                    Err(e) => {
                        log::error!("Failed to read events: {e}");
                        read_error = Some(e);
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                log::info!("Received Ctrl-C, shutting down...");
                break;
            }
        }
    }

    let flushed = scheduler.flush_all();
    scheduler.uninit();
    log::info!("Flushed {flushed} pending record(s) on shutdown");

    match read_error {
        Some(e) => Err(e).context("failed to read events"),
        None => Ok(()),
    }
}

fn handle_line<S: TelemetrySink>(
    scheduler: &mut WakeReportingScheduler<S>,
    idle: &ChannelIdleService,
    line: &str,
) {
    let parsed = match parse_line(line) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => return,
        Err(e) => {
            log::warn!("Ignoring unparseable event: {e}");
            return;
        }
    };

    match apply_event(scheduler, idle, parsed.event) {
        Ok(0) => {}
        Ok(reported) => log::debug!("{reported} record(s) reported"),
        Err(e) => log::warn!("Event rejected: {e}"),
    }
}
