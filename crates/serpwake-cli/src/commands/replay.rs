/// Deterministic replay of an event script against a manual clock
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::{fs, path::Path, sync::Arc};
use tabled::{Table, Tabled};
use serpwake_core::{
    CategorizationEvent, ChannelIdleService, Config, ManualClock, MemorySink,
    WakeReportingScheduler,
};

use super::script::{apply_event, parse_script, ScriptLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Organic")]
    organic: String,
    #[tabled(rename = "Sponsored")]
    sponsored: String,
    #[tabled(rename = "Ads (loaded/visible/clicked)")]
    ads: String,
    #[tabled(rename = "Tagged")]
    tagged: String,
}

impl EventRow {
    fn from_event(event: &CategorizationEvent) -> Self {
        let value = |key: &str| event.get(key).unwrap_or("-").to_string();
        Self {
            provider: value("provider"),
            organic: format!(
                "{} ({} domains)",
                value("organic_category"),
                value("organic_num_domains")
            ),
            sponsored: format!(
                "{} ({} domains)",
                value("sponsored_category"),
                value("sponsored_num_domains")
            ),
            ads: format!(
                "{}/{}/{}",
                value("num_ads_loaded"),
                value("num_ads_visible"),
                value("num_ads_clicked")
            ),
            tagged: value("tagged"),
        }
    }
}

/// Run a script and return every event it produced, including the final flush
pub fn replay_script(text: &str, config: &Config) -> Result<Vec<CategorizationEvent>> {
    let lines = parse_script(text)?;

    let start = Utc::now();
    let clock = ManualClock::new(start);
    let idle = ChannelIdleService::new();
    let sink = MemorySink::new();
    let mut scheduler = WakeReportingScheduler::new(
        config.scheduler.clone(),
        config.environment.clone(),
        Arc::new(idle.clone()),
        sink.clone(),
    )
    .with_clock(Arc::new(clock.clone()));
    scheduler.init()?;

    let outcome = apply_lines(&mut scheduler, &clock, &idle, start, lines);

    let flushed = scheduler.flush_all();
    if flushed > 0 {
        log::info!("Flushed {flushed} record(s) still pending at end of script");
    }
    scheduler.uninit();
    outcome?;

    Ok(sink.take())
}

fn apply_lines(
    scheduler: &mut WakeReportingScheduler<MemorySink>,
    clock: &ManualClock,
    idle: &ChannelIdleService,
    start: DateTime<Utc>,
    lines: Vec<ScriptLine>,
) -> Result<()> {
    for (index, line) in lines.into_iter().enumerate() {
        let at = i64::try_from(line.at_ms)
            .ok()
            .and_then(Duration::try_milliseconds)
            .and_then(|offset| start.checked_add_signed(offset))
            .with_context(|| format!("event {}: at_ms {} out of range", index + 1, line.at_ms))?;
        clock.set(at);
        let reported = apply_event(scheduler, idle, line.event)
            .with_context(|| format!("event {} at {}ms", index + 1, line.at_ms))?;
        if reported > 0 {
            log::debug!("{reported} record(s) reported at {}ms", line.at_ms);
        }
    }
    Ok(())
}

pub fn handle_replay(
    script: &Path,
    mut config: Config,
    wake_timeout_ms: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    if let Some(timeout) = wake_timeout_ms {
        config.scheduler.wake_timeout_ms = timeout;
    }
    let text = fs::read_to_string(script)
        .with_context(|| format!("failed to read script {}", script.display()))?;

    let events = replay_script(&text, &config)?;

    match format {
        OutputFormat::Json => {
            for event in &events {
                println!("{}", serde_json::to_string(event)?);
            }
        }
        OutputFormat::Table => {
            if events.is_empty() {
                println!("No categorizations reported");
                return Ok(());
            }
            let rows: Vec<EventRow> = events.iter().map(EventRow::from_event).collect();
            println!("{}", Table::new(rows));
            println!("{} categorization(s) reported", events.len());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATEGORIZE: &str = r#"{"at_ms": 0, "event": "categorize", "page": 1, "payload": {"organic": {"category": 3, "num_domains": 1, "num_inconclusive": 0, "num_unknown": 0}, "sponsored": {"category": 4, "num_domains": 2, "num_inconclusive": 0, "num_unknown": 0}, "mappings_version": 1, "provider": {"provider": "example", "partner_code": "ff", "tagged": true}, "ads": {"loaded": 2, "visible": 2}}}"#;

    fn config_with_timeout(wake_timeout_ms: u64) -> Config {
        let mut config = Config::default();
        config.scheduler.wake_timeout_ms = wake_timeout_ms;
        config
    }

    #[test]
    fn test_replay_wake_after_timeout() {
        let script = format!(
            "{CATEGORIZE}\n\
             {{\"at_ms\": 200, \"event\": \"signal\", \"signal\": \"wake_notification\"}}\n\
             {{\"at_ms\": 210, \"event\": \"signal\", \"signal\": \"idle\"}}\n\
             {{\"at_ms\": 220, \"event\": \"signal\", \"signal\": \"active\"}}\n\
             {{\"at_ms\": 230, \"event\": \"signal\", \"signal\": \"wake_notification\"}}\n\
             {{\"at_ms\": 240, \"event\": \"teardown\", \"page\": 1}}\n"
        );
        let events = replay_script(&script, &config_with_timeout(100)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get("provider"), Some("example"));
        assert_eq!(events[0].get("sponsored_category"), Some("4"));
    }

    #[test]
    fn test_replay_wake_too_early_then_teardown() {
        let script = format!(
            "{CATEGORIZE}\n\
             {{\"at_ms\": 200, \"event\": \"signal\", \"signal\": \"wake_notification\"}}\n\
             {{\"at_ms\": 210, \"event\": \"teardown\", \"page\": 1}}\n"
        );
        let events = replay_script(&script, &config_with_timeout(500_000)).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_replay_flushes_pending_at_end() {
        let events = replay_script(CATEGORIZE, &config_with_timeout(500_000)).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_replay_fails_on_malformed_payload() {
        let bad = CATEGORIZE.replace("\"mappings_version\": 1", "\"mappings_version\": 0");
        let err = replay_script(&bad, &Config::default()).unwrap_err();
        assert!(format!("{err:#}").contains("mappings version"));
    }

    #[test]
    fn test_replay_rejects_out_of_range_time() {
        let script = format!(
            "{CATEGORIZE}\n\
             {{\"at_ms\": 9000000000000000000, \"event\": \"signal\", \"signal\": \"wake_notification\"}}\n"
        );
        let err = replay_script(&script, &Config::default()).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_event_row_summary() {
        let events = replay_script(CATEGORIZE, &Config::default()).unwrap();
        let row = EventRow::from_event(&events[0]);
        assert_eq!(row.provider, "example");
        assert_eq!(row.organic, "3 (1 domains)");
        assert_eq!(row.ads, "2/2/0");
    }
}
