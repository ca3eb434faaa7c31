/// Event script format shared by `replay` and `live`
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serpwake_core::{
    CategorizationPayload, ChannelIdleService, IdleSignal, PageId, TelemetrySink,
    WakeReportingScheduler,
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptEvent {
    Categorize {
        page: PageId,
        payload: CategorizationPayload,
    },
    Signal {
        signal: IdleSignal,
    },
    Teardown {
        page: PageId,
    },
    Reconfigure {
        wake_timeout_ms: u64,
    },
    Init,
    Uninit,
}

/// One script line: an event and when it happens, relative to the script start
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScriptLine {
    #[serde(default)]
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: ScriptEvent,
}

/// Parse one line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ScriptLine>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let parsed = serde_json::from_str(trimmed)?;
    Ok(Some(parsed))
}

/// Parse a whole script, requiring `at_ms` to never go backwards
pub fn parse_script(text: &str) -> Result<Vec<ScriptLine>> {
    let mut lines = Vec::new();
    let mut last_at = 0;

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let Some(parsed) = parse_line(line).with_context(|| format!("line {line_no}"))? else {
            continue;
        };
        if parsed.at_ms < last_at {
            bail!(
                "line {line_no}: at_ms {} is earlier than previous event at {last_at}",
                parsed.at_ms
            );
        }
        last_at = parsed.at_ms;
        lines.push(parsed);
    }
    Ok(lines)
}

/// Apply one event. Returns the number of records reported because of it.
pub fn apply_event<S: TelemetrySink>(
    scheduler: &mut WakeReportingScheduler<S>,
    idle: &ChannelIdleService,
    event: ScriptEvent,
) -> Result<usize> {
    let before = scheduler.reported_count();
    match event {
        ScriptEvent::Categorize { page, payload } => {
            scheduler.record_categorization(page, payload)?;
        }
        ScriptEvent::Signal { signal } => {
            idle.fire(signal);
            scheduler.process_signals();
        }
        ScriptEvent::Teardown { page } => {
            scheduler.notify_teardown(page);
        }
        ScriptEvent::Reconfigure { wake_timeout_ms } => scheduler.reconfigure(wake_timeout_ms),
        ScriptEvent::Init => scheduler.init()?,
        ScriptEvent::Uninit => scheduler.uninit(),
    }
    let reported = scheduler.reported_count() - before;
    Ok(usize::try_from(reported)?)
}
