//! Telemetry events and the sinks that receive them.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::Environment;
use crate::error::SinkError;
use crate::record::PendingRecord;

/// Keys of a categorization event, in reporting order
pub const TELEMETRY_KEYS: [&str; 20] = [
    "organic_category",
    "organic_num_domains",
    "organic_num_inconclusive",
    "organic_num_unknown",
    "sponsored_category",
    "sponsored_num_domains",
    "sponsored_num_inconclusive",
    "sponsored_num_unknown",
    "mappings_version",
    "app_version",
    "channel",
    "region",
    "partner_code",
    "provider",
    "tagged",
    "is_shopping_page",
    "num_ads_clicked",
    "num_ads_hidden",
    "num_ads_loaded",
    "num_ads_visible",
];

/// Name of the ping that carries batched categorization events
pub const PING_NAME: &str = "serp-categorization";

/// One reported categorization. Every value is a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorizationEvent {
    values: Vec<(&'static str, String)>,
}

impl CategorizationEvent {
    #[must_use]
    pub fn from_record(record: &PendingRecord, environment: &Environment) -> Self {
        let payload = &record.payload;
        let values = vec![
            payload.organic.category.to_string(),
            payload.organic.num_domains.to_string(),
            payload.organic.num_inconclusive.to_string(),
            payload.organic.num_unknown.to_string(),
            payload.sponsored.category.to_string(),
            payload.sponsored.num_domains.to_string(),
            payload.sponsored.num_inconclusive.to_string(),
            payload.sponsored.num_unknown.to_string(),
            payload.mappings_version.to_string(),
            environment.app_version.clone(),
            environment.channel.clone(),
            environment.region.clone(),
            payload.provider.partner_code.clone(),
            payload.provider.provider.clone(),
            payload.provider.tagged.to_string(),
            payload.is_shopping_page.to_string(),
            payload.ads.clicked.to_string(),
            payload.ads.hidden.to_string(),
            payload.ads.loaded.to_string(),
            payload.ads.visible.to_string(),
        ];

        Self {
            values: TELEMETRY_KEYS.into_iter().zip(values).collect(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl Serialize for CategorizationEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (key, value) in &self.values {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Destination for reported categorizations
pub trait TelemetrySink {
    /// Record one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event could not be written or encoded.
    fn emit(&mut self, event: CategorizationEvent) -> Result<(), SinkError>;

    /// Push out anything buffered.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered events could not be delivered.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for Box<S> {
    fn emit(&mut self, event: CategorizationEvent) -> Result<(), SinkError> {
        (**self).emit(event)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// Keeps events in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<CategorizationEvent>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<CategorizationEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return everything recorded so far
    pub fn take(&self) -> Vec<CategorizationEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl TelemetrySink for MemorySink {
    fn emit(&mut self, event: CategorizationEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

/// Writes each event (or ping) as one JSON object per line
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line<T: Serialize>(&mut self, value: &T) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, value)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write> TelemetrySink for JsonLinesSink<W> {
    fn emit(&mut self, event: CategorizationEvent) -> Result<(), SinkError> {
        self.write_line(&event)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// A batch of events submitted together
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ping {
    pub name: &'static str,
    pub events: Vec<CategorizationEvent>,
}

/// Delivers completed pings
pub trait PingTransport {
    /// Submit one ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the ping could not be delivered.
    fn submit(&mut self, ping: &Ping) -> Result<(), SinkError>;
}

impl<W: Write> PingTransport for JsonLinesSink<W> {
    fn submit(&mut self, ping: &Ping) -> Result<(), SinkError> {
        self.write_line(ping)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Buffers events and submits them as a ping once `threshold` are collected
#[derive(Debug)]
pub struct PingBatcher<T: PingTransport> {
    transport: T,
    threshold: usize,
    buffer: Vec<CategorizationEvent>,
    submitted: usize,
}

impl<T: PingTransport> PingBatcher<T> {
    /// A `threshold` of zero is treated as one.
    pub fn new(transport: T, threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            transport,
            threshold,
            buffer: Vec::with_capacity(threshold),
            submitted: 0,
        }
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Number of pings submitted so far
    #[must_use]
    pub const fn submitted(&self) -> usize {
        self.submitted
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn submit_buffer(&mut self) -> Result<(), SinkError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let ping = Ping {
            name: PING_NAME,
            events: std::mem::take(&mut self.buffer),
        };
        if let Err(e) = self.transport.submit(&ping) {
            // Nothing was delivered; keep the batch for the next attempt.
            self.buffer = ping.events;
            return Err(e);
        }
        self.submitted += 1;
        log::info!(
            "Submitted {PING_NAME} ping with {} event(s)",
            ping.events.len()
        );
        Ok(())
    }
}

impl<T: PingTransport> TelemetrySink for PingBatcher<T> {
    fn emit(&mut self, event: CategorizationEvent) -> Result<(), SinkError> {
        self.buffer.push(event);
        if self.buffer.len() >= self.threshold {
            self.submit_buffer()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.submit_buffer()
    }
}
