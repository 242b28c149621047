//! Hand-off of collected records to the telemetry pipeline.
//!
//! Records map themselves to an ordered attribute list ([`MetricRecord`]); publishing chunks each
//! stream into batches of at most [`MAX_BATCH_SIZE`] samples and passes them to an [`Emitter`].

mod json;
mod records;

pub use json::JsonLinesEmitter;

use anyhow::Result;
use serde::Serialize;
use std::fmt;

/// Upper bound on samples per published batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// How the receiving side should treat an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrKind {
    Gauge,
    Attribute,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for AttrValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(Self::Float(v as f64), Self::Int)
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u16> for AttrValue {
    fn from(v: u16) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Attribute {
    pub name: &'static str,
    pub value: AttrValue,
    pub kind: AttrKind,
}

impl Attribute {
    pub fn gauge(name: &'static str, value: impl Into<AttrValue>) -> Self {
        Self {
            name,
            value: value.into(),
            kind: AttrKind::Gauge,
        }
    }

    pub fn attribute(name: &'static str, value: impl Into<AttrValue>) -> Self {
        Self {
            name,
            value: value.into(),
            kind: AttrKind::Attribute,
        }
    }
}

/// A record that can be published as one sample.
pub trait MetricRecord {
    const EVENT_TYPE: &'static str;

    /// Attributes in emission order. Absent optional fields are left out, not defaulted.
    fn attributes(&self) -> Vec<Attribute>;
}

/// The monitored server as seen by the telemetry backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Entity {
    pub name: String,
    pub remote: bool,
    #[serde(skip)]
    pub hostname: String,
    #[serde(skip)]
    pub port: u16,
}

impl Entity {
    /// Remote entities are keyed by `host:port`; local ones by this machine's hostname.
    #[must_use]
    pub fn new(hostname: &str, port: u16, remote: bool) -> Self {
        let name = if remote {
            format!("{hostname}:{port}")
        } else {
            sysinfo::System::host_name().unwrap_or_else(|| hostname.to_string())
        };

        Self {
            name,
            remote,
            hostname: hostname.to_string(),
            port,
        }
    }

    fn attributes(&self) -> [Attribute; 2] {
        [
            Attribute::attribute("hostname", self.hostname.as_str()),
            Attribute::attribute("port", self.port),
        ]
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Samples of one event type, at most [`MAX_BATCH_SIZE`] of them.
#[derive(Debug)]
pub struct MetricBatch<'a> {
    pub event_type: &'static str,
    pub entity: &'a Entity,
    pub samples: Vec<Vec<Attribute>>,
}

pub trait Emitter: Send {
    /// Deliver one batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be delivered.
    fn publish(&mut self, batch: &MetricBatch<'_>) -> Result<()>;

    /// Flush anything buffered. Called once at the end of every cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered output cannot be written.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Publish a record stream in bounded batches, returning the number of samples published.
///
/// An empty stream publishes nothing.
///
/// # Errors
///
/// Stops at the first batch the emitter rejects.
pub fn publish_records<R, E>(emitter: &mut E, entity: &Entity, records: &[R]) -> Result<usize>
where
    R: MetricRecord,
    E: Emitter + ?Sized,
{
    for chunk in records.chunks(MAX_BATCH_SIZE) {
        let samples = chunk
            .iter()
            .map(|record| {
                let mut attributes = record.attributes();
                attributes.extend(entity.attributes());
                attributes
            })
            .collect();

        emitter.publish(&MetricBatch {
            event_type: R::EVENT_TYPE,
            entity,
            samples,
        })?;
    }

    Ok(records.len())
}

/// Keeps batches in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryEmitter {
    pub batches: Vec<(&'static str, Vec<Vec<Attribute>>)>,
}

impl MemoryEmitter {
    #[must_use]
    pub fn samples(&self, event_type: &str) -> Vec<&Vec<Attribute>> {
        self.batches
            .iter()
            .filter(|(t, _)| *t == event_type)
            .flat_map(|(_, samples)| samples.iter())
            .collect()
    }
}

impl Emitter for MemoryEmitter {
    fn publish(&mut self, batch: &MetricBatch<'_>) -> Result<()> {
        self.batches.push((batch.event_type, batch.samples.clone()));
        Ok(())
    }
}
