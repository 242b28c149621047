use super::{AttrKind, Emitter, MetricBatch};
use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use std::io::Write;

/// Writes each batch as a single JSON line.
///
/// ```json
/// {"event_type":"MysqlWaitEventsSample","entity":{"name":"db:3306","remote":true},
///  "timestamp":"...","samples":[{"gauges":{...},"attributes":{...}}]}
/// ```
pub struct JsonLinesEmitter<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesEmitter<W> {
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn sample_json(attributes: &[super::Attribute]) -> Result<Value> {
    let mut gauges = Map::new();
    let mut attrs = Map::new();
    for attribute in attributes {
        let value = serde_json::to_value(&attribute.value)?;
        match attribute.kind {
            AttrKind::Gauge => gauges.insert(attribute.name.to_string(), value),
            AttrKind::Attribute => attrs.insert(attribute.name.to_string(), value),
        };
    }
    Ok(json!({ "gauges": gauges, "attributes": attrs }))
}

impl<W: Write + Send> Emitter for JsonLinesEmitter<W> {
    fn publish(&mut self, batch: &MetricBatch<'_>) -> Result<()> {
        let samples = batch
            .samples
            .iter()
            .map(|s| sample_json(s))
            .collect::<Result<Vec<_>>>()?;

        let line = json!({
            "event_type": batch.event_type,
            "entity": batch.entity,
            "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "samples": samples,
        });

        serde_json::to_writer(&mut self.writer, &line).context("failed to serialize batch")?;
        self.writer
            .write_all(b"\n")
            .context("failed to write batch")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("failed to flush emitter output")
    }
}
