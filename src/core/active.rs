// Byte counter gated by a watermark, tracking the sinks of one transfer.
use std::collections::BTreeMap;

use crate::core::buffered::BufferedRw;

#[derive(Debug)]
pub struct ActiveTransfer {
    watermark: u64,
    observed: u64,
    sinks: BTreeMap<String, BufferedRw>,
    closed: bool,
}

impl ActiveTransfer {
    /// A zero watermark never trips.
    pub fn new(watermark: u64) -> Self {
        Self {
            watermark,
            observed: 0,
            sinks: BTreeMap::new(),
            closed: false,
        }
    }

    pub fn with_sink(mut self, name: impl Into<String>, sink: BufferedRw) -> Self {
        self.register_sink(name, sink);
        self
    }

    /// Registers `sink` under `name`, closing any sink it replaces.
    pub fn register_sink(&mut self, name: impl Into<String>, sink: BufferedRw) {
        if self.closed {
            return;
        }
        if let Some(mut previous) = self.sinks.insert(name.into(), sink) {
            previous.close();
        }
    }

    pub fn sink(&self, name: &str) -> Option<&BufferedRw> {
        self.sinks.get(name)
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn observe(&mut self, bytes: u64) {
        if !self.closed {
            self.observed = self.observed.saturating_add(bytes);
        }
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn exceeds_watermark(&self) -> bool {
        self.watermark > 0 && self.observed >= self.watermark
    }

    pub fn reset(&mut self) {
        self.observed = 0;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.observed = 0;
        for (_, mut sink) in std::mem::take(&mut self.sinks) {
            sink.close();
        }
    }
}
