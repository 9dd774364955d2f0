use std::time::Duration;

use anyhow::Result;

use crate::core::timestamp::MonoClock;
use crate::core::{CaptureSource, CapturedChunk, Pull};
use crate::producers::wait::StopSignal;

/// Synthetic capture source: one chunk per `interval`, each filled with a
/// byte pattern derived from its index so saved output is easy to verify.
pub struct PatternSource {
    name: String,
    interval: Duration,
    chunk_bytes: usize,
    clock: MonoClock,
    emitted: u64,
}

impl PatternSource {
    pub fn new(name: &str, interval: Duration, chunk_bytes: usize) -> Self {
        Self {
            name: name.to_string(),
            interval,
            chunk_bytes,
            clock: MonoClock::process(),
            emitted: 0,
        }
    }

    fn next_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.chunk_bytes);
        let index = self.emitted.to_be_bytes();
        for i in 0..self.chunk_bytes {
            payload.push(index[i % index.len()] ^ (i as u8));
        }
        payload
    }
}

impl CaptureSource for PatternSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        self.emitted = 0;
        log::info!(
            "[pattern] '{}' emitting {} bytes every {:?}",
            self.name,
            self.chunk_bytes,
            self.interval
        );
        Ok(())
    }

    fn pull(&mut self, stop: &StopSignal) -> Result<Pull> {
        if stop.wait_timeout(self.interval) {
            return Ok(Pull::Idle);
        }

        let chunk = CapturedChunk::new(self.clock.now_ns(), self.next_payload());
        self.emitted += 1;
        Ok(Pull::Chunk(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_chunks_are_paced_and_ordered() {
        let mut source = PatternSource::new("pattern", Duration::from_millis(5), 16);
        let stop = StopSignal::new();
        source.open().unwrap();

        let mut last_ns = 0;
        for _ in 0..3 {
            match source.pull(&stop).unwrap() {
                Pull::Chunk(chunk) => {
                    assert_eq!(chunk.payload.len(), 16);
                    assert!(chunk.captured_ns >= last_ns);
                    last_ns = chunk.captured_ns;
                }
                other => panic!("expected chunk, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_pull_after_stop_is_idle() {
        let mut source = PatternSource::new("pattern", Duration::from_secs(60), 4);
        let stop = StopSignal::new();
        stop.request_stop();
        assert!(matches!(source.pull(&stop).unwrap(), Pull::Idle));
    }
}
