use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::core::timestamp::MonoClock;
use crate::core::{CaptureSource, CapturedChunk, Pull};
use crate::producers::wait::StopSignal;

/// Replays an already-encoded file as a live capture, `chunk_bytes` at a
/// time, one chunk per `interval`.
pub struct FileSource {
    name: String,
    path: PathBuf,
    chunk_bytes: usize,
    interval: Duration,
    loop_file: bool,
    clock: MonoClock,
    reader: Option<BufReader<File>>,
    iteration: u64,
}

impl FileSource {
    pub fn new(
        name: &str,
        path: impl Into<PathBuf>,
        chunk_bytes: usize,
        interval: Duration,
        loop_file: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            path: path.into(),
            chunk_bytes,
            interval,
            loop_file,
            clock: MonoClock::process(),
            reader: None,
            iteration: 0,
        }
    }

    fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("file source '{}' was not opened", self.name))?;

        let mut buf = vec![0u8; self.chunk_bytes];
        let mut filled = 0;
        while filled < buf.len() {
            let n = reader
                .read(&mut buf[filled..])
                .with_context(|| format!("read {}", self.path.display()))?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf))
    }
}

impl CaptureSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        let file = File::open(&self.path)
            .with_context(|| format!("open capture file {}", self.path.display()))?;
        self.reader = Some(BufReader::new(file));
        self.iteration = 1;
        log::info!(
            "[file_source] '{}' playing {} (loop: {})",
            self.name,
            self.path.display(),
            self.loop_file
        );
        Ok(())
    }

    fn pull(&mut self, stop: &StopSignal) -> Result<Pull> {
        if stop.wait_timeout(self.interval) {
            return Ok(Pull::Idle);
        }

        if let Some(payload) = self.read_chunk()? {
            return Ok(Pull::Chunk(CapturedChunk::new(self.clock.now_ns(), payload)));
        }

        if !self.loop_file {
            return Ok(Pull::End);
        }

        if let Some(reader) = self.reader.as_mut() {
            reader
                .seek(SeekFrom::Start(0))
                .with_context(|| format!("rewind {}", self.path.display()))?;
        }
        self.iteration += 1;
        log::debug!("[file_source] '{}' loop {}", self.name, self.iteration);

        match self.read_chunk()? {
            Some(payload) => Ok(Pull::Chunk(CapturedChunk::new(self.clock.now_ns(), payload))),
            // An empty file has nothing to loop over.
            None => Ok(Pull::End),
        }
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn collect(source: &mut FileSource, max: usize) -> (Vec<Vec<u8>>, bool) {
        let stop = StopSignal::new();
        let mut chunks = Vec::new();
        for _ in 0..max {
            match source.pull(&stop).unwrap() {
                Pull::Chunk(chunk) => chunks.push(chunk.payload.to_vec()),
                Pull::End => return (chunks, true),
                Pull::Idle => {}
            }
        }
        (chunks, false)
    }

    #[test]
    fn test_file_is_chunked_then_ends() {
        let file = write_temp(b"abcdefghij");
        let mut source = FileSource::new("file", file.path(), 4, Duration::from_millis(1), false);
        source.open().unwrap();

        let (chunks, ended) = collect(&mut source, 10);
        assert!(ended);
        assert_eq!(chunks, vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]);
    }

    #[test]
    fn test_looping_restarts_from_beginning() {
        let file = write_temp(b"xyz");
        let mut source = FileSource::new("file", file.path(), 2, Duration::from_millis(1), true);
        source.open().unwrap();

        let (chunks, ended) = collect(&mut source, 4);
        assert!(!ended);
        assert_eq!(chunks[0], b"xy".to_vec());
        assert_eq!(chunks[1], b"z".to_vec());
        assert_eq!(chunks[2], b"xy".to_vec());
    }

    #[test]
    fn test_missing_file_fails_to_open() {
        let mut source = FileSource::new(
            "file",
            "/nonexistent/capture.webm",
            4,
            Duration::from_millis(1),
            false,
        );
        let err = source.open().unwrap_err();
        assert!(format!("{:#}", err).contains("open capture file"));
    }
}
