//! Writer-backed transports: newline-delimited records to any
//! `Write` destination, with an optional metric/trap split.

use std::io::Write;
use std::sync::Mutex;

use tracing::{debug, error};

use crate::error::Result;
use crate::transport::Transport;

/// A boxed writer destination.
pub type BoxWriter = Box<dyn Write + Send>;

/// Writes each record followed by a newline to a single destination.
///
/// A mutex keeps concurrent transport workers from interleaving records,
/// which matters when the destination is stdout.
pub struct WriterTransport {
    writer: Mutex<BoxWriter>,
}

impl WriterTransport {
    pub fn new(writer: BoxWriter) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Convenience constructor writing to stdout.
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl Transport for WriterTransport {
    fn send(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().unwrap();
        write_record(&mut *writer, data)?;
        debug!(bytes = data.len(), "transport: sent record");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.writer.lock().unwrap().flush()?;
        Ok(())
    }
}

/// Every trap JSON object contains this key; poll batches never do.
const TRAP_MARKER: &[u8] = b"\"trap_info\"";

/// Routes each record to one of two destinations: records containing the
/// `"trap_info"` key go to the trap writer, everything else to the metric
/// writer. A byte scan is used instead of JSON parsing to keep the hot
/// path allocation-free.
pub struct SplitWriterTransport {
    metrics: Mutex<BoxWriter>,
    traps: Mutex<BoxWriter>,
}

impl SplitWriterTransport {
    pub fn new(metrics: BoxWriter, traps: BoxWriter) -> Self {
        Self {
            metrics: Mutex::new(metrics),
            traps: Mutex::new(traps),
        }
    }
}

impl Transport for SplitWriterTransport {
    fn send(&self, data: &[u8]) -> Result<()> {
        let writer = if contains(data, TRAP_MARKER) {
            &self.traps
        } else {
            &self.metrics
        };
        let mut writer = writer.lock().unwrap();
        write_record(&mut *writer, data)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let metrics_result = self.metrics.lock().unwrap().flush();
        let traps_result = self.traps.lock().unwrap().flush();
        metrics_result?;
        traps_result?;
        Ok(())
    }
}

fn write_record(writer: &mut dyn Write, data: &[u8]) -> std::io::Result<()> {
    if let Err(e) = writer.write_all(data).and_then(|()| writer.write_all(b"\n")) {
        error!(error = %e, bytes = data.len(), "transport: write failed");
        return Err(e);
    }
    Ok(())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Shared in-memory writer for asserting on output.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writer_appends_newline() {
        let buf = SharedBuf::default();
        let transport = WriterTransport::new(Box::new(buf.clone()));
        transport.send(b"{\"a\":1}").unwrap();
        transport.send(b"{\"b\":2}").unwrap();
        transport.close().unwrap();
        assert_eq!(buf.contents(), "{\"a\":1}\n{\"b\":2}\n");
    }

    #[test]
    fn test_split_routes_by_trap_marker() {
        let metrics = SharedBuf::default();
        let traps = SharedBuf::default();
        let transport =
            SplitWriterTransport::new(Box::new(metrics.clone()), Box::new(traps.clone()));

        transport
            .send(br#"{"metrics":[],"metadata":{}}"#)
            .unwrap();
        transport
            .send(br#"{"trap_info":{"version":"v1"}}"#)
            .unwrap();

        assert!(metrics.contents().contains("metadata"));
        assert!(!metrics.contents().contains("trap_info"));
        assert!(traps.contents().contains("trap_info"));
    }
}
