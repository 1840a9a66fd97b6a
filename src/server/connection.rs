//! Connection handling
//!
//! Drains one accepted connection, feeding every read through a
//! [`RecordScanner`] and handing complete records to the sink.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::{Record, RecordScanner};
use crate::server::config::ListenerConfig;
use crate::stats::ListenerStats;

/// Destination for parsed records
///
/// Called on the listener task, in stream order.
pub trait RecordSink: Send + Sync + 'static {
    fn on_record(&self, record: Record);
}

impl<F> RecordSink for F
where
    F: Fn(Record) + Send + Sync + 'static,
{
    fn on_record(&self, record: Record) {
        self(record)
    }
}

/// A single inbound feed connection
pub struct Connection<R> {
    id: u64,
    reader: R,
    scanner: RecordScanner,
    read_buffer_size: usize,
    stats: Arc<ListenerStats>,
}

impl<R: AsyncRead + Unpin> Connection<R> {
    /// Create a connection over any byte source
    pub fn new(id: u64, reader: R, config: &ListenerConfig, stats: Arc<ListenerStats>) -> Self {
        Self {
            id,
            reader,
            scanner: RecordScanner::with_max_record_len(config.max_record_len),
            read_buffer_size: config.read_buffer_size.max(1),
            stats,
        }
    }

    /// Connection ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Read until the peer closes or a read fails
    ///
    /// A record left incomplete at close is dropped.
    pub async fn run<S: RecordSink>(&mut self, sink: &S) -> std::io::Result<()> {
        let result = self.read_loop(sink).await;

        self.scanner.finish();
        self.stats.record_malformed(self.scanner.malformed());

        tracing::debug!(
            connection_id = self.id,
            records = self.scanner.records(),
            malformed = self.scanner.malformed(),
            "Connection drained"
        );

        result
    }

    async fn read_loop<S: RecordSink>(&mut self, sink: &S) -> std::io::Result<()> {
        let mut buf = BytesMut::zeroed(self.read_buffer_size);

        loop {
            let n = self.reader.read(&mut buf[..]).await?;
            if n == 0 {
                return Ok(());
            }
            self.stats.record_bytes(n);

            let parsed = self.scanner.feed(&buf[..n], |record| {
                tracing::trace!(key = %record.key, value = %record.value, "Record received");
                sink.on_record(record);
            });
            self.stats.record_parsed(parsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio_test::io::Builder;

    use super::*;

    fn collector() -> (Arc<Mutex<Vec<Record>>>, impl RecordSink) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink_records = Arc::clone(&records);
        let sink = move |record: Record| sink_records.lock().unwrap().push(record);
        (records, sink)
    }

    #[tokio::test]
    async fn test_split_record_dispatched_once() {
        let mock = Builder::new()
            .read(b"<price|10>")
            .read(b"<price|10.")
            .read(b"5>")
            .build();
        let stats = Arc::new(ListenerStats::new());
        let (records, sink) = collector();

        let mut conn = Connection::new(1, mock, &ListenerConfig::default(), Arc::clone(&stats));
        conn.run(&sink).await.unwrap();

        assert_eq!(
            *records.lock().unwrap(),
            vec![Record::new("price", "10"), Record::new("price", "10.5")]
        );
        let snap = stats.snapshot();
        assert_eq!(snap.bytes_received, 22);
        assert_eq!(snap.records_parsed, 2);
        assert_eq!(snap.malformed_records, 0);
    }

    #[tokio::test]
    async fn test_small_read_buffer() {
        let mock = Builder::new().read(b"<a|1><b|2>").build();
        let config = ListenerConfig::default().read_buffer_size(3);
        let stats = Arc::new(ListenerStats::new());
        let (records, sink) = collector();

        let mut conn = Connection::new(1, mock, &config, stats);
        conn.run(&sink).await.unwrap();

        assert_eq!(
            *records.lock().unwrap(),
            vec![Record::new("a", "1"), Record::new("b", "2")]
        );
    }

    #[tokio::test]
    async fn test_partial_record_at_close_dropped() {
        let mock = Builder::new().read(b"<a|1><b|").build();
        let stats = Arc::new(ListenerStats::new());
        let (records, sink) = collector();

        let mut conn = Connection::new(7, mock, &ListenerConfig::default(), Arc::clone(&stats));
        conn.run(&sink).await.unwrap();

        assert_eq!(conn.id(), 7);
        assert_eq!(*records.lock().unwrap(), vec![Record::new("a", "1")]);
        assert_eq!(stats.snapshot().malformed_records, 1);
    }

    #[tokio::test]
    async fn test_read_error_returns_after_dispatching() {
        let mock = Builder::new()
            .read(b"<a|1>")
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        let stats = Arc::new(ListenerStats::new());
        let (records, sink) = collector();

        let mut conn = Connection::new(1, mock, &ListenerConfig::default(), stats);
        let result = conn.run(&sink).await;

        assert!(result.is_err());
        assert_eq!(*records.lock().unwrap(), vec![Record::new("a", "1")]);
    }
}
