//! Event source tailing a JSONL log of decoded chain records
//!
//! An external decoder appends one record per line:
//!
//! ```text
//! {"type":"header","number":1200}
//! {"type":"oracle_request","oracle":"0x..","request_id":"0x..","requester":"0x..","spec_id":"0x..","payment":"0x..","block_number":1199}
//! {"type":"chainlink_fulfilled","aggregator":"0x..","request_id":"0x..","block_number":1201}
//! {"type":"native_balance","account":"0x..","amount":"0x.."}
//! {"type":"withdrawable_balance","oracle":"0x..","amount":"0x.."}
//! {"type":"token_balance","token":"0x..","holder":"0x..","amount":"0x.."}
//! ```
//!
//! The first subscription to a feed starts at the end of the file. The source remembers
//! how far each feed got, so a resubscription after a failure picks up right after the
//! last line it consumed instead of skipping what was appended in between.

use super::balances::{BalanceBook, BalanceKey};
use super::{FulfillmentFeed, HeaderFeed, RequestFeed, SourceError, Subscription};
use crate::supervisor::{supervise, RestartPolicy};
use crate::types::{
    Address, BlockHeight, FulfillmentEvent, Header, Payment, RequestEvent, RequestId, SpecId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// One line of the event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainRecord {
    Header {
        number: BlockHeight,
    },
    OracleRequest {
        oracle: Address,
        request_id: RequestId,
        requester: Address,
        spec_id: SpecId,
        payment: Payment,
        block_number: BlockHeight,
    },
    ChainlinkFulfilled {
        aggregator: Address,
        request_id: RequestId,
        block_number: BlockHeight,
    },
    NativeBalance {
        account: Address,
        amount: Payment,
    },
    WithdrawableBalance {
        oracle: Address,
        amount: Payment,
    },
    TokenBalance {
        token: Address,
        holder: Address,
        amount: Payment,
    },
}

impl ChainRecord {
    pub fn from_jsonl(line: &str) -> Result<Self, SourceError> {
        Ok(serde_json::from_str(line)?)
    }

    fn into_header(self) -> Option<Header> {
        match self {
            ChainRecord::Header { number } => Some(Header { number }),
            _ => None,
        }
    }

    fn into_request(self, wanted: Address) -> Option<RequestEvent> {
        match self {
            ChainRecord::OracleRequest {
                oracle,
                request_id,
                requester,
                spec_id,
                payment,
                block_number,
            } if oracle == wanted => Some(RequestEvent {
                request_id,
                requester,
                spec_id,
                payment,
                block_number,
            }),
            _ => None,
        }
    }

    fn into_fulfillment(self, wanted: Address) -> Option<FulfillmentEvent> {
        match self {
            ChainRecord::ChainlinkFulfilled {
                aggregator,
                request_id,
                block_number,
            } if aggregator == wanted => Some(FulfillmentEvent {
                request_id,
                block_number,
            }),
            _ => None,
        }
    }

    fn into_balance(self) -> Option<(BalanceKey, Payment)> {
        match self {
            ChainRecord::NativeBalance { account, amount } => Some((BalanceKey::Native(account), amount)),
            ChainRecord::WithdrawableBalance { oracle, amount } => {
                Some((BalanceKey::Withdrawable(oracle), amount))
            }
            ChainRecord::TokenBalance { token, holder, amount } => {
                Some((BalanceKey::Token { token, holder }, amount))
            }
            _ => None,
        }
    }
}

/// Position just past the last complete line a reader handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub inode: Option<u64>,
    pub offset: u64,
}

/// Follows a growing file line by line, reopening it after rotation
///
/// A line is only returned once its terminating newline has been written; a record the
/// writer flushed halfway is held back until the rest arrives.
pub struct TailReader {
    path: PathBuf,
    file: Option<BufReader<File>>,
    inode: Option<u64>,
    offset: u64,
    partial: Vec<u8>,
    poll_interval: Duration,
}

impl TailReader {
    pub fn new(path: PathBuf, poll_interval: Duration) -> Self {
        Self {
            path,
            file: None,
            inode: None,
            offset: 0,
            partial: Vec::new(),
            poll_interval,
        }
    }

    /// Opens the file and seeks to its end
    pub async fn start(&mut self) -> std::io::Result<()> {
        self.resume(None).await
    }

    /// Opens the file at `cursor`, or at its end without one. A cursor from a replaced or
    /// truncated file restarts at the beginning, the same as a rotation.
    pub async fn resume(&mut self, cursor: Option<Cursor>) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;
        let metadata = file.metadata().await?;
        let inode = inode_of(&metadata);
        let len = metadata.len();

        let offset = match cursor {
            None => len,
            Some(c) if c.inode == inode && c.offset <= len => c.offset,
            Some(_) => {
                log::info!(
                    "🔄 Event log replaced since last read, starting from the beginning: {}",
                    self.path.display()
                );
                0
            }
        };

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(offset)).await?;
        self.file = Some(reader);
        self.inode = inode;
        self.offset = offset;
        self.partial.clear();

        log::debug!("📖 Tailing {} from byte {}", self.path.display(), offset);
        Ok(())
    }

    pub fn cursor(&self) -> Cursor {
        Cursor {
            inode: self.inode,
            offset: self.offset,
        }
    }

    /// Waits for the next complete, non-empty line
    pub async fn read_line(&mut self) -> std::io::Result<String> {
        loop {
            let Some(reader) = self.file.as_mut() else {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "File not opened",
                ));
            };

            let read = reader.read_until(b'\n', &mut self.partial).await?;
            if read > 0 && self.partial.ends_with(b"\n") {
                let line = std::mem::take(&mut self.partial);
                self.offset += line.len() as u64;

                let line = String::from_utf8_lossy(&line);
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    return Ok(trimmed.to_string());
                }
                continue;
            }

            // at EOF, possibly holding an unterminated line
            if self.detect_rotation().await? {
                if !self.partial.is_empty() {
                    log::warn!(
                        "⚠️  Dropping unterminated line at end of rotated log {}",
                        self.path.display()
                    );
                }
                log::info!("🔄 Event log rotated, reopening: {}", self.path.display());
                self.reopen().await?;
                continue;
            }

            sleep(self.poll_interval).await;
        }
    }

    /// A rotated file is read from its beginning: everything in it is new
    async fn reopen(&mut self) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;
        self.inode = inode_of(&file.metadata().await?);
        self.file = Some(BufReader::new(file));
        self.offset = 0;
        self.partial.clear();
        Ok(())
    }

    async fn detect_rotation(&self) -> std::io::Result<bool> {
        let current = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => inode_of(&metadata),
            // mid-rotation: keep draining the old handle
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        Ok(match (self.inode, current) {
            (Some(old), Some(current)) => old != current,
            _ => false,
        })
    }
}

#[cfg(unix)]
fn inode_of(metadata: &std::fs::Metadata) -> Option<u64> {
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn inode_of(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FeedKey {
    Headers,
    Requests(Address),
    Fulfillments(Address),
    Balances,
}

pub struct JsonlEventSource {
    path: PathBuf,
    poll_interval: Duration,
    buffer: usize,
    cursors: Arc<Mutex<HashMap<FeedKey, Cursor>>>,
}

impl JsonlEventSource {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
            buffer: 100,
            cursors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn last_cursor(&self, key: FeedKey) -> Option<Cursor> {
        self.cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied()
    }

    async fn subscribe<T, F>(&self, key: FeedKey, select: F) -> Result<Subscription<T>, SourceError>
    where
        T: Send + 'static,
        F: Fn(ChainRecord) -> Option<T> + Send + 'static,
    {
        let mut reader = TailReader::new(self.path.clone(), self.poll_interval);
        reader.resume(self.last_cursor(key)).await?;
        store_cursor(&self.cursors, key, reader.cursor());

        let (tx, subscription) = Subscription::channel(self.buffer);
        let path = self.path.clone();
        let cursors = self.cursors.clone();

        tokio::spawn(async move {
            loop {
                let line = tokio::select! {
                    _ = tx.closed() => break,
                    line = reader.read_line() => line,
                };

                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        let _ = tx.send(Err(SourceError::Io(e))).await;
                        break;
                    }
                };

                match ChainRecord::from_jsonl(&line) {
                    Ok(record) => {
                        if let Some(event) = select(record) {
                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("⚠️  Skipping malformed record in {}: {}", path.display(), e);
                    }
                }

                // only lines the subscriber received (or that were not for it) count as consumed
                store_cursor(&cursors, key, reader.cursor());
            }
        });

        Ok(subscription)
    }

    /// Balance records as they are appended
    pub async fn subscribe_balances(&self) -> Result<Subscription<(BalanceKey, Payment)>, SourceError> {
        self.subscribe(FeedKey::Balances, ChainRecord::into_balance).await
    }

    /// Keeps `book` up to date with the balance records in the log, forever
    pub async fn follow_balances(self: Arc<Self>, book: Arc<BalanceBook>, policy: RestartPolicy) {
        supervise(
            "balances".to_string(),
            policy,
            move || {
                let source = self.clone();
                async move { source.subscribe_balances().await }
            },
            move |(key, amount): (BalanceKey, Payment)| {
                let book = book.clone();
                async move { book.record(key, amount) }
            },
        )
        .await
    }
}

fn store_cursor(cursors: &Mutex<HashMap<FeedKey, Cursor>>, key: FeedKey, cursor: Cursor) {
    cursors
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key, cursor);
}

#[async_trait]
impl HeaderFeed for JsonlEventSource {
    async fn subscribe_headers(&self) -> Result<Subscription<Header>, SourceError> {
        self.subscribe(FeedKey::Headers, ChainRecord::into_header).await
    }
}

#[async_trait]
impl RequestFeed for JsonlEventSource {
    async fn subscribe_requests(
        &self,
        oracle: Address,
    ) -> Result<Subscription<RequestEvent>, SourceError> {
        self.subscribe(FeedKey::Requests(oracle), move |record| record.into_request(oracle))
            .await
    }
}

#[async_trait]
impl FulfillmentFeed for JsonlEventSource {
    async fn subscribe_fulfillments(
        &self,
        aggregator: Address,
    ) -> Result<Subscription<FulfillmentEvent>, SourceError> {
        self.subscribe(FeedKey::Fulfillments(aggregator), move |record| {
            record.into_fulfillment(aggregator)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;
    use std::io::Write;
    use tokio::time::timeout;

    fn append(path: &std::path::Path, text: &str) {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    const AGGREGATOR: &str = "0x2222222222222222222222222222222222222222";

    fn fulfilled_line(id: u8, height: u64) -> String {
        format!(
            "{{\"type\":\"chainlink_fulfilled\",\"aggregator\":\"{}\",\"request_id\":\"0x{:064x}\",\"block_number\":{}}}\n",
            AGGREGATOR, id, height
        )
    }

    #[test]
    fn test_parse_records() {
        let header = ChainRecord::from_jsonl(r#"{"type":"header","number":42}"#).unwrap();
        assert_eq!(header, ChainRecord::Header { number: 42 });

        let line = r#"{"type":"chainlink_fulfilled","aggregator":"0x2222222222222222222222222222222222222222","request_id":"0x00000000000000000000000000000000000000000000000000000000000000aa","block_number":12}"#;
        let record = ChainRecord::from_jsonl(line).unwrap();
        let agg: Address = "0x2222222222222222222222222222222222222222".parse().unwrap();

        assert!(record.clone().into_fulfillment(Address::zero()).is_none());
        let event = record.into_fulfillment(agg).unwrap();
        assert_eq!(event.block_number, 12);
    }

    #[test]
    fn test_malformed_record_is_decode_error() {
        assert!(matches!(
            ChainRecord::from_jsonl(r#"{"type":"header"}"#),
            Err(SourceError::Decode(_))
        ));
        assert!(matches!(
            ChainRecord::from_jsonl("not json"),
            Err(SourceError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_missing_file_fails() {
        let source = JsonlEventSource::new("/nonexistent/events.jsonl", Duration::from_millis(10));
        assert!(matches!(
            source.subscribe_headers().await,
            Err(SourceError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_line_written_in_two_flushes_arrives_whole() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = JsonlEventSource::new(file.path(), Duration::from_millis(10));
        let mut headers = source.subscribe_headers().await.unwrap();

        append(file.path(), r#"{"type":"header","#);
        sleep(Duration::from_millis(100)).await;
        append(file.path(), "\"number\":42}\n{\"type\":\"header\",\"number\":43}\n");

        let first = timeout(Duration::from_secs(1), headers.next()).await.unwrap().unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), headers.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(first.number, 42);
        assert_eq!(second.number, 43);
    }

    #[tokio::test]
    async fn test_unterminated_line_is_held_back() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut reader = TailReader::new(file.path().to_path_buf(), Duration::from_millis(10));
        reader.start().await.unwrap();

        append(file.path(), r#"{"type":"header","number":7}"#);
        assert!(timeout(Duration::from_millis(100), reader.read_line()).await.is_err());
        assert_eq!(reader.cursor().offset, 0);
    }

    #[tokio::test]
    async fn test_resubscribe_resumes_after_last_consumed_line() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = JsonlEventSource::new(file.path(), Duration::from_millis(10));
        let aggregator: Address = AGGREGATOR.parse().unwrap();

        let mut first = source.subscribe_fulfillments(aggregator).await.unwrap();
        append(file.path(), &fulfilled_line(0x01, 10));
        let event = timeout(Duration::from_secs(1), first.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(event.block_number, 10);
        drop(first);

        // appended while nobody is subscribed
        append(file.path(), &fulfilled_line(0x02, 11));
        sleep(Duration::from_millis(50)).await;

        let mut second = source.subscribe_fulfillments(aggregator).await.unwrap();
        let event = timeout(Duration::from_secs(1), second.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(event.block_number, 11);
        assert!(timeout(Duration::from_millis(100), second.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_log_restarts_from_beginning() {
        let file = tempfile::NamedTempFile::new().unwrap();
        append(file.path(), "{\"type\":\"header\",\"number\":1}\n");

        let mut reader = TailReader::new(file.path().to_path_buf(), Duration::from_millis(10));
        let stale = Cursor {
            inode: reader_inode(file.path()),
            offset: 10_000,
        };
        reader.resume(Some(stale)).await.unwrap();

        let line = timeout(Duration::from_secs(1), reader.read_line()).await.unwrap().unwrap();
        assert_eq!(line, r#"{"type":"header","number":1}"#);
    }

    fn reader_inode(path: &std::path::Path) -> Option<u64> {
        inode_of(&std::fs::metadata(path).unwrap())
    }

    #[tokio::test]
    async fn test_balance_records_fill_book() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = Arc::new(JsonlEventSource::new(file.path(), Duration::from_millis(10)));
        let book = Arc::new(BalanceBook::new());
        let policy = RestartPolicy {
            liveness_timeout: None,
            ..RestartPolicy::default()
        };
        let task = tokio::spawn(source.clone().follow_balances(book.clone(), policy));

        let node: Address = "0x3333333333333333333333333333333333333333".parse().unwrap();
        for _ in 0..100 {
            if source.last_cursor(FeedKey::Balances).is_some() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        append(
            file.path(),
            "{\"type\":\"native_balance\",\"account\":\"0x3333333333333333333333333333333333333333\",\"amount\":\"0xde0b6b3a7640000\"}\n",
        );

        for _ in 0..100 {
            if book.get(&BalanceKey::Native(node)).is_ok() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(book.get(&BalanceKey::Native(node)).unwrap(), U256::exp10(18));
        task.abort();
    }
}
