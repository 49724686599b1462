//! Client-driven navigation of the encrypted tree
//!
//! The server cannot compare ciphertexts, so every ordering decision is made
//! here: fetch a node, decrypt it, compare, and ask for the next child. The
//! [`ClientCache`] lets a walk start at the lowest node known to bracket the
//! new value instead of at the root.

use std::cmp::Ordering;
use std::path::Path as FsPath;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use mope_core::{Ciphertext, Direction, InsertRequest, Opc, Path, RecordId, Request, Response, Transport};
use serde::Serialize;

use crate::cache::{Bounds, ClientCache};
use crate::cipher::EncryptionScheme;
use crate::dataset::read_dataset;
use crate::error::{ClientError, Result};

/// Lines between progress reports during file ingestion
pub const PROGRESS_INTERVAL: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InsertReceipt {
    pub plaintext: String,
    pub ciphertext: Ciphertext,
    /// Path of the node holding the value when the insert was sent
    pub path: Path,
    pub duplicate: bool,
    pub round_trips: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecryptedRecord {
    pub id: RecordId,
    pub plaintext: String,
    pub opc: Opc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub lines: usize,
    pub duplicates: usize,
    pub round_trips: u64,
    pub elapsed: Duration,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BoundSide {
    Lower,
    Upper,
}

pub struct NavigationDriver<T, E> {
    transport: T,
    scheme: E,
    cache: ClientCache,
    round_trips: u64,
    cache_time: Duration,
}

impl<T: Transport, E: EncryptionScheme> NavigationDriver<T, E> {
    pub fn new(transport: T, scheme: E) -> Self {
        Self {
            transport,
            scheme,
            cache: ClientCache::new(),
            round_trips: 0,
            cache_time: Duration::ZERO,
        }
    }

    pub fn cache(&self) -> &ClientCache {
        &self.cache
    }

    pub fn scheme(&self) -> &E {
        &self.scheme
    }

    /// Requests answered over the lifetime of this driver
    pub fn round_trips(&self) -> u64 {
        self.round_trips
    }

    /// Time spent consulting the cache
    pub fn cache_time(&self) -> Duration {
        self.cache_time
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    async fn request(&mut self, request: Request) -> Result<Response> {
        let kind = request.kind();
        let response = self.transport.round_trip(request).await?;
        self.round_trips += 1;

        match response {
            Response::Error(reply) => {
                tracing::warn!(kind, code = %reply.code, message = %reply.message, "Server rejected request");
                Err(ClientError::Server {
                    code: reply.code,
                    message: reply.message,
                })
            }
            response => Ok(response),
        }
    }

    pub async fn get_root(&mut self) -> Result<Option<Ciphertext>> {
        match self.request(Request::GetRoot).await? {
            Response::Root(root) => Ok(root),
            other => Err(unexpected("root", &other)),
        }
    }

    async fn step(&mut self, value: Ciphertext, direction: Direction) -> Result<Option<Ciphertext>> {
        match self.request(Request::step(value, direction)).await? {
            Response::Child(child) => Ok(child),
            other => Err(unexpected("child", &other)),
        }
    }

    /// Paths of the nodes holding each plaintext, in request order
    pub async fn find_node_path(&mut self, plaintexts: &[&str]) -> Result<Vec<Path>> {
        let values = plaintexts
            .iter()
            .map(|p| self.scheme.encrypt(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.node_paths(values).await
    }

    async fn node_paths(&mut self, values: Vec<Ciphertext>) -> Result<Vec<Path>> {
        let expected = values.len();
        match self.request(Request::FindNodePath(values)).await? {
            Response::NodePaths(paths) if paths.len() == expected => Ok(paths),
            other => Err(unexpected("node_paths", &other)),
        }
    }

    async fn node_path(&mut self, value: Ciphertext) -> Result<Path> {
        match self.request(Request::FindNodePath(vec![value])).await? {
            Response::NodePaths(mut paths) if paths.len() == 1 => Ok(paths.remove(0)),
            other => Err(unexpected("node_paths", &other)),
        }
    }

    /// Lowest node whose subtree holds both plaintexts
    pub async fn get_common_node(&mut self, a: &str, b: &str) -> Result<(String, Path)> {
        let (value, path) = self.common_node(a, b).await?;
        Ok((self.scheme.decrypt(&value)?, path))
    }

    async fn common_node(&mut self, a: &str, b: &str) -> Result<(Ciphertext, Path)> {
        let a = self.scheme.encrypt(a)?;
        let b = self.scheme.encrypt(b)?;
        match self.request(Request::GetCommonNode(a, b)).await? {
            Response::CommonNode { value, path } => Ok((value, path)),
            other => Err(unexpected("common_node", &other)),
        }
    }

    pub async fn insert(&mut self, plaintext: &str) -> Result<InsertReceipt> {
        let ciphertext = self.scheme.encrypt(plaintext)?;
        let started = self.round_trips;

        let lookup = Instant::now();
        let bounds = self.cache.search(plaintext);
        self.cache_time += lookup.elapsed();
        self.cache.insert(plaintext);

        let (mut cursor, mut path) = match bounds {
            Bounds::Present => {
                let path = self.node_path(ciphertext.clone()).await?;
                return self.insert_duplicate(plaintext, ciphertext, path, started).await;
            }
            Bounds::Between { lower, upper } => {
                let (value, path) = self.common_node(&lower, &upper).await?;
                (Some(value), path)
            }
            Bounds::Unbounded => (self.get_root().await?, Path::root()),
        };

        let mut parent = None;
        while let Some(here) = cursor {
            let known = self.scheme.decrypt(&here)?;
            let direction = match plaintext.cmp(known.as_str()) {
                Ordering::Less => Direction::Left,
                Ordering::Greater => Direction::Right,
                Ordering::Equal => {
                    return self.insert_duplicate(plaintext, here, path, started).await;
                }
            };
            self.cache.insert(&known);

            cursor = self.step(here.clone(), direction).await?;
            parent = Some((here, direction));
            path.push(direction);
        }

        let (parent, direction) = parent.unzip();
        self.send_insert(InsertRequest {
            parent,
            value: ciphertext.clone(),
            direction,
            path: path.clone(),
        })
        .await?;

        tracing::debug!(%path, round_trips = self.round_trips - started, "Inserted new node");
        Ok(InsertReceipt {
            plaintext: plaintext.to_string(),
            ciphertext,
            path,
            duplicate: false,
            round_trips: self.round_trips - started,
        })
    }

    async fn insert_duplicate(
        &mut self,
        plaintext: &str,
        ciphertext: Ciphertext,
        path: Path,
        started: u64,
    ) -> Result<InsertReceipt> {
        let direction = Direction::from_bit(rand::random());
        self.send_insert(InsertRequest {
            parent: Some(ciphertext.clone()),
            value: ciphertext.clone(),
            direction: Some(direction),
            path: path.clone(),
        })
        .await?;

        tracing::debug!(%path, "Inserted duplicate");
        Ok(InsertReceipt {
            plaintext: plaintext.to_string(),
            ciphertext,
            path,
            duplicate: true,
            round_trips: self.round_trips - started,
        })
    }

    async fn send_insert(&mut self, request: InsertRequest) -> Result<()> {
        let value = request.value.clone();
        match self.request(Request::Insert(request)).await? {
            Response::Inserted(Some(echo)) if echo == value => Ok(()),
            Response::Inserted(_) => Err(ClientError::NotAcknowledged(value.to_string())),
            other => Err(unexpected("inserted", &other)),
        }
    }

    /// Every row stored under exactly this plaintext
    pub async fn query(&mut self, plaintext: &str) -> Result<Vec<DecryptedRecord>> {
        let value = self.scheme.encrypt(plaintext)?;
        match self.request(Request::Query(value)).await? {
            Response::Records(records) => self.decrypt_records(records),
            other => Err(unexpected("records", &other)),
        }
    }

    /// Rows with `min <= plaintext <= max`, in plaintext order
    ///
    /// The server can only range over stored values, so each bound is first
    /// moved onto the closest stored value inside the range.
    pub async fn range_query(&mut self, min: Option<&str>, max: Option<&str>) -> Result<Vec<DecryptedRecord>> {
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Ok(Vec::new());
            }
        }

        let lo = match min {
            Some(min) => match self.resolve_bound(min, BoundSide::Lower).await? {
                Some(value) => Some(value),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        let hi = match max {
            Some(max) => match self.resolve_bound(max, BoundSide::Upper).await? {
                Some(value) => Some(value),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        match self.request(Request::RangeQuery { min: lo, max: hi }).await? {
            Response::Records(records) => self.decrypt_records(records),
            other => Err(unexpected("records", &other)),
        }
    }

    /// Closest stored value at or above (lower) or at or below (upper) the
    /// plaintext
    async fn resolve_bound(&mut self, plaintext: &str, side: BoundSide) -> Result<Option<Ciphertext>> {
        if self.cache.contains(plaintext) {
            return Ok(Some(self.scheme.encrypt(plaintext)?));
        }

        let mut cursor = self.get_root().await?;
        let mut candidate = None;

        while let Some(here) = cursor {
            let known = self.scheme.decrypt(&here)?;
            self.cache.insert(&known);

            let direction = match plaintext.cmp(known.as_str()) {
                Ordering::Equal => return Ok(Some(here)),
                Ordering::Less => Direction::Left,
                Ordering::Greater => Direction::Right,
            };
            let keep = match side {
                BoundSide::Lower => direction == Direction::Left,
                BoundSide::Upper => direction == Direction::Right,
            };
            if keep {
                candidate = Some(here.clone());
            }
            cursor = self.step(here, direction).await?;
        }

        Ok(candidate)
    }

    fn decrypt_records(&self, records: Vec<mope_core::Record>) -> Result<Vec<DecryptedRecord>> {
        records
            .into_iter()
            .map(|record| {
                Ok(DecryptedRecord {
                    id: record.id,
                    plaintext: self.scheme.decrypt(&record.value)?,
                    opc: record.opc,
                })
            })
            .collect()
    }

    /// Insert every non-empty line of a file, up to `limit` lines
    pub async fn insert_file(
        &mut self,
        path: impl AsRef<FsPath>,
        limit: Option<usize>,
        progress: &ProgressBar,
    ) -> Result<IngestSummary> {
        let mut values = read_dataset(path.as_ref())?;
        if let Some(limit) = limit {
            values.truncate(limit);
        }

        progress.set_length(values.len() as u64);
        let start = Instant::now();
        let trips_before = self.round_trips;
        let cache_before = self.cache_time;
        let mut summary = IngestSummary::default();

        for value in &values {
            let receipt = self.insert(value).await?;
            summary.lines += 1;
            if receipt.duplicate {
                summary.duplicates += 1;
            }
            progress.inc(1);

            if summary.lines % PROGRESS_INTERVAL == 0 {
                let elapsed = start.elapsed();
                tracing::info!(
                    lines = summary.lines,
                    elapsed_ms = elapsed.as_millis() as u64,
                    cache_ms = (self.cache_time - cache_before).as_millis() as u64,
                    rate = summary.lines as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
                    "Ingest progress"
                );
            }
        }

        summary.round_trips = self.round_trips - trips_before;
        summary.elapsed = start.elapsed();
        progress.finish_with_message("Ingest complete");
        tracing::info!(
            lines = summary.lines,
            duplicates = summary.duplicates,
            round_trips = summary.round_trips,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Ingested file"
        );
        Ok(summary)
    }
}

fn unexpected(expected: &'static str, got: &Response) -> ClientError {
    ClientError::UnexpectedResponse {
        expected,
        actual: got.kind(),
    }
}
