use crate::error::{Error, Result};
use crate::oracle::{Oracle, OracleResult};
use num_bigint::BigUint;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, trace};

/// Tuning knobs for [`OraclePool::find_first`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Candidates dispatched together before checking for a hit.
    pub batch_size: usize,
    /// Outer attack iterations that still use concurrent search; later ones
    /// query sequentially.
    pub parallel_iterations: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            batch_size: 1000,
            parallel_iterations: 10,
        }
    }
}

/// A set of oracle connections searched concurrently, one worker thread per
/// connection.
pub struct OraclePool<O> {
    ports: Vec<Mutex<O>>,
    workers: ThreadPool,
    options: PoolOptions,
    next: AtomicUsize,
    queries: AtomicU64,
}

impl<O: Oracle + Send> OraclePool<O> {
    pub fn new(ports: Vec<O>, options: PoolOptions) -> Result<Self> {
        if ports.is_empty() {
            return Err(Error::Config("oracle pool needs at least one port".to_string()));
        }
        if options.batch_size == 0 {
            return Err(Error::Config("batch size must be positive".to_string()));
        }
        let workers = ThreadPoolBuilder::new()
            .num_threads(ports.len())
            .thread_name(|i| format!("oracle-port-{}", i))
            .build()
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
        Ok(OraclePool {
            ports: ports.into_iter().map(Mutex::new).collect(),
            workers,
            options,
            next: AtomicUsize::new(0),
            queries: AtomicU64::new(0),
        })
    }

    /// Number of oracle connections.
    pub fn width(&self) -> usize {
        self.ports.len()
    }

    pub fn options(&self) -> PoolOptions {
        self.options
    }

    /// Total queries sent through this pool.
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    fn query_port(&self, port: usize, ciphertext: &BigUint) -> OracleResult {
        let sent = self.queries.fetch_add(1, Ordering::Relaxed) + 1;
        if sent % 10_000 == 0 {
            trace!(queries = sent, "oracle queries sent");
        }
        let mut oracle = match self.ports[port % self.ports.len()].lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        oracle.query(ciphertext)
    }

    /// Sends one query to the next port in round-robin order.
    pub fn query_next(&self, ciphertext: &BigUint) -> OracleResult {
        let port = self.next.fetch_add(1, Ordering::Relaxed);
        self.query_port(port, ciphertext)
    }

    /// Returns the first candidate, in sequence order, whose ciphertext the
    /// oracle accepts. `encode` maps a candidate to the ciphertext actually
    /// sent.
    ///
    /// Concurrent mode dispatches `batch_size` candidates at a time across all
    /// ports and stops issuing queries past the leftmost hit; answers still in
    /// flight are discarded. Both modes accept the same candidate for a
    /// deterministic oracle.
    pub fn find_first<I, F>(&self, candidates: I, encode: F, concurrent: bool) -> Result<BigUint>
    where
        I: IntoIterator<Item = BigUint>,
        F: Fn(&BigUint) -> BigUint + Sync,
    {
        let mut candidates = candidates.into_iter();
        if !concurrent || self.ports.len() == 1 {
            for s in candidates {
                if self.query_next(&encode(&s)).conforming()? {
                    return Ok(s);
                }
            }
            return Err(Error::SearchExhausted);
        }

        loop {
            let batch: Vec<BigUint> = candidates.by_ref().take(self.options.batch_size).collect();
            if batch.is_empty() {
                return Err(Error::SearchExhausted);
            }
            debug!(first = %batch[0], len = batch.len(), "dispatching batch");
            let hit = self.workers.install(|| {
                batch
                    .par_iter()
                    .map(|s| {
                        let port = rayon::current_thread_index().unwrap_or(0);
                        (s, self.query_port(port, &encode(s)))
                    })
                    .find_first(|(_, answer)| *answer != OracleResult::NotConforming)
            });
            match hit {
                Some((s, answer)) => {
                    answer.conforming()?;
                    return Ok(s.clone());
                }
                None => continue,
            }
        }
    }
}

impl<O: Oracle + Send> Oracle for OraclePool<O> {
    fn query(&mut self, ciphertext: &BigUint) -> OracleResult {
        self.query_next(ciphertext)
    }
}
