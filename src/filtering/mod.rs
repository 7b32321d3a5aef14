use std::ops::Range;
use std::sync::Arc;
use threadpool::ThreadPool;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::error::QueryError;
use crate::logs::{LogEvent, LogFetcher, QueryWindow};

/// A search hit: the index of the matching event in the searched corpus and
/// the matched character range inside its message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterMatch {
    pub source_index: usize,
    pub matched_range: Range<usize>,
}

/// Where an ad hoc query runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Forward the term to the log source as its filter pattern
    Backend,
    /// Scan the events already held by the session
    LocalBuffer,
}

/// An event returned by a query, with the range to highlight if the term
/// occurs in its message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryHit {
    pub event: LogEvent,
    pub highlight: Option<Range<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub term: String,
    pub hits: Vec<QueryHit>,
}

/// Character range of the first case-insensitive occurrence of `term` in
/// `message`. An empty term matches at the start.
pub fn find_match(message: &str, term: &str) -> Option<Range<usize>> {
    let needle: Vec<char> = term.chars().collect();
    if needle.is_empty() {
        return Some(0..0);
    }

    let haystack: Vec<char> = message.chars().collect();
    if haystack.len() < needle.len() {
        return None;
    }

    (0..=haystack.len() - needle.len())
        .find(|&start| {
            needle
                .iter()
                .zip(&haystack[start..])
                .all(|(a, b)| chars_equal_ignore_case(*a, *b))
        })
        .map(|start| start..start + needle.len())
}

fn chars_equal_ignore_case(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}

/// Case-insensitive substring search over message bodies.
///
/// Results are ordered by ascending event timestamp; entries with equal
/// timestamps keep corpus order.
pub fn search(term: &str, corpus: &[LogEvent]) -> Vec<FilterMatch> {
    order_by_timestamp(collect_matches(term, corpus, 0))
}

/// Unordered matches in `events`, with source indexes shifted by `offset`
fn collect_matches(term: &str, events: &[LogEvent], offset: usize) -> Vec<(i64, FilterMatch)> {
    events
        .iter()
        .enumerate()
        .filter_map(|(index, event)| {
            find_match(&event.message, term).map(|matched_range| {
                (
                    event.timestamp,
                    FilterMatch {
                        source_index: offset + index,
                        matched_range,
                    },
                )
            })
        })
        .collect()
}

fn order_by_timestamp(mut matches: Vec<(i64, FilterMatch)>) -> Vec<FilterMatch> {
    // Stable, so equal timestamps stay in corpus order
    matches.sort_by_key(|(timestamp, _)| *timestamp);
    matches.into_iter().map(|(_, m)| m).collect()
}

type ChunkReceiver = oneshot::Receiver<Vec<(i64, FilterMatch)>>;

/// Join per-chunk results in chunk order. A worker that went away without
/// answering fails the whole search.
async fn gather_chunks(receivers: Vec<ChunkReceiver>) -> Result<Vec<(i64, FilterMatch)>, QueryError> {
    let mut matches = Vec::new();
    for (chunk, rx) in receivers.into_iter().enumerate() {
        let part = rx
            .await
            .map_err(|_| QueryError::Worker(format!("chunk {} ended without a result", chunk)))?;
        matches.extend(part);
    }
    Ok(matches)
}

/// Runs ad hoc queries either against the log source or a local corpus
pub struct QueryEngine {
    fetcher: LogFetcher,
    window: QueryWindow,
    thread_pool: ThreadPool,
}

impl QueryEngine {
    /// `window` supplies the log group, time range, limit and stream filter
    /// for backend queries; its filter pattern is replaced by the term.
    pub fn new(fetcher: LogFetcher, window: QueryWindow, num_threads: usize) -> Self {
        let thread_pool = ThreadPool::new(num_threads.max(1));
        info!("QUERY: Created query engine with {} worker threads", num_threads.max(1));
        Self {
            fetcher,
            window,
            thread_pool,
        }
    }

    /// Get the recommended number of threads for local search based on CPU count
    pub fn recommended_threads() -> usize {
        std::cmp::max(2, num_cpus::get())
    }

    pub async fn run(
        &self,
        term: String,
        mode: QueryMode,
        corpus: Arc<Vec<LogEvent>>,
    ) -> Result<QueryResult, QueryError> {
        match mode {
            QueryMode::Backend => self.run_backend(term).await,
            QueryMode::LocalBuffer => self.run_local(term, corpus).await,
        }
    }

    /// Push the term down to the log source as a single filter expression
    pub async fn run_backend(&self, term: String) -> Result<QueryResult, QueryError> {
        let window = self.window.clone().with_filter(Some(term.clone()));
        info!("QUERY: Running backend query {:?} on {}", term, window.log_group);

        let events = self.fetcher.fetch_window(&window).await?;
        let hits = events
            .into_iter()
            .map(|event| {
                let highlight = if term.is_empty() { None } else { find_match(&event.message, &term) };
                QueryHit { event, highlight }
            })
            .collect();

        Ok(QueryResult { term, hits })
    }

    /// Scan `corpus` on the worker pool, one contiguous chunk per worker
    pub async fn run_local(&self, term: String, corpus: Arc<Vec<LogEvent>>) -> Result<QueryResult, QueryError> {
        let workers = self.thread_pool.max_count().max(1);
        let chunk_size = corpus.len().div_ceil(workers).max(1);
        info!(
            "QUERY: Running local query {:?} over {} events in chunks of {}",
            term,
            corpus.len(),
            chunk_size
        );

        let mut receivers = Vec::new();
        for start in (0..corpus.len()).step_by(chunk_size) {
            let end = (start + chunk_size).min(corpus.len());
            let (tx, rx) = oneshot::channel();
            let corpus = Arc::clone(&corpus);
            let term = term.clone();
            self.thread_pool.execute(move || {
                let _ = tx.send(collect_matches(&term, &corpus[start..end], start));
            });
            receivers.push(rx);
        }

        let matches = order_by_timestamp(gather_chunks(receivers).await?);
        let hits: Vec<QueryHit> = matches
            .into_iter()
            .map(|m| QueryHit {
                event: corpus[m.source_index].clone(),
                highlight: (!m.matched_range.is_empty()).then_some(m.matched_range),
            })
            .collect();

        debug!("QUERY: Local query {:?} produced {} hits", term, hits.len());
        Ok(QueryResult { term, hits })
    }
}
