use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::BackendError;
use crate::logs::backend::{LogBackend, PageRequest};
use crate::logs::{LogEvent, QueryWindow};

/// Retrieves every page for a window and returns one ordered result
#[derive(Clone)]
pub struct LogFetcher {
    backend: Arc<dyn LogBackend>,
}

impl LogFetcher {
    pub fn new(backend: Arc<dyn LogBackend>) -> Self {
        Self { backend }
    }

    /// Fetch all events in `window`, ascending by timestamp.
    ///
    /// Pages are requested until the backend stops returning a continuation
    /// token. Any page failure aborts the whole fetch; pages already
    /// retrieved are discarded. Equal timestamps keep their arrival order.
    pub async fn fetch_window(&self, window: &QueryWindow) -> Result<Vec<LogEvent>, BackendError> {
        let mut events = Vec::new();
        let mut next_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let request = PageRequest::from_window(window, next_token.take());
            let page = match self.backend.request_page(request).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(
                        "FETCHER: Page {} for {} failed, discarding {} events: {}",
                        pages + 1,
                        window.log_group,
                        events.len(),
                        e
                    );
                    return Err(e);
                }
            };
            pages += 1;
            debug!("FETCHER: Page {} returned {} events", pages, page.events.len());
            events.extend(page.events);

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        // sort_by_key is stable
        events.sort_by_key(|event| event.timestamp);
        let events = keep_latest(events, window.limit);

        info!(
            "FETCHER: Fetched {} events from {} in {} pages (limit {})",
            events.len(),
            window.log_group,
            pages,
            window.limit
        );
        Ok(events)
    }
}

/// Keep the last `limit` events of an ascending sequence; 0 keeps all.
pub fn keep_latest(mut events: Vec<LogEvent>, limit: usize) -> Vec<LogEvent> {
    if limit == 0 || events.len() <= limit {
        return events;
    }
    events.split_off(events.len() - limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::backend::{LogPage, MockLogBackend};
    use mockall::Sequence;

    fn page(events: Vec<LogEvent>, next_token: Option<&str>) -> LogPage {
        LogPage {
            events,
            next_token: next_token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_follows_continuation_tokens_in_order() {
        let mut backend = MockLogBackend::new();
        let mut seq = Sequence::new();

        backend
            .expect_request_page()
            .withf(|req| req.next_token.is_none() && req.log_group_name == "/ecs/api")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(page(vec![LogEvent::new(30, 0, "c")], Some("t1"))));
        backend
            .expect_request_page()
            .withf(|req| req.next_token.as_deref() == Some("t1"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(page(vec![LogEvent::new(10, 0, "a")], Some("t2"))));
        backend
            .expect_request_page()
            .withf(|req| req.next_token.as_deref() == Some("t2"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(page(vec![LogEvent::new(20, 0, "b")], None)));

        let fetcher = LogFetcher::new(Arc::new(backend));
        let events = fetcher.fetch_window(&QueryWindow::new("/ecs/api")).await.unwrap();

        let messages: Vec<_> = events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failure_on_later_page_discards_everything() {
        let mut backend = MockLogBackend::new();
        backend
            .expect_request_page()
            .withf(|req| req.next_token.is_none())
            .times(1)
            .returning(|_| Ok(page(vec![LogEvent::new(1, 0, "kept?")], Some("t1"))));
        backend
            .expect_request_page()
            .withf(|req| req.next_token.is_some())
            .times(1)
            .returning(|_| Err(BackendError::Throttled("Rate exceeded".into())));

        let fetcher = LogFetcher::new(Arc::new(backend));
        let result = fetcher.fetch_window(&QueryWindow::new("g")).await;

        assert!(matches!(result, Err(BackendError::Throttled(_))));
    }

    #[tokio::test]
    async fn test_limit_is_forwarded_to_each_page() {
        let mut backend = MockLogBackend::new();
        backend
            .expect_request_page()
            .withf(|req| req.limit == Some(2) && req.filter_pattern.as_deref() == Some("GET"))
            .times(1)
            .returning(|_| {
                Ok(page(
                    vec![
                        LogEvent::new(5, 0, "e"),
                        LogEvent::new(1, 0, "a"),
                        LogEvent::new(3, 0, "c"),
                    ],
                    None,
                ))
            });

        let fetcher = LogFetcher::new(Arc::new(backend));
        let window = QueryWindow::new("g")
            .with_limit(2)
            .with_filter(Some("GET".to_string()));
        let events = fetcher.fetch_window(&window).await.unwrap();

        assert_eq!(events, vec![LogEvent::new(3, 0, "c"), LogEvent::new(5, 0, "e")]);
    }

    #[test]
    fn test_keep_latest() {
        let events: Vec<_> = (0..5).map(|i| LogEvent::new(i, 0, i.to_string())).collect();

        assert_eq!(keep_latest(events.clone(), 0).len(), 5);
        assert_eq!(keep_latest(events.clone(), 10).len(), 5);

        let latest = keep_latest(events, 2);
        assert_eq!(latest.iter().map(|e| e.timestamp).collect::<Vec<_>>(), vec![3, 4]);
    }
}
