//! Backward-paging message history for the open thread.
//!
//! A thread opens anchored at its most recent page. Older pages are fetched
//! by stepping the offset back one page at a time and prepended; live
//! messages from the chat channel are appended at the tail.

use std::collections::HashSet;

use crate::api::{ApiResult, ChatApi};
use crate::models::{MessagePage, MessageRecord, ThreadId, UserId};

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Offset of the most recent page of a thread with `total` messages.
pub const fn initial_offset(total: usize, page_size: usize) -> usize {
    total.saturating_sub(page_size)
}

/// Offset of the page before `current`.
pub const fn previous_offset(current: usize, page_size: usize) -> usize {
    current.saturating_sub(page_size)
}

/// Result of the two-step initial load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialHistory {
    pub total: usize,
    pub offset: usize,
    pub messages: Vec<MessageRecord>,
}

/// Load the most recent page of a thread.
///
/// The offset-0 page tells us the total count. When the thread fits in one
/// page that probe is the answer; otherwise it is discarded and the page at
/// `total - page_size` is fetched instead.
pub async fn fetch_initial<A: ChatApi>(
    api: &A,
    thread_id: ThreadId,
    page_size: usize,
) -> ApiResult<InitialHistory> {
    let probe = api.fetch_messages(thread_id, 0, page_size).await?;
    let offset = initial_offset(probe.count, page_size);
    if offset == 0 {
        return Ok(InitialHistory {
            total: probe.count,
            offset,
            messages: probe.results,
        });
    }

    let last = api.fetch_messages(thread_id, offset, page_size).await?;
    Ok(InitialHistory {
        total: probe.count,
        offset,
        messages: last.results,
    })
}

/// Message list of one open thread.
#[derive(Debug, Clone)]
pub struct HistoryLoader {
    thread_id: ThreadId,
    page_size: usize,
    messages: Vec<MessageRecord>,
    offset: usize,
    has_more: bool,
    loaded: bool,
    loading_initial: bool,
    loading_older: bool,
}

impl HistoryLoader {
    pub const fn new(thread_id: ThreadId, page_size: usize) -> Self {
        Self {
            thread_id,
            page_size,
            messages: Vec::new(),
            offset: 0,
            has_more: false,
            loaded: false,
            loading_initial: false,
            loading_older: false,
        }
    }

    /// Open a thread and load its most recent page.
    pub async fn open<A: ChatApi>(api: &A, thread_id: ThreadId, page_size: usize) -> ApiResult<Self> {
        let initial = fetch_initial(api, thread_id, page_size).await?;
        let mut loader = Self::new(thread_id, page_size);
        loader.apply_initial(initial);
        Ok(loader)
    }

    /// Fetch and prepend the previous page. Returns how many messages were
    /// added; zero when there is nothing older.
    pub async fn load_older<A: ChatApi>(&mut self, api: &A) -> ApiResult<usize> {
        let Some(offset) = self.next_page_request() else {
            return Ok(0);
        };
        match api.fetch_messages(self.thread_id, offset, self.page_size).await {
            Ok(page) => Ok(self.apply_older_page(offset, page)),
            Err(error) => {
                self.fail_older_page();
                Err(error)
            }
        }
    }

    pub const fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Messages in ascending send order
    pub fn messages(&self) -> &[MessageRecord] {
        &self.messages
    }

    pub const fn offset(&self) -> usize {
        self.offset
    }

    pub const fn has_more(&self) -> bool {
        self.has_more
    }

    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub const fn is_loading_older(&self) -> bool {
        self.loading_older
    }

    /// Claim the initial fetch. False once loaded or while a fetch is in
    /// flight.
    pub fn claim_initial(&mut self) -> bool {
        if self.loaded || self.loading_initial {
            return false;
        }
        self.loading_initial = true;
        true
    }

    /// Release the initial claim after a failed fetch so it can be retried.
    pub fn fail_initial(&mut self) {
        self.loading_initial = false;
    }

    /// Install the initial page. Live messages that arrived while it was
    /// loading stay at the tail.
    pub fn apply_initial(&mut self, initial: InitialHistory) {
        let live = std::mem::take(&mut self.messages);
        self.messages = initial.messages;
        let known: HashSet<String> = self.messages.iter().map(|m| m.id.clone()).collect();
        self.messages
            .extend(live.into_iter().filter(|m| !known.contains(&m.id)));
        self.offset = initial.offset;
        self.has_more = initial.offset > 0;
        self.loaded = true;
        self.loading_initial = false;
        tracing::debug!(
            thread_id = self.thread_id,
            total = initial.total,
            offset = self.offset,
            "Loaded thread history"
        );
    }

    /// Claim the next backward fetch. Returns the offset to request, or
    /// `None` when there is nothing older or a fetch is already in flight.
    pub fn next_page_request(&mut self) -> Option<usize> {
        if !self.loaded || !self.has_more || self.loading_older {
            return None;
        }
        let offset = previous_offset(self.offset, self.page_size);
        if offset == self.offset {
            self.has_more = false;
            return None;
        }
        self.loading_older = true;
        Some(offset)
    }

    /// Prepend an older page fetched at `offset`. Returns how many messages
    /// were added.
    pub fn apply_older_page(&mut self, offset: usize, page: MessagePage) -> usize {
        self.loading_older = false;
        if page.results.is_empty() {
            self.has_more = false;
            return 0;
        }

        let mut merged: Vec<MessageRecord> = {
            let known: HashSet<&str> = self.messages.iter().map(|m| m.id.as_str()).collect();
            page.results
                .into_iter()
                .filter(|m| !known.contains(m.id.as_str()))
                .collect()
        };
        let added = merged.len();
        merged.append(&mut self.messages);
        self.messages = merged;
        self.offset = offset;
        self.has_more = offset > 0;
        tracing::debug!(thread_id = self.thread_id, offset, added, "Prepended older page");
        added
    }

    /// Release the in-flight claim after a failed fetch so it can be retried.
    pub fn fail_older_page(&mut self) {
        self.loading_older = false;
    }

    /// Append a message delivered by the chat channel. Echoes of a message
    /// already present are ignored.
    pub fn push_live(&mut self, message: MessageRecord) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Mark own messages up to and including `message_id` as read by
    /// `reader_id`. Returns how many messages changed.
    pub fn apply_read_receipt(&mut self, message_id: &str, reader_id: UserId) -> usize {
        let cutoff = self
            .messages
            .iter()
            .position(|m| m.id == message_id)
            .or_else(|| {
                let target: u64 = message_id.parse().ok()?;
                self.messages
                    .iter()
                    .rposition(|m| m.id.parse::<u64>().is_ok_and(|id| id <= target))
            });
        let Some(cutoff) = cutoff else {
            return 0;
        };

        self.messages[..=cutoff]
            .iter_mut()
            .filter(|m| m.is_own)
            .map(|m| m.mark_read_by(reader_id))
            .filter(|changed| *changed)
            .count()
    }
}

/// Scroll trigger and position fix-up for a backward-paging list view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollAnchor {
    pub threshold_px: u32,
}

impl Default for ScrollAnchor {
    fn default() -> Self {
        Self { threshold_px: 50 }
    }
}

impl ScrollAnchor {
    /// True when the view is close enough to the top to fetch older messages.
    pub fn should_load(&self, scroll_top: f64, has_more: bool) -> bool {
        has_more && scroll_top <= f64::from(self.threshold_px)
    }

    /// Scroll position that keeps the same message in view after older
    /// content grew the list from `height_before` to `height_after`.
    pub fn restore(scroll_top: f64, height_before: f64, height_after: f64) -> f64 {
        scroll_top + (height_after - height_before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{message, messages, FakeApi};
    use pretty_assertions::assert_eq;

    fn ids(loader: &HistoryLoader) -> Vec<String> {
        loader.messages().iter().map(|m| m.id.clone()).collect()
    }

    #[test]
    fn offsets_follow_page_arithmetic() {
        assert_eq!(initial_offset(47, 20), 27);
        assert_eq!(initial_offset(15, 20), 0);
        assert_eq!(initial_offset(20, 20), 0);
        assert_eq!(previous_offset(27, 20), 7);
        assert_eq!(previous_offset(7, 20), 0);
        assert_eq!(previous_offset(0, 20), 0);
    }

    #[tokio::test]
    async fn large_thread_opens_at_last_page() {
        let api = FakeApi::default();
        api.set_thread(1, messages(47));

        let loader = HistoryLoader::open(&api, 1, 20).await.unwrap();

        assert_eq!(loader.offset(), 27);
        assert!(loader.has_more());
        assert_eq!(loader.messages().len(), 20);
        assert_eq!(loader.messages()[0].id, "27");
        assert_eq!(
            api.calls(),
            vec!["fetch_messages:1:0".to_string(), "fetch_messages:1:27".to_string()]
        );
    }

    #[tokio::test]
    async fn small_thread_uses_probe_page() {
        let api = FakeApi::default();
        api.set_thread(1, messages(15));

        let loader = HistoryLoader::open(&api, 1, 20).await.unwrap();

        assert_eq!(loader.offset(), 0);
        assert!(!loader.has_more());
        assert_eq!(loader.messages().len(), 15);
        assert_eq!(api.calls(), vec!["fetch_messages:1:0".to_string()]);
    }

    #[tokio::test]
    async fn backward_steps_until_exhausted() {
        let api = FakeApi::default();
        api.set_thread(1, messages(47));
        let mut loader = HistoryLoader::open(&api, 1, 20).await.unwrap();

        assert_eq!(loader.load_older(&api).await.unwrap(), 20);
        assert_eq!(loader.offset(), 7);
        assert!(loader.has_more());

        assert_eq!(loader.load_older(&api).await.unwrap(), 7);
        assert_eq!(loader.offset(), 0);
        assert!(!loader.has_more());

        assert_eq!(loader.load_older(&api).await.unwrap(), 0);
        assert_eq!(loader.offset(), 0);

        let expected: Vec<String> = (0..47).map(|id| id.to_string()).collect();
        assert_eq!(ids(&loader), expected);
        assert_eq!(api.calls_named("fetch_messages").len(), 4);
    }

    #[test]
    fn only_one_backward_fetch_in_flight() {
        let mut loader = HistoryLoader::new(1, 20);
        loader.apply_initial(InitialHistory {
            total: 47,
            offset: 27,
            messages: messages(47).split_off(27),
        });

        assert_eq!(loader.next_page_request(), Some(7));
        assert_eq!(loader.next_page_request(), None);
        loader.fail_older_page();
        assert_eq!(loader.next_page_request(), Some(7));
    }

    #[test]
    fn failed_initial_fetch_can_be_claimed_again() {
        let mut loader = HistoryLoader::new(1, 20);

        assert!(loader.claim_initial());
        assert!(!loader.claim_initial());
        assert_eq!(loader.next_page_request(), None);

        loader.fail_initial();
        assert!(!loader.is_loaded());
        assert!(loader.claim_initial());

        loader.apply_initial(InitialHistory {
            total: 47,
            offset: 27,
            messages: messages(47).split_off(27),
        });
        assert!(loader.is_loaded());
        assert!(!loader.claim_initial());
    }

    #[test]
    fn empty_older_page_ends_paging() {
        let mut loader = HistoryLoader::new(1, 20);
        loader.apply_initial(InitialHistory {
            total: 47,
            offset: 27,
            messages: Vec::new(),
        });
        let offset = loader.next_page_request().unwrap();

        assert_eq!(loader.apply_older_page(offset, MessagePage::default()), 0);

        assert!(!loader.has_more());
        assert_eq!(loader.offset(), 27);
    }

    #[test]
    fn live_messages_append_and_survive_initial_load() {
        let mut loader = HistoryLoader::new(1, 20);
        assert!(loader.push_live(message(100, false)));
        loader.apply_initial(InitialHistory {
            total: 2,
            offset: 0,
            messages: vec![message(1, true), message(2, false)],
        });
        assert!(loader.push_live(message(101, true)));
        assert!(!loader.push_live(message(101, true)));

        assert_eq!(ids(&loader), vec!["1", "2", "100", "101"]);
    }

    #[test]
    fn read_receipt_marks_own_messages_up_to_id() {
        let mut loader = HistoryLoader::new(1, 20);
        loader.apply_initial(InitialHistory {
            total: 4,
            offset: 0,
            messages: vec![
                message(1, true),
                message(2, false),
                message(3, true),
                message(4, true),
            ],
        });

        assert_eq!(loader.apply_read_receipt("3", 9), 2);
        assert_eq!(loader.apply_read_receipt("3", 9), 0);

        let read: Vec<bool> = loader
            .messages()
            .iter()
            .map(|m| m.read_by.contains(&9))
            .collect();
        assert_eq!(read, vec![true, false, true, false]);
    }

    #[test]
    fn read_receipt_for_unloaded_id_uses_numeric_order() {
        let mut loader = HistoryLoader::new(1, 20);
        loader.apply_initial(InitialHistory {
            total: 3,
            offset: 0,
            messages: vec![message(10, true), message(12, true), message(20, true)],
        });

        assert_eq!(loader.apply_read_receipt("15", 2), 2);
        assert_eq!(loader.apply_read_receipt("opaque", 2), 0);
    }

    #[test]
    fn scroll_anchor_threshold_and_restore() {
        let anchor = ScrollAnchor::default();
        assert!(anchor.should_load(10.0, true));
        assert!(!anchor.should_load(10.0, false));
        assert!(!anchor.should_load(400.0, true));
        assert!((ScrollAnchor::restore(5.0, 1_000.0, 1_600.0) - 605.0).abs() < f64::EPSILON);
    }
}
