use std::collections::VecDeque;

use jobmesh_core::CapabilitySet;
use jobmesh_jobs::Job;

use super::{JobStore, PendingCursor};
use crate::error::StoreError;

/// Lazy, restartable walk over pending jobs, oldest first.
///
/// Pages are fetched on demand. The cursor only advances past jobs already
/// handed out, so a scan can be dropped and resumed from [`cursor`]
/// (e.g. after an infrastructure fault) without skipping anything.
///
/// [`cursor`]: PendingScan::cursor
pub struct PendingScan<'a> {
    store: &'a dyn JobStore,
    requirement: Option<CapabilitySet>,
    page_size: usize,
    cursor: Option<PendingCursor>,
    buffer: VecDeque<Job>,
    exhausted: bool,
}

impl<'a> PendingScan<'a> {
    pub fn new(
        store: &'a dyn JobStore,
        requirement: Option<CapabilitySet>,
        page_size: usize,
    ) -> Self {
        Self::resume(store, requirement, page_size, None)
    }

    pub fn resume(
        store: &'a dyn JobStore,
        requirement: Option<CapabilitySet>,
        page_size: usize,
        cursor: Option<PendingCursor>,
    ) -> Self {
        Self {
            store,
            requirement,
            page_size: page_size.max(1),
            cursor,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<Job>, StoreError> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .store
                .pending_page(self.requirement.as_ref(), self.fetch_after(), self.page_size)
                .await?;
            if page.len() < self.page_size {
                self.exhausted = true;
            }
            self.buffer.extend(page);
        }

        let job = self.buffer.pop_front();
        if let Some(job) = &job {
            self.cursor = Some(PendingCursor::of(job));
        }
        Ok(job)
    }

    /// Position after the last job returned by [`next`](Self::next).
    pub fn cursor(&self) -> Option<PendingCursor> {
        self.cursor
    }

    fn fetch_after(&self) -> Option<PendingCursor> {
        self.buffer.back().map(PendingCursor::of).or(self.cursor)
    }
}
