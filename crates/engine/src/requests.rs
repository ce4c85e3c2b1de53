//! Latest-wins cover requests for consumers that come and go.
//!
//! Each consumer owns a slot. Requesting a cover for a slot cancels whatever
//! the slot asked for before; results are delivered to the control thread
//! through [`CoverRequests::poll`] and anything that is not the slot's newest
//! request is dropped there.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use tracing::debug;

use crate::cache::{CacheEntry, ThumbnailCache};
use crate::cover::CoverSubject;
use crate::error::Result;
use crate::worker::{CancellationToken, WorkerPool};

#[derive(Debug, Clone)]
pub enum CoverState {
    Ready(Arc<CacheEntry>),
    /// Placeholder: nothing found, undecodable, or extraction failed.
    Missing,
}

#[derive(Debug, Clone)]
pub struct CoverUpdate<S> {
    pub slot: S,
    pub key: String,
    pub state: CoverState,
}

struct Pending {
    ticket: u64,
    cancel: CancellationToken,
}

struct Completion<S> {
    slot: S,
    ticket: u64,
    key: String,
    result: Result<Option<Arc<CacheEntry>>>,
}

pub struct CoverRequests<S> {
    cache: Arc<ThumbnailCache>,
    pool: Arc<WorkerPool>,
    sender: mpsc::Sender<Completion<S>>,
    receiver: mpsc::Receiver<Completion<S>>,
    pending: HashMap<S, Pending>,
    next_ticket: u64,
}

impl<S> CoverRequests<S>
where
    S: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(cache: Arc<ThumbnailCache>, pool: Arc<WorkerPool>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            cache,
            pool,
            sender,
            receiver,
            pending: HashMap::new(),
            next_ticket: 0,
        }
    }

    /// Asks for the cover of `subject` on behalf of `slot`, superseding the
    /// slot's previous request.
    pub fn request(&mut self, slot: S, subject: CoverSubject) {
        self.release(&slot);
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let cancel = CancellationToken::new();
        self.pending.insert(
            slot.clone(),
            Pending {
                ticket,
                cancel: cancel.clone(),
            },
        );

        let cache = Arc::clone(&self.cache);
        let sender = self.sender.clone();
        self.pool.spawn(move || {
            let result = cache.get(&subject, &cancel);
            if sender
                .send(Completion {
                    slot,
                    ticket,
                    key: subject.cache_key(),
                    result,
                })
                .is_err()
            {
                debug!(ticket, "cover requests dropped before completion");
            }
        });
    }

    /// The consumer went away: cancel its work and forget the slot.
    pub fn release(&mut self, slot: &S) {
        if let Some(pending) = self.pending.remove(slot) {
            pending.cancel.cancel();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Applies every completion that has arrived, newest-request-only.
    pub fn poll(&mut self) -> Vec<CoverUpdate<S>> {
        let mut updates = Vec::new();
        while let Ok(completion) = self.receiver.try_recv() {
            if let Some(update) = self.accept(completion) {
                updates.push(update);
            }
        }
        updates
    }

    /// Like [`poll`](Self::poll) but blocks up to `timeout` for the first
    /// completion when nothing has arrived yet.
    pub fn wait(&mut self, timeout: Duration) -> Vec<CoverUpdate<S>> {
        let mut updates = Vec::new();
        if let Ok(completion) = self.receiver.recv_timeout(timeout)
            && let Some(update) = self.accept(completion)
        {
            updates.push(update);
        }
        updates.extend(self.poll());
        updates
    }

    fn accept(&mut self, completion: Completion<S>) -> Option<CoverUpdate<S>> {
        let current = self.pending.get(&completion.slot)?;
        if current.ticket != completion.ticket {
            debug!(key = %completion.key, "dropping superseded cover result");
            return None;
        }
        self.pending.remove(&completion.slot);
        let state = match completion.result {
            Ok(Some(entry)) => CoverState::Ready(entry),
            Ok(None) => CoverState::Missing,
            Err(err) if err.is_cancelled() => return None,
            Err(_) => CoverState::Missing,
        };
        Some(CoverUpdate {
            slot: completion.slot,
            key: completion.key,
            state,
        })
    }
}

impl<S> Drop for CoverRequests<S> {
    fn drop(&mut self) {
        for pending in self.pending.values() {
            pending.cancel.cancel();
        }
    }
}
