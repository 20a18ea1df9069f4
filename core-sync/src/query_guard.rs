//! Query generations
//!
//! A caller that replaces a data source (new filter, new sort, other album)
//! starts a new generation. Starting one cancels the previous generation's
//! token, and a result published under a stale ticket is dropped, so an old
//! in-flight query can never overwrite state owned by a newer one.

use std::sync::{Arc, Mutex};

use core_async::sync::{watch, CancellationToken};
use core_library::models::{AlbumSelector, MediaRecord};
use core_library::repositories::{MediaRepository, Page, PageRequest};
use tracing::debug;

use crate::error::{Result, SyncError};

/// Handle for one query generation.
#[derive(Debug, Clone)]
pub struct QueryTicket {
    generation: u64,
    cancel: CancellationToken,
}

impl QueryTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug)]
struct Current {
    generation: u64,
    cancel: CancellationToken,
}

/// Latest-wins slot for query results, observed through a `watch` channel.
pub struct QueryGenerations<T> {
    current: Mutex<Current>,
    tx: watch::Sender<Option<T>>,
}

impl<T> QueryGenerations<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            current: Mutex::new(Current {
                generation: 0,
                cancel: CancellationToken::new(),
            }),
            tx,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Current> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancel the running generation and start a new one.
    pub fn begin(&self) -> QueryTicket {
        let mut current = self.lock();
        current.cancel.cancel();
        current.generation += 1;
        current.cancel = CancellationToken::new();
        QueryTicket {
            generation: current.generation,
            cancel: current.cancel.clone(),
        }
    }

    /// Publish a result. Returns `false` when the ticket is stale.
    pub fn publish(&self, ticket: &QueryTicket, value: T) -> bool {
        let current = self.lock();
        if ticket.generation != current.generation || ticket.cancel.is_cancelled() {
            debug!(
                stale = ticket.generation,
                current = current.generation,
                "Dropping stale query result"
            );
            return false;
        }
        self.tx.send_replace(Some(value));
        true
    }

    /// Cancel whatever is running without starting anything new.
    pub fn cancel(&self) {
        self.lock().cancel.cancel();
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.tx.subscribe()
    }
}

impl<T: Clone> QueryGenerations<T> {
    pub fn latest(&self) -> Option<T> {
        self.tx.borrow().clone()
    }
}

impl<T> Default for QueryGenerations<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Paged album contents read from the local index with latest-wins
/// semantics.
pub struct AlbumFeed {
    media: Arc<dyn MediaRepository>,
    generations: QueryGenerations<(AlbumSelector, Page<MediaRecord>)>,
}

impl AlbumFeed {
    pub fn new(media: Arc<dyn MediaRepository>) -> Self {
        Self {
            media,
            generations: QueryGenerations::new(),
        }
    }

    /// Load a page of `album`, superseding any load still in flight.
    pub async fn load(&self, album: AlbumSelector, page: PageRequest) -> Result<bool> {
        let ticket = self.generations.begin();
        let result = self.media.query_by_album(&album, page).await?;
        if ticket.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(self.generations.publish(&ticket, (album, result)))
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<(AlbumSelector, Page<MediaRecord>)>> {
        self.generations.subscribe()
    }

    pub fn latest(&self) -> Option<(AlbumSelector, Page<MediaRecord>)> {
        self.generations.latest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::create_test_pool;
    use core_library::repositories::SqliteMediaRepository;

    #[test]
    fn test_new_generation_cancels_previous() {
        let generations = QueryGenerations::<u32>::new();
        let first = generations.begin();
        let second = generations.begin();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(second.generation(), 2);
    }

    #[test]
    fn test_stale_results_are_dropped() {
        let generations = QueryGenerations::<&str>::new();
        let rx = generations.subscribe();
        let old = generations.begin();
        let new = generations.begin();

        assert!(generations.publish(&new, "fresh"));
        assert!(!generations.publish(&old, "stale"));
        assert_eq!(*rx.borrow(), Some("fresh"));
    }

    #[test]
    fn test_cancel_blocks_publish() {
        let generations = QueryGenerations::<u8>::new();
        let ticket = generations.begin();
        generations.cancel();
        assert!(!generations.publish(&ticket, 1));
        assert_eq!(generations.latest(), None);
    }

    #[core_async::test]
    async fn test_album_feed_publishes_latest_album() {
        let pool = create_test_pool().await.unwrap();
        let media = Arc::new(SqliteMediaRepository::new(pool));
        media
            .upsert_chunk(&[
                MediaRecord::new(1, "/DCIM/a.jpg", "image/jpeg"),
                MediaRecord::new(2, "/Pictures/b.jpg", "image/jpeg"),
            ])
            .await
            .unwrap();

        let feed = AlbumFeed::new(media);
        let dcim = AlbumSelector::Folder("/DCIM".into());
        assert!(feed.load(dcim.clone(), PageRequest::default()).await.unwrap());

        let (album, page) = feed.latest().unwrap();
        assert_eq!(album, dcim);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, 1);
    }
}
