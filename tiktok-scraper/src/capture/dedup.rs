//! Per-streamer comment deduplication.
//!
//! Fingerprints are kept in a capacity-bounded LRU. With a window configured, a
//! fingerprint only suppresses repeats until the window since its acceptance elapses.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use md5::{Digest, Md5};
use tiktok_live::CommentEvent;
use tokio::time::Instant;
use unicode_normalization::UnicodeNormalization;

/// Dedup key for a comment: MD5 of the normalised author and text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn of(author: &str, text: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(normalize(author).as_bytes());
        hasher.update(b"|");
        hasher.update(normalize(text).as_bytes());

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }

    pub fn of_event(event: &CommentEvent) -> Self {
        Self::of(&event.author, &event.text)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// NFC, trimmed, internal whitespace runs collapsed to one space.
fn normalize(text: &str) -> String {
    let nfc: String = text.nfc().collect();
    nfc.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Least-recently-seen fingerprint set with an optional time window.
pub struct Deduplicator {
    seen: LruCache<Fingerprint, Instant>,
    window: Option<Duration>,
}

impl Deduplicator {
    /// `capacity` of zero is treated as one.
    pub fn new(capacity: usize, window: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: LruCache::new(capacity),
            window,
        }
    }

    /// Offer a comment; returns `true` if it is new and should be written.
    pub fn offer(&mut self, event: &CommentEvent) -> bool {
        self.offer_fingerprint(Fingerprint::of_event(event), Instant::now())
    }

    /// Offer a fingerprint observed at `now`.
    pub fn offer_fingerprint(&mut self, fingerprint: Fingerprint, now: Instant) -> bool {
        // `get` also marks the entry as most recently seen.
        if let Some(&accepted_at) = self.seen.get(&fingerprint) {
            let within_window = match self.window {
                None => true,
                Some(window) => now.saturating_duration_since(accepted_at) < window,
            };
            if within_window {
                return false;
            }
        }

        self.seen.put(fingerprint, now);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
