//! Property tests for backoff timing, deduplication and comment cleaning.

use std::collections::HashSet;
use std::time::Duration;

use proptest::prelude::*;
use tiktok_scraper::capture::backoff::apply_jitter;
use tiktok_scraper::capture::filter::clean_comment_text;
use tiktok_scraper::capture::{Deduplicator, Fingerprint, next_delay};
use tokio::time::Instant;

proptest! {
    #[test]
    fn proptest_next_delay_is_monotonic_and_capped(
        baseline in 1u64..120,
        cap_factor in 1u64..200,
        failures in 0u32..64,
    ) {
        let baseline = Duration::from_secs(baseline);
        let cap = baseline * cap_factor as u32;

        let current = next_delay(failures, baseline, cap);
        let next = next_delay(failures + 1, baseline, cap);
        prop_assert!(current >= baseline.min(cap));
        prop_assert!(current <= cap);
        prop_assert!(next >= current);
        if current < cap {
            prop_assert!(next > current);
        }
    }

    #[test]
    fn proptest_jitter_stays_in_band(
        secs in 1u64..3600,
        jitter in 0.0f64..0.99,
    ) {
        let delay = Duration::from_secs(secs);
        let jittered = apply_jitter(delay, jitter);
        let low = delay.mul_f64(1.0 - jitter);
        let high = delay.mul_f64(1.0 + jitter);
        // Allow for float rounding at the band edges.
        prop_assert!(jittered + Duration::from_millis(1) >= low);
        prop_assert!(jittered <= high + Duration::from_millis(1));
    }

    #[test]
    fn proptest_written_equals_distinct(
        comments in proptest::collection::vec(("[a-c]", "[x-z]{1,2}"), 0..200),
    ) {
        let distinct: HashSet<_> = comments.iter().collect();
        // Capacity covers every distinct pair, so nothing is evicted early.
        let mut dedup = Deduplicator::new(distinct.len().max(1), None);
        let now = Instant::now();

        let written = comments
            .iter()
            .filter(|(author, text)| dedup.offer_fingerprint(Fingerprint::of(author, text), now))
            .count();

        prop_assert_eq!(written, distinct.len());
        prop_assert_eq!(dedup.len(), distinct.len());
    }

    #[test]
    fn proptest_cleaned_text_is_single_line(text in "[a-z \r\n\t]{0,80}") {
        let cleaned = clean_comment_text(&text);
        prop_assert!(!cleaned.contains('\n'));
        prop_assert!(!cleaned.contains('\r'));
        prop_assert_eq!(cleaned.trim(), cleaned.as_str());
    }
}
