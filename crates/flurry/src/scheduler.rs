//! Generation-based fair scheduling of blobs across readers.
//!
//! Every registry entry carries a generation counter. Claiming a blob bumps
//! its generation, so the blob read least recently always has the lowest
//! value and is preferred next. After each claim the counters are rebased so
//! the smallest is zero, which keeps them bounded while preserving order.

use std::collections::HashMap;
use std::time::Duration;

use flurry_core::storage::BlobMeta;

use crate::registry::{Registry, RegistryItem};

/// A blob claimed for reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub path: String,
    /// Registry offset to resume from.
    pub offset: u64,
    /// Generation after the claim and normalization.
    pub generation: u32,
    /// Content length reported by the listing.
    pub content_length: u64,
}

/// Candidate rules beyond the unread-bytes check.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulePolicy {
    /// Claims older than this held by other readers are up for grabs.
    pub claim_timeout: Option<Duration>,
}

/// Pick the next blob for `reader`, mark it claimed and normalize generations.
///
/// `blobs` is the current listing; only blobs present there and in the
/// registry are considered. Returns `None` when nothing is available, in
/// which case the registry is left unchanged. The caller persists the
/// registry.
pub fn select_next(
    registry: &mut Registry,
    blobs: &[BlobMeta],
    reader: &str,
    now_secs: i64,
    policy: SchedulePolicy,
) -> Option<Claim> {
    let listed: HashMap<&str, &BlobMeta> = blobs.iter().map(|b| (b.path.as_str(), b)).collect();

    let (path, blob) = registry
        .iter()
        .filter_map(|(path, item)| {
            let blob = listed.get(path.as_str())?;
            is_candidate(item, blob, reader, now_secs, policy).then_some((item.generation, path, *blob))
        })
        .min_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)))
        .map(|(_, path, blob)| (path.clone(), blob.clone()))?;

    for item in registry.items_mut() {
        if item.file_path != path {
            item.release(reader);
        }
    }

    let item = registry.get_mut(&path)?;
    item.owner = Some(reader.to_string());
    item.claimed_at = Some(now_secs);
    item.etag = blob.etag.clone();
    item.generation = bump(item.generation);

    normalize(registry);

    let item = registry.get(&path)?;
    Some(Claim {
        path,
        offset: item.offset,
        generation: item.generation,
        content_length: blob.content_length,
    })
}

/// Whether `reader` may claim the blob behind `item`.
pub fn is_candidate(
    item: &RegistryItem,
    blob: &BlobMeta,
    reader: &str,
    now_secs: i64,
    policy: SchedulePolicy,
) -> bool {
    if item.offset >= blob.content_length {
        return false;
    }
    match item.owner.as_deref() {
        None => true,
        Some(owner) if owner == reader => true,
        Some(_) => policy.claim_timeout.is_some_and(|timeout| {
            item.claimed_at
                .is_none_or(|at| now_secs.saturating_sub(at) >= timeout.as_secs() as i64)
        }),
    }
}

/// Increment a generation, halving it instead when the increment would overflow.
pub fn bump(generation: u32) -> u32 {
    generation.checked_add(1).unwrap_or(generation / 2)
}

/// Rebase all generations so the minimum is zero.
///
/// Equivalent to decrementing every entry while the minimum is positive.
pub fn normalize(registry: &mut Registry) {
    let Some(min) = registry.min_generation() else {
        return;
    };
    if min == 0 {
        return;
    }
    for item in registry.items_mut() {
        item.generation -= min;
    }
}

/// Number of listed blobs with unread bytes.
pub fn pending_count(registry: &Registry, blobs: &[BlobMeta]) -> usize {
    blobs
        .iter()
        .filter(|blob| {
            registry
                .get(&blob.path)
                .is_some_and(|item| item.offset < blob.content_length)
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CreatePolicy;

    const NOW: i64 = 1_760_000_000;

    fn blob(path: &str, len: u64) -> BlobMeta {
        BlobMeta {
            path: path.to_string(),
            etag: String::new(),
            content_length: len,
        }
    }

    fn select(registry: &mut Registry, blobs: &[BlobMeta], reader: &str) -> Option<Claim> {
        select_next(registry, blobs, reader, NOW, SchedulePolicy::default())
    }

    #[test]
    fn test_two_readers_split_blobs() {
        let blobs = [blob("a.log", 4096), blob("b.log", 2048)];
        let mut registry = Registry::create(&blobs, CreatePolicy::StartOver);

        let first = select(&mut registry, &blobs, "R1").unwrap();
        assert_eq!(first.path, "a.log");
        assert_eq!(first.offset, 0);
        assert_eq!(first.generation, 1);
        assert_eq!(registry.get("b.log").unwrap().generation, 0);

        let second = select(&mut registry, &blobs, "R2").unwrap();
        assert_eq!(second.path, "b.log");
        assert_eq!(registry.get("a.log").unwrap().owner.as_deref(), Some("R1"));
        assert_eq!(registry.get("b.log").unwrap().owner.as_deref(), Some("R2"));

        // Both now at generation 1, so normalization rebased them to 0.
        assert_eq!(registry.min_generation(), Some(0));
        assert_eq!(registry.get("a.log").unwrap().generation, 0);
    }

    #[test]
    fn test_fully_read_blobs_are_not_candidates() {
        let blobs = [blob("a.log", 100)];
        let mut registry = Registry::create(&blobs, CreatePolicy::Resume);

        assert!(select(&mut registry, &blobs, "R1").is_none());

        let grown = [blob("a.log", 150)];
        let claim = select(&mut registry, &grown, "R1").unwrap();
        assert_eq!(claim.offset, 100);
        assert_eq!(claim.content_length, 150);
    }

    #[test]
    fn test_reader_resumes_own_claim_but_not_others() {
        let blobs = [blob("a.log", 10)];
        let mut registry = Registry::create(&blobs, CreatePolicy::StartOver);

        assert!(select(&mut registry, &blobs, "R1").is_some());
        assert!(select(&mut registry, &blobs, "R2").is_none());
        assert_eq!(select(&mut registry, &blobs, "R1").unwrap().path, "a.log");
    }

    #[test]
    fn test_claim_releases_other_claims_of_same_reader() {
        let blobs = [blob("a.log", 10), blob("b.log", 10)];
        let mut registry = Registry::create(&blobs, CreatePolicy::StartOver);

        select(&mut registry, &blobs, "R1").unwrap();
        let second = select(&mut registry, &blobs, "R1").unwrap();

        assert_eq!(second.path, "b.log");
        assert!(registry.get("a.log").unwrap().owner.is_none());
        assert_eq!(registry.owned_by("R1").count(), 1);
    }

    #[test]
    fn test_unlisted_entries_are_skipped() {
        let mut registry = Registry::create(&[blob("gone.log", 10)], CreatePolicy::StartOver);
        assert!(select(&mut registry, &[], "R1").is_none());
    }

    #[test]
    fn test_lowest_generation_wins_ties_by_path() {
        let blobs = [blob("c.log", 1), blob("b.log", 1), blob("a.log", 1)];
        let mut registry = Registry::create(&blobs, CreatePolicy::StartOver);
        registry.get_mut("a.log").unwrap().generation = 2;

        assert_eq!(select(&mut registry, &blobs, "R1").unwrap().path, "b.log");
    }

    #[test]
    fn test_stale_claims_reclaimed_only_when_enabled() {
        let blobs = [blob("a.log", 10)];
        let mut registry = Registry::create(&blobs, CreatePolicy::StartOver);
        let item = registry.get_mut("a.log").unwrap();
        item.owner = Some("crashed".to_string());
        item.claimed_at = Some(NOW - 3600);

        assert!(select(&mut registry, &blobs, "R1").is_none());

        let policy = SchedulePolicy {
            claim_timeout: Some(Duration::from_secs(600)),
        };
        let claim = select_next(&mut registry, &blobs, "R1", NOW, policy).unwrap();
        assert_eq!(claim.path, "a.log");
        assert_eq!(registry.get("a.log").unwrap().owner.as_deref(), Some("R1"));

        // A fresh claim is respected even with the timeout enabled.
        assert!(select_next(&mut registry, &blobs, "R2", NOW + 10, policy).is_none());
    }

    #[test]
    fn test_bump_halves_on_overflow() {
        assert_eq!(bump(0), 1);
        assert_eq!(bump(u32::MAX - 1), u32::MAX);
        assert_eq!(bump(u32::MAX), u32::MAX / 2);
    }

    #[test]
    fn test_normalize_rebases_to_zero() {
        let blobs = [blob("a", 1), blob("b", 1), blob("c", 1)];
        let mut registry = Registry::create(&blobs, CreatePolicy::StartOver);
        registry.get_mut("a").unwrap().generation = 3;
        registry.get_mut("b").unwrap().generation = 5;
        registry.get_mut("c").unwrap().generation = 4;

        normalize(&mut registry);

        assert_eq!(registry.get("a").unwrap().generation, 0);
        assert_eq!(registry.get("b").unwrap().generation, 2);
        assert_eq!(registry.get("c").unwrap().generation, 1);
    }

    #[test]
    fn test_no_starvation_across_many_readers() {
        let blobs: Vec<_> = (0..7).map(|i| blob(&format!("blob-{i}"), 1)).collect();
        let readers: Vec<_> = (0..3).map(|i| format!("R{i}")).collect();
        let mut registry = Registry::create(&blobs, CreatePolicy::StartOver);
        let mut selected = std::collections::HashSet::new();

        for round in 0..10 {
            for reader in &readers {
                if let Some(claim) = select(&mut registry, &blobs, reader) {
                    selected.insert(claim.path.clone());
                    // Simulate a chunk that is not the end, keeping the claim
                    // on odd rounds and releasing it on even ones.
                    if round % 2 == 0 {
                        registry.get_mut(&claim.path).unwrap().release(reader);
                    }
                }
                assert_eq!(registry.min_generation(), Some(0));
            }
        }

        assert_eq!(selected.len(), blobs.len());
    }

    #[test]
    fn test_pending_count() {
        let blobs = [blob("a", 10), blob("b", 5)];
        let mut registry = Registry::create(&blobs, CreatePolicy::StartOver);
        registry.get_mut("b").unwrap().offset = 5;
        assert_eq!(pending_count(&registry, &blobs), 1);
    }
}
