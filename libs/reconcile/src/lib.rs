//! Pool reconciliation primitives.
//!
//! This library provides the pure parts of the warm pool control loop:
//!
//! - **Template version**: a content hash identifying the template an
//!   instance was built from.
//! - **Classification**: splitting a pool listing into current and outdated
//!   instances.
//! - **Capacity planning**: how many instances to add or retire in one pass.
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same inputs
//! - Classification partitions its input: every instance lands in exactly one
//!   side, in listing order
//! - Plans never exceed the per-cycle batch size and never go negative

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Template version tag attached to every pool instance.
///
/// Derived from the template's file tree so that any change to the template
/// produces a new version and marks existing instances as outdated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateVersion(String);

impl TemplateVersion {
    /// Wrap an externally supplied version tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Compute a version from `(relative path, contents)` pairs.
    ///
    /// Input order does not matter; entries are hashed sorted by path.
    pub fn from_files<I, P, B>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, B)>,
        P: AsRef<str>,
        B: AsRef<[u8]>,
    {
        let sorted: BTreeMap<String, B> = files
            .into_iter()
            .map(|(path, contents)| (path.as_ref().to_string(), contents))
            .collect();

        let mut hasher = Sha256::new();
        for (path, contents) in &sorted {
            let contents = contents.as_ref();
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update((contents.len() as u64).to_le_bytes());
            hasher.update(contents);
        }
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16]))) // First 16 bytes (128 bits)
    }

    /// Get the version string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TemplateVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classify instances against the desired template version.
///
/// Returns `(current, outdated)`, both preserving input order.
pub fn classify_instances<I, F>(
    instances: I,
    desired: &TemplateVersion,
    get_version: F,
) -> (Vec<I::Item>, Vec<I::Item>)
where
    I: IntoIterator,
    F: Fn(&I::Item) -> &TemplateVersion,
{
    let mut current = Vec::new();
    let mut outdated = Vec::new();

    for instance in instances {
        if get_version(&instance) == desired {
            current.push(instance);
        } else {
            outdated.push(instance);
        }
    }

    (current, outdated)
}

/// One listing of the pool, split by template version.
///
/// Lives for a single reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot<T> {
    /// Instances built from the current template, in listing order.
    pub current: Vec<T>,

    /// Instances built from any other template, in listing order.
    pub outdated: Vec<T>,
}

impl<T> PoolSnapshot<T> {
    /// Build a snapshot from a full pool listing.
    pub fn classify<F>(instances: Vec<T>, desired: &TemplateVersion, get_version: F) -> Self
    where
        F: Fn(&T) -> &TemplateVersion,
    {
        let (current, outdated) = classify_instances(instances, desired, get_version);
        Self { current, outdated }
    }

    /// Total number of instances in the listing.
    pub fn len(&self) -> usize {
        self.current.len() + self.outdated.len()
    }

    /// Returns true if the listing was empty.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.outdated.is_empty()
    }
}

/// Pool sizing limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Desired number of current-version instances.
    pub pool_size: usize,

    /// Maximum instances added or removed in one cycle.
    pub batch_size: usize,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// How many current-version instances to deploy this cycle.
pub fn additions_needed(current_count: usize, pool_size: usize, batch_size: usize) -> usize {
    pool_size.saturating_sub(current_count).min(batch_size)
}

/// How many outdated instances to retire this cycle.
pub fn removals_needed(outdated_count: usize, batch_size: usize) -> usize {
    outdated_count.min(batch_size)
}

/// Actions for one reconciliation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    /// Instances to deploy.
    pub additions: usize,

    /// Outdated instances to delete.
    pub removals: usize,
}

impl ReconcilePlan {
    /// Compute the plan for a snapshot.
    pub fn compute<T>(snapshot: &PoolSnapshot<T>, limits: PoolLimits) -> Self {
        Self {
            additions: additions_needed(
                snapshot.current.len(),
                limits.pool_size,
                limits.batch_size,
            ),
            removals: removals_needed(snapshot.outdated.len(), limits.batch_size),
        }
    }

    /// Returns true if the cycle has nothing to do.
    pub fn is_noop(&self) -> bool {
        self.additions == 0 && self.removals == 0
    }
}

/// Default target pool size.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Default per-cycle batch size.
pub const DEFAULT_BATCH_SIZE: usize = 2;

/// Default interval between reconciliation cycles.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn v(tag: &str) -> TemplateVersion {
        TemplateVersion::new(tag)
    }

    #[test]
    fn test_template_version_order_independent() {
        let a = TemplateVersion::from_files(vec![("a.txt", b"one".to_vec()), ("b.txt", b"two".to_vec())]);
        let b = TemplateVersion::from_files(vec![("b.txt", b"two".to_vec()), ("a.txt", b"one".to_vec())]);

        assert_eq!(a, b);
        assert!(a.as_str().starts_with("sha256:"));
        assert_eq!(a.as_str().len(), "sha256:".len() + 32);
    }

    #[test]
    fn test_template_version_content_sensitive() {
        let a = TemplateVersion::from_files(vec![("index.html", "hello")]);
        let b = TemplateVersion::from_files(vec![("index.html", "hello!")]);
        let c = TemplateVersion::from_files(vec![("index.htm", "hello")]);

        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_template_version_path_boundary() {
        // Moving bytes between path and contents must change the hash.
        let a = TemplateVersion::from_files(vec![("ab", "c")]);
        let b = TemplateVersion::from_files(vec![("a", "bc")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_template_version_serde_transparent() {
        let version = v("sha256:abc");
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, "\"sha256:abc\"");

        let parsed: TemplateVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, version);
    }

    #[test]
    fn test_classify_instances() {
        let desired = v("sha256:abc");
        let instances = vec![
            ("i1", v("sha256:abc")),
            ("i2", v("sha256:old")),
            ("i3", v("sha256:abc")),
            ("i4", v("sha256:older")),
        ];

        let (current, outdated) = classify_instances(instances, &desired, |(_, h)| h);

        assert_eq!(current.iter().map(|(id, _)| *id).collect::<Vec<_>>(), ["i1", "i3"]);
        assert_eq!(outdated.iter().map(|(id, _)| *id).collect::<Vec<_>>(), ["i2", "i4"]);
    }

    #[test]
    fn test_snapshot_empty() {
        let snapshot: PoolSnapshot<(u32, TemplateVersion)> =
            PoolSnapshot::classify(Vec::new(), &v("x"), |(_, h)| h);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.len(), 0);
        assert!(ReconcilePlan::compute(&snapshot, PoolLimits { pool_size: 0, batch_size: 2 }).is_noop());
    }

    #[rstest]
    #[case::below_target(3, 5, 2, 2)]
    #[case::one_short(4, 5, 2, 1)]
    #[case::at_target(5, 5, 2, 0)]
    #[case::above_target(6, 5, 2, 0)]
    #[case::empty_pool(0, 5, 10, 5)]
    #[case::zero_batch(0, 5, 0, 0)]
    fn test_additions_needed(
        #[case] current: usize,
        #[case] pool_size: usize,
        #[case] batch_size: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(additions_needed(current, pool_size, batch_size), expected);
    }

    #[rstest]
    #[case::fewer_than_batch(1, 2, 1)]
    #[case::none(0, 2, 0)]
    #[case::capped(7, 2, 2)]
    fn test_removals_needed(#[case] outdated: usize, #[case] batch_size: usize, #[case] expected: usize) {
        assert_eq!(removals_needed(outdated, batch_size), expected);
    }

    #[test]
    fn test_plan_compute() {
        let desired = v("new");
        let listing = vec![
            (1, v("new")),
            (2, v("old")),
            (3, v("new")),
            (4, v("new")),
        ];
        let snapshot = PoolSnapshot::classify(listing, &desired, |(_, h)| h);
        let plan = ReconcilePlan::compute(&snapshot, PoolLimits::default());

        assert_eq!(plan, ReconcilePlan { additions: 2, removals: 1 });
        // Same inputs, same plan.
        assert_eq!(plan, ReconcilePlan::compute(&snapshot, PoolLimits::default()));
    }

    proptest! {
        #[test]
        fn prop_classify_partitions(tags in proptest::collection::vec(0u8..4, 0..64)) {
            let desired = v("v0");
            let listing: Vec<(usize, TemplateVersion)> = tags
                .iter()
                .enumerate()
                .map(|(id, tag)| (id, v(&format!("v{tag}"))))
                .collect();

            let snapshot = PoolSnapshot::classify(listing.clone(), &desired, |(_, h)| h);

            prop_assert_eq!(snapshot.len(), listing.len());
            prop_assert!(snapshot.current.iter().all(|(_, h)| *h == desired));
            prop_assert!(snapshot.outdated.iter().all(|(_, h)| *h != desired));
            for (id, _) in &snapshot.current {
                prop_assert!(!snapshot.outdated.iter().any(|(other, _)| other == id));
            }
            // Listing order is preserved on both sides.
            prop_assert!(snapshot.current.windows(2).all(|w| w[0].0 < w[1].0));
            prop_assert!(snapshot.outdated.windows(2).all(|w| w[0].0 < w[1].0));
        }

        #[test]
        fn prop_additions_bounded(current in 0usize..100, pool_size in 0usize..100, batch_size in 0usize..20) {
            let n = additions_needed(current, pool_size, batch_size);
            prop_assert!(n <= batch_size);
            prop_assert!(n <= pool_size.saturating_sub(current));
            prop_assert_eq!(n, additions_needed(current, pool_size, batch_size));
        }

        #[test]
        fn prop_removals_bounded(outdated in 0usize..100, batch_size in 0usize..20) {
            let n = removals_needed(outdated, batch_size);
            prop_assert!(n <= batch_size);
            prop_assert!(n <= outdated);
        }
    }
}
