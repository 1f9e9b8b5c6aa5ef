//! Property-based testing for Backchain
//!
//! Uses proptest to verify invariants of the differ, the `.index` codec and
//! the archive chain across randomly generated inputs.

use ::backchain::diff::{changed_files, missing_files, SnapshotDiff};
use ::backchain::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const ROOT: &str = "/data";

/// Relative file paths of one to three components
fn rel_path_strategy() -> impl Strategy<Value = PathBuf> {
    prop::collection::vec("[a-z]{1,6}", 1..=3).prop_map(|parts| parts.iter().collect())
}

fn digest_strategy() -> impl Strategy<Value = String> {
    "[0-9a-f]{8}"
}

/// A snapshot rooted at `/data`; directories are derived from the files
fn snapshot_strategy() -> impl Strategy<Value = Snapshot> {
    (
        prop::collection::btree_map(rel_path_strategy(), digest_strategy(), 0..12),
        prop::collection::vec("\\*[a-z]{1,4}\\*", 0..3),
        any::<bool>(),
    )
        .prop_map(|(files, exclusions, surrogate)| {
            let root = PathBuf::from(ROOT);
            let files: BTreeMap<PathBuf, String> =
                files.into_iter().map(|(rel, d)| (root.join(rel), d)).collect();
            let dirs: BTreeSet<PathBuf> = files
                .keys()
                .filter_map(|p| p.parent())
                .map(PathBuf::from)
                .collect();
            let mode = if surrogate {
                DigestMode::Surrogate
            } else {
                DigestMode::Content
            };
            Snapshot::new(root, dirs, files, exclusions, mode)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_index_round_trip(snapshot in snapshot_strategy()) {
        let text = index::serialize(&snapshot);
        let parsed = index::deserialize(&text).unwrap();
        prop_assert_eq!(parsed, snapshot);
    }

    #[test]
    fn prop_snapshot_unchanged_against_itself(snapshot in snapshot_strategy()) {
        prop_assert!(changed_files(&snapshot, Some(&snapshot)).is_empty());
        prop_assert!(missing_files(&snapshot, Some(&snapshot)).is_empty());
        prop_assert!(!SnapshotDiff::between(&snapshot, Some(&snapshot)).has_changes());
    }

    #[test]
    fn prop_first_backup_stores_everything(snapshot in snapshot_strategy()) {
        prop_assert_eq!(changed_files(&snapshot, None).len(), snapshot.file_count());
        prop_assert!(missing_files(&snapshot, None).is_empty());
    }

    #[test]
    fn prop_diff_partitions_both_snapshots(old in snapshot_strategy(), new in snapshot_strategy()) {
        let diff = SnapshotDiff::between(&new, Some(&old));

        // Every file of `new` is either changed or carries the old digest
        for (path, digest) in new.files() {
            let changed = diff.added.contains(path) || diff.modified.contains(path);
            prop_assert_eq!(changed, old.digest_of(path) != Some(digest.as_str()));
        }
        // Every file of `old` is either still present or missing
        for path in old.files().keys() {
            prop_assert_eq!(diff.missing.contains(path), new.digest_of(path).is_none());
        }
        for path in &diff.added {
            prop_assert!(old.digest_of(path).is_none());
        }
    }
}

/// Which of four files change in each backup run
fn schedule_strategy() -> impl Strategy<Value = Vec<[bool; 4]>> {
    prop::collection::vec(any::<[bool; 4]>(), 1..6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_each_version_stored_once(schedule in schedule_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();

        let backchain = Backchain::builder().case_insensitive(false).build();
        let pair = DirectoryPair::new(src.clone(), dst.clone());

        let mut edits = [0usize; 4];
        let mut expected_versions = [0usize; 4];
        for (run, changes) in schedule.iter().enumerate() {
            for (i, change) in changes.iter().enumerate() {
                if run == 0 || *change {
                    edits[i] += 1;
                    expected_versions[i] += 1;
                    fs::write(src.join(format!("f{}", i)), format!("{}:{}", i, edits[i])).unwrap();
                }
            }
            backchain.backup_at(&pair, &format!("{:04}", run + 1)).unwrap();
        }

        let chain = archive::load_chain(&dst).unwrap();
        for i in 0..4 {
            let name = format!("f{}", i);
            let member = paths::MemberName::from_path(&src.join(&name)).member;
            let stored_in = chain
                .iter()
                .filter(|b| b.members().unwrap().contains(&member))
                .count();
            prop_assert_eq!(stored_in, expected_versions[i]);

            let matches = backchain.search(&dst, std::path::Path::new(&name), false).unwrap();
            prop_assert_eq!(matches.files.len(), expected_versions[i]);
        }
    }
}
