//! End-to-end backup and restore scenarios
//!
//! Every test builds a small source tree in a temporary directory, backs it up
//! one or more times and then inspects or restores from the resulting chain.

use ::backchain::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Test harness owning a source tree and its destination
pub struct ChainHarness {
    pub temp_dir: TempDir,
    pub backchain: Backchain,
    pub pairs: Vec<DirectoryPair>,
    serial: u32,
}

impl ChainHarness {
    /// Two pairs: `src/one` and `src/six seven`
    pub fn new() -> Self {
        Self::with_builder(Backchain::builder())
    }

    pub fn with_builder(builder: BackchainBuilder) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");

        fs::create_dir_all(src.join("one/four")).unwrap();
        fs::create_dir_all(src.join("one/empty")).unwrap();
        fs::create_dir_all(src.join("six seven")).unwrap();
        fs::write(src.join("one/two"), "two\n").unwrap();
        fs::write(src.join("one/three"), "three\n").unwrap();
        fs::write(src.join("one/four/five"), "some text\n").unwrap();
        fs::write(src.join("six seven/eight"), "eight\n").unwrap();

        let pairs = vec![
            DirectoryPair::new(src.join("one"), dst.join("one")),
            DirectoryPair::new(src.join("six seven"), dst.join("six seven")),
        ];

        Self {
            temp_dir,
            backchain: builder.case_insensitive(false).build(),
            pairs,
            serial: 0,
        }
    }

    pub fn src(&self, rel: &str) -> PathBuf {
        self.temp_dir.path().join("src").join(rel)
    }

    pub fn alt_root(&self) -> PathBuf {
        self.temp_dir.path().join("alt")
    }

    /// Back up every pair with the next serial timestamp
    pub fn backup(&mut self) -> Vec<BackupOutcome> {
        self.serial += 1;
        let timestamp = format!("{:04}", self.serial);
        self.pairs
            .iter()
            .map(|pair| self.backchain.backup_at(pair, &timestamp).unwrap())
            .collect()
    }

    pub fn archive_count(&self, pair: usize) -> usize {
        list_backups(&self.pairs[pair].destination, false).unwrap().len()
    }

    pub fn restore(&self, names: &[&str], index: Option<usize>) -> Result<RestoreReport> {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        self.backchain.restore(&self.pairs, &names, index, None)
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.src(rel)).unwrap()
    }

    pub fn append(&self, rel: &str, text: &str) {
        let current = fs::read_to_string(self.src(rel)).unwrap_or_default();
        fs::write(self.src(rel), current + text).unwrap();
    }
}

#[test]
fn test_scenario_first_backup_and_repeat() {
    let mut harness = ChainHarness::new();

    let outcomes = harness.backup();
    assert!(outcomes.iter().all(|o| o.status == BackupStatus::Written));
    assert_eq!(harness.archive_count(0), 1);
    assert_eq!(harness.archive_count(1), 1);

    let outcomes = harness.backup();
    assert!(outcomes.iter().all(|o| o.status == BackupStatus::NoChanges));
    assert!(outcomes.iter().all(|o| o.archive.is_none()));
    assert_eq!(harness.archive_count(0), 1);
    assert_eq!(harness.archive_count(1), 1);
}

#[test]
fn test_touch_without_edit_is_not_a_change() {
    let mut harness = ChainHarness::new();
    harness.backup();

    let touched = harness.src("one/two");
    filetime::set_file_mtime(&touched, filetime::FileTime::from_unix_time(1_000_000_000, 0)).unwrap();

    // Local files are compared by content digest, so only the mtime moved
    let outcomes = harness.backup();
    assert_eq!(outcomes[0].status, BackupStatus::NoChanges);
    assert_eq!(harness.archive_count(0), 1);
}

#[test]
fn test_scenario_restore_single_differing_version() {
    let mut harness = ChainHarness::new();
    harness.backup();
    harness.append("one/four/five", "some more text\n");
    harness.backup();
    assert_eq!(harness.archive_count(0), 2);

    // Newest archive matches the file on disk, so only the older one differs
    let report = harness.restore(&["five"], None).unwrap();
    assert_eq!(report.files_restored, 1);
    assert_eq!(harness.read("one/four/five"), "some text\n");
}

#[test]
fn test_scenario_restore_all_after_deletion() {
    let mut harness = ChainHarness::new();
    harness.backup();
    harness.append("one/four/five", "some more text\n");
    harness.backup();

    fs::remove_file(harness.src("one/four/five")).unwrap();
    let outcomes = harness.backup();
    assert_eq!(outcomes[0].status, BackupStatus::DeletionsOnlyDiscarded);
    assert_eq!(outcomes[0].files_missing, 1);
    assert_eq!(harness.archive_count(0), 2);

    let report = harness.backchain.restore_all(&harness.pairs, None).unwrap();
    assert_eq!(report.files_restored, 1);
    assert_eq!(harness.read("one/four/five"), "some text\nsome more text\n");
}

#[test]
fn test_scenario_distinct_versions_in_long_chain() {
    let mut harness = ChainHarness::new();
    for i in 1..=6 {
        if i % 2 == 1 {
            fs::write(harness.src("one/four/five"), format!("edit {}\n", i)).unwrap();
        }
        // keep every run producing an archive
        fs::write(harness.src("one/two"), format!("tick {}\n", i)).unwrap();
        harness.backup();
    }
    assert_eq!(harness.archive_count(0), 6);

    let matches = harness
        .backchain
        .search(&harness.pairs[0].destination, Path::new("five"), false)
        .unwrap();
    let stamps: Vec<&str> = matches.files.iter().map(|b| b.timestamp.as_str()).collect();
    info!("versions held by {:?}", stamps);
    assert_eq!(stamps, vec!["0005", "0003", "0001"]);
    assert!(matches.folders.is_empty());
}

#[test]
fn test_round_trip_to_alternate_root() {
    let mut harness = ChainHarness::new();
    harness.backup();
    let alt = harness.alt_root();

    let report = harness
        .backchain
        .restore_all(&harness.pairs, Some(alt.as_path()))
        .unwrap();
    assert_eq!(report.files_restored, 4);

    for rel in ["one/two", "one/three", "one/four/five", "six seven/eight"] {
        let original = harness.src(rel);
        let restored = paths::relocate(&original, Some(&alt));
        assert_eq!(fs::read(&restored).unwrap(), fs::read(&original).unwrap());
        assert_eq!(
            utils::hash_file_content(&restored).unwrap(),
            utils::hash_file_content(&original).unwrap()
        );
    }
    assert!(paths::relocate(&harness.src("one/empty"), Some(&alt)).is_dir());
}

#[test]
fn test_restore_is_idempotent() {
    let mut harness = ChainHarness::new();
    harness.backup();
    fs::remove_file(harness.src("one/two")).unwrap();

    let first = harness.restore(&["two"], None).unwrap();
    assert_eq!(first.files_restored, 1);
    let second = harness.restore(&["two"], None).unwrap();
    assert_eq!(second.files_restored, 0);
    assert_eq!(second.files_unchanged, 1);
}

#[test]
fn test_unchanged_file_stored_once() {
    let mut harness = ChainHarness::new();
    for i in 0..4 {
        fs::write(harness.src("one/two"), format!("{}\n", i)).unwrap();
        harness.backup();
    }

    let member = paths::MemberName::from_path(&harness.src("one/three")).member;
    let holders: Vec<String> = list_backups(&harness.pairs[0].destination, false)
        .unwrap()
        .into_iter()
        .filter(|name| {
            read_backup(&harness.pairs[0].destination.join(name))
                .members()
                .unwrap()
                .contains(&member)
        })
        .collect();
    assert_eq!(holders, vec!["0001_backup.tar.gz".to_string()]);

    // Every later archive still lists it in its index
    for backup in archive::load_chain(&harness.pairs[0].destination).unwrap() {
        assert!(backup.snapshot.digest_of(&harness.src("one/three")).is_some());
    }
}

#[test]
fn test_soft_deletion_keeps_old_bytes() {
    let mut harness = ChainHarness::with_builder(Backchain::builder().record_deletions(true));
    harness.backup();

    fs::remove_file(harness.src("one/three")).unwrap();
    let outcomes = harness.backup();
    assert_eq!(outcomes[0].status, BackupStatus::Written);
    assert_eq!(outcomes[0].files_added, 0);

    let latest = archive::latest_backup(&harness.pairs[0].destination)
        .unwrap()
        .unwrap();
    assert!(latest.snapshot.digest_of(&harness.src("one/three")).is_none());

    // Not part of the newest tree any more
    let report = harness.backchain.restore_all(&harness.pairs, None).unwrap();
    assert_eq!(report.files_restored, 0);
    assert!(!harness.src("one/three").exists());

    // But still reachable by name
    let report = harness.restore(&["three"], None).unwrap();
    assert_eq!(report.files_restored, 1);
    assert_eq!(harness.read("one/three"), "three\n");
}

#[test]
fn test_excluded_subdirectory_never_indexed() {
    let mut harness = ChainHarness::new();
    fs::create_dir_all(harness.src("one/build/deep")).unwrap();
    fs::write(harness.src("one/build/deep/out.o"), "obj").unwrap();
    harness.pairs[0].exclusions = vec!["*/build".to_string()];

    let outcomes = harness.backup();
    let backup = read_backup(outcomes[0].archive.as_deref().unwrap());
    assert!(backup.snapshot.digest_of(&harness.src("one/build/deep/out.o")).is_none());
    assert!(!backup.snapshot.dirs().contains(&harness.src("one/build")));
    assert_eq!(backup.snapshot.file_count(), 3);
}

#[test]
fn test_folder_restore_recovers_newest_contents() {
    let mut harness = ChainHarness::new();
    harness.backup();
    harness.append("one/four/five", "later\n");
    fs::write(harness.src("one/four/six"), "six\n").unwrap();
    harness.backup();

    fs::remove_dir_all(harness.src("one/four")).unwrap();
    let report = harness.restore(&["four"], None).unwrap();

    assert_eq!(harness.read("one/four/five"), "some text\nlater\n");
    assert_eq!(harness.read("one/four/six"), "six\n");
    assert!(report.files_restored >= 2);
}

#[test]
fn test_whole_source_restore() {
    let mut harness = ChainHarness::new();
    harness.backup();
    fs::remove_dir_all(harness.src("one")).unwrap();

    let source = harness.src("one").to_string_lossy().into_owned();
    let report = harness.restore(&[&source], None).unwrap();

    assert_eq!(report.files_restored, 3);
    assert_eq!(harness.read("one/two"), "two\n");
    assert!(harness.src("one/empty").is_dir());
}

#[test]
fn test_restore_all_recreates_empty_dirs() {
    let mut harness = ChainHarness::new();
    harness.backup();
    fs::remove_dir_all(harness.src("one")).unwrap();

    let report = harness.restore(&[], None).unwrap();
    assert_eq!(report.files_restored, 3);
    assert!(report.directories_created >= 1);
    assert!(harness.src("one/empty").is_dir());
    assert_eq!(harness.read("one/four/five"), "some text\n");
}

#[test]
fn test_ambiguous_request_needs_index() {
    let mut harness = ChainHarness::new();
    harness.backup();
    harness.append("one/four/five", "more\n");
    harness.backup();
    fs::remove_file(harness.src("one/four/five")).unwrap();

    let err = harness.restore(&["five"], None).unwrap_err();
    assert!(matches!(err, BackchainError::SelectionRequired { versions: 2, .. }));

    let err = harness.restore(&["five"], Some(7)).unwrap_err();
    assert!(matches!(err, BackchainError::InvalidSelection { index: 7, available: 2 }));

    harness.restore(&["five"], Some(1)).unwrap();
    assert_eq!(harness.read("one/four/five"), "some text\n");
}

#[test]
fn test_several_names_continue_past_failures() {
    let mut harness = ChainHarness::new();
    harness.backup();
    fs::remove_file(harness.src("one/two")).unwrap();
    fs::remove_file(harness.src("six seven/eight")).unwrap();

    let report = harness.restore(&["two", "nine", "eight"], None).unwrap();
    assert_eq!(report.files_restored, 2);
    assert_eq!(report.not_found, vec!["nine".to_string()]);
}

#[test]
fn test_pair_selector_limits_search() {
    let mut harness = ChainHarness::new();
    harness.backup();
    fs::remove_file(harness.src("one/two")).unwrap();
    fs::remove_file(harness.src("six seven/eight")).unwrap();

    // `two` only lives in the first pair
    let report = harness.restore(&["#2", "two"], None).unwrap();
    assert_eq!(report.not_found, vec!["two".to_string()]);
    assert!(!harness.src("one/two").exists());

    let report = harness.restore(&["#2"], None).unwrap();
    assert_eq!(report.files_restored, 1);
    assert!(harness.src("six seven/eight").exists());
    assert!(!harness.src("one/two").exists());

    let report = harness.restore(&["#9"], None).unwrap();
    assert_eq!(report.not_found, vec!["#9".to_string()]);
}

#[test]
fn test_memory_device_chain() {
    let temp_dir = TempDir::new().unwrap();
    let device = std::sync::Arc::new(
        MemorySource::new().with_skip_prefixes(vec![PathBuf::from("/sdcard/Android")]),
    );
    device.add_file("/sdcard/DCIM/1.jpg", b"one");
    device.add_file("/sdcard/Android/data/blob", b"skip me");
    device.add_file("/sdcard/app/cache/tmp", b"skip me too");

    let backchain = Backchain::builder()
        .source(device.clone())
        .case_insensitive(false)
        .build();
    let pair = DirectoryPair::new("/sdcard", temp_dir.path().join("dst"));

    let outcome = backchain.backup_at(&pair, "0001").unwrap();
    assert_eq!(outcome.files_indexed, 1);

    device.remove("/sdcard/DCIM");
    let report = backchain.restore_all(&[pair], None).unwrap();
    assert_eq!(report.files_restored, 1);
    assert_eq!(device.contents("/sdcard/DCIM/1.jpg").unwrap(), b"one");
}

#[test]
fn test_parent_dir_components_are_resolved() {
    let mut harness = ChainHarness::new();
    let work = harness.temp_dir.path().join("work");
    fs::create_dir_all(&work).unwrap();

    let mut registry = Registry::new(PathRules::case_sensitive());
    registry
        .add_pair(&work.join("../src/one"), &work.join("../dst/one"))
        .unwrap();
    let pairs = registry.pairs().to_vec();
    assert_eq!(pairs[0].source, harness.src("one"));

    let outcome = harness.backchain.backup_at(&pairs[0], "0001").unwrap();
    assert_eq!(outcome.status, BackupStatus::Written);

    // A pair built by hand still produces member names tar accepts
    let raw = DirectoryPair::new(work.join("../src/six seven"), work.join("../dst/six seven"));
    let outcome = harness.backchain.backup_at(&raw, "0001").unwrap();
    assert_eq!(outcome.status, BackupStatus::Written);
    let members = read_backup(outcome.archive.as_ref().unwrap()).members().unwrap();
    assert!(members.iter().all(|m| !m.split('/').any(|part| part == "..")));

    fs::remove_file(harness.src("one/two")).unwrap();
    let report = harness
        .backchain
        .restore(&pairs, &["two".to_string()], None, None)
        .unwrap();
    assert_eq!(report.files_restored, 1);
    assert_eq!(harness.read("one/two"), "two\n");

    harness.pairs = pairs;
    assert_eq!(harness.archive_count(0), 1);
}

#[cfg(target_os = "linux")]
#[test]
fn test_non_utf8_name_does_not_force_new_archives() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let mut harness = ChainHarness::new();
    fs::write(harness.src("one").join(OsStr::from_bytes(b"bad\xffname")), "x").unwrap();

    let outcomes = harness.backup();
    assert_eq!(outcomes[0].status, BackupStatus::Written);
    let outcomes = harness.backup();
    assert_eq!(outcomes[0].status, BackupStatus::NoChanges);
    assert_eq!(harness.archive_count(0), 1);
}

#[cfg(unix)]
#[test]
fn test_trailing_spaces_in_names_survive_restore() {
    let mut harness = ChainHarness::new();
    fs::create_dir_all(harness.src("one/empty ")).unwrap();
    fs::create_dir_all(harness.src("one/spaced ")).unwrap();
    fs::write(harness.src("one/spaced /file "), "spaced\n").unwrap();
    harness.backup();

    fs::remove_dir_all(harness.src("one/empty ")).unwrap();
    fs::remove_dir_all(harness.src("one/spaced ")).unwrap();

    harness.restore(&[], None).unwrap();
    assert!(harness.src("one/empty ").is_dir());
    assert_eq!(harness.read("one/spaced /file "), "spaced\n");

    // Nothing changed since the restore, so the next run writes nothing
    let outcomes = harness.backup();
    assert_eq!(outcomes[0].status, BackupStatus::NoChanges);
}

#[test]
fn test_same_name_in_two_pairs_compares_each_location() {
    let mut harness = ChainHarness::new();
    fs::write(harness.src("one/notes.txt"), "a v1\n").unwrap();
    fs::write(harness.src("six seven/notes.txt"), "b v1\n").unwrap();
    harness.backup();
    fs::write(harness.src("one/notes.txt"), "a v2\n").unwrap();
    harness.backup();

    // Versions are one@0002, one@0001 and six seven@0001; only one@0001
    // differs from the file at its own location
    let report = harness.restore(&["notes.txt"], None).unwrap();
    assert_eq!(report.files_restored, 1);
    assert_eq!(harness.read("one/notes.txt"), "a v1\n");
    assert_eq!(harness.read("six seven/notes.txt"), "b v1\n");
}

#[test]
fn test_search_escalates_only_when_earlier_passes_miss() {
    let harness = ChainHarness::new();
    let src = harness.src("one");
    let dst_a = harness.temp_dir.path().join("dst/a");
    let dst_b = harness.temp_dir.path().join("dst/b");

    fs::write(src.join("notes.txt"), "old\n").unwrap();
    fs::write(src.join("only_b.txt"), "b\n").unwrap();
    harness
        .backchain
        .backup_at(&DirectoryPair::new(src.clone(), dst_b.clone()), "0001")
        .unwrap();

    fs::write(src.join("notes.txt"), "new\n").unwrap();
    fs::remove_file(src.join("only_b.txt")).unwrap();
    let pair_a = DirectoryPair::new(src.clone(), dst_a.clone());
    harness.backchain.backup_at(&pair_a, "0001").unwrap();

    // The second pair has no source, so it is never related in pass 1
    let pairs = vec![pair_a, DirectoryPair::new("", dst_b.clone())];

    // Pass 1 hit: the older copy under `dst/b` is not considered
    let notes = src.join("notes.txt").to_string_lossy().into_owned();
    let matches = harness.backchain.versions(&pairs, &notes);
    assert_eq!(matches.files.len(), 1);
    assert_eq!(matches.files[0].destination, dst_a);

    // Pass 1 misses, pass 2 searches the remaining pair exactly
    let only_b = src.join("only_b.txt").to_string_lossy().into_owned();
    let matches = harness.backchain.versions(&pairs, &only_b);
    assert_eq!(matches.files.len(), 1);
    assert_eq!(matches.files[0].destination, dst_b);

    // A bare name misses the exact passes and is matched partially everywhere
    let matches = harness.backchain.versions(&pairs, "notes.txt");
    assert_eq!(matches.files.len(), 2);

    let report = harness
        .backchain
        .restore(&pairs, &[only_b], None, None)
        .unwrap();
    assert_eq!(report.files_restored, 1);
    assert_eq!(harness.read("one/only_b.txt"), "b\n");
}
