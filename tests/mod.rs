//! Main test module for Backchain
//!
//! This module includes all test suites:
//! - Integration tests for end-to-end backup and restore scenarios
//! - Chaos tests for damaged chains
//! - Property-based tests for invariants

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::backchain::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_source_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(src.join("only/dirs")).unwrap();

        let outcome = Backchain::new()
            .backup(&DirectoryPair::new(src, dst.clone()))
            .unwrap();
        assert_eq!(outcome.status, BackupStatus::EmptySource);
        assert!(list_backups(&dst, false).unwrap().is_empty());
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();

        let names = [
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file.multiple.dots.txt",
            "comma,in,name.txt",
            "at@@sign.txt",
            "unicode_文件.txt",
            "emoji_😀.txt",
        ];
        for name in &names {
            fs::write(src.join(name), format!("content of {}", name)).unwrap();
        }

        let backchain = Backchain::builder().case_insensitive(false).build();
        let pair = DirectoryPair::new(src.clone(), dst);
        let outcome = backchain.backup_at(&pair, "0001").unwrap();
        assert_eq!(outcome.files_added, names.len());

        for name in &names {
            fs::remove_file(src.join(name)).unwrap();
        }
        let report = backchain.restore_all(&[pair], None).unwrap();
        assert_eq!(report.files_restored, names.len());
        for name in &names {
            assert_eq!(
                fs::read_to_string(src.join(name)).unwrap(),
                format!("content of {}", name)
            );
        }
    }

    #[test]
    fn test_deep_directory_structure() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let mut deep = src.clone();
        for i in 0..40 {
            deep = deep.join(format!("level{}", i));
        }
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("bottom.txt"), "deep").unwrap();

        let backchain = Backchain::new();
        let pair = DirectoryPair::new(src.clone(), temp_dir.path().join("dst"));
        backchain.backup_at(&pair, "0001").unwrap();
        fs::remove_dir_all(src.join("level0")).unwrap();

        backchain
            .restore(&[pair], &["level38/level39/bottom.txt".to_string()], None, None)
            .unwrap();
        assert_eq!(fs::read_to_string(deep.join("bottom.txt")).unwrap(), "deep");
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_restored() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let script = src.join("run.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let backchain = Backchain::new();
        let pair = DirectoryPair::new(src.clone(), temp_dir.path().join("dst"));
        backchain.backup_at(&pair, "0001").unwrap();
        fs::remove_file(&script).unwrap();

        backchain.restore(&[pair], &["run.sh".to_string()], None, None).unwrap();
        let mode = fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let outside = temp_dir.path().join("outside");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(outside.join("nested")).unwrap();
        fs::write(outside.join("target.txt"), "linked").unwrap();
        fs::write(outside.join("nested/inner.txt"), "inner").unwrap();
        std::os::unix::fs::symlink(outside.join("target.txt"), src.join("file_link")).unwrap();
        std::os::unix::fs::symlink(outside.join("nested"), src.join("dir_link")).unwrap();

        let snapshot = Backchain::new().snapshot(&DirectoryPair::new(src.clone(), temp_dir.path().join("dst")));

        // Links to files are followed, links to directories are not
        assert_eq!(
            snapshot.digest_of(&src.join("file_link")),
            Some(utils::hash_data(b"linked").as_str())
        );
        assert!(!snapshot.dirs().contains(&src.join("dir_link")));
        assert_eq!(snapshot.file_count(), 1);
    }

    #[test]
    fn test_unknown_name_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a"), "a").unwrap();

        let backchain = Backchain::new();
        let pair = DirectoryPair::new(src, temp_dir.path().join("dst"));
        backchain.backup_at(&pair, "0001").unwrap();

        let report = backchain
            .restore(&[pair], &["does-not-exist".to_string()], None, None)
            .unwrap();
        assert_eq!(report.not_found, vec!["does-not-exist".to_string()]);
        assert!(!report.has_changes());
    }

    #[test]
    fn test_restore_without_backups() {
        let temp_dir = TempDir::new().unwrap();
        let pair = DirectoryPair::new(temp_dir.path().join("src"), temp_dir.path().join("never"));

        let report = Backchain::new().restore_all(&[pair], None).unwrap();
        assert_eq!(report.files_restored, 0);
        assert_eq!(report.not_found.len(), 1);
        assert!(!temp_dir.path().join("never").exists());
    }

    #[test]
    fn test_same_second_backups_do_not_collide() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();

        let backchain = Backchain::new();
        let pair = DirectoryPair::new(src.clone(), dst.clone());
        for i in 0..3 {
            fs::write(src.join("f"), format!("{}", i)).unwrap();
            assert!(backchain.backup(&pair).unwrap().is_written());
        }
        assert_eq!(list_backups(&dst, false).unwrap().len(), 3);
    }
}
