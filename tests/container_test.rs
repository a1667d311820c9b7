use coffer_rs::{Argon2Params, CofferError, Container, ProgressListener, SessionEnv};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

fn fast_params() -> Argon2Params {
    Argon2Params {
        iterations: 1,
        memory_kib: 1024,
        parallelism: 1,
    }
}

fn new_env(root: &Path) -> SessionEnv {
    SessionEnv::create(root).unwrap()
}

#[test]
fn test_create_add_extract_roundtrip() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let source = dir.path().join("notes.txt");
    fs::write(&source, b"hello world").unwrap();

    {
        let mut archive = Container::create(
            &archive_path,
            "p@ss",
            fast_params(),
            Some([1u8; 32]),
            new_env(dir.path()),
        )
        .unwrap();
        archive.add_files_and_folders(&[&source], false).unwrap();
        assert_eq!(archive.file_count(), 1);
        archive.close().unwrap();
    }

    let mut archive =
        Container::open(&archive_path, "p@ss", new_env(dir.path())).unwrap();
    assert_eq!(archive.file_count(), 1);
    assert_eq!(archive.version(), 1);

    let out = dir.path().join("out");
    archive
        .extract_files_and_folders(&["/notes.txt"], &out)
        .unwrap();
    assert_eq!(fs::read(out.join("notes.txt")).unwrap(), b"hello world");
}

#[test]
fn test_wrong_password_is_rejected_before_decryption() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");

    Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap()
    .close()
    .unwrap();

    assert!(matches!(
        Container::open(&archive_path, "p@sS", new_env(dir.path())),
        Err(CofferError::WrongPassword)
    ));
}

#[test]
fn test_archive_content_is_not_plaintext() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let source = dir.path().join("secret.txt");
    let secret = b"very secret plaintext marker 9f8e7d";
    fs::write(&source, secret).unwrap();

    let mut archive = Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap();
    archive.add_files_and_folders(&[&source], false).unwrap();
    archive.close().unwrap();

    let raw = fs::read(&archive_path).unwrap();
    assert!(!raw.windows(secret.len()).any(|w| w == secret));
    // The file name never appears in the envelope either.
    assert!(!raw.windows(10).any(|w| w == b"secret.txt"));
}

#[test]
fn test_empty_folder_lifecycle() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let mut archive = Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap();

    archive.add_empty_folder("A").unwrap();
    archive.set_root_folder("/A").unwrap();
    archive.add_empty_folder("B").unwrap();
    assert_eq!(archive.folders_tree(), vec!["/", "/A", "/A/B"]);

    // A file landing in /A/B keeps both folders alive without markers.
    let source = dir.path().join("f.txt");
    fs::write(&source, b"x").unwrap();
    archive.set_root_folder("/A/B").unwrap();
    archive.add_files_and_folders(&[&source], false).unwrap();
    assert!(archive.contains_file("/A/B/f.txt"));
    assert_eq!(archive.folders_tree(), vec!["/", "/A", "/A/B"]);

    // Deleting the last file leaves /A/B as an empty folder, not gone.
    archive.delete_files_and_folders(&["/A/B/f.txt"]).unwrap();
    assert_eq!(archive.file_count(), 0);
    assert_eq!(archive.folders_tree(), vec!["/", "/A", "/A/B"]);

    // Deleting /A/B leaves /A empty but alive.
    archive.set_root_folder("/").unwrap();
    archive.delete_files_and_folders(&["/A/B"]).unwrap();
    assert_eq!(archive.folders_tree(), vec!["/", "/A"]);

    archive.delete_files_and_folders(&["/A"]).unwrap();
    assert_eq!(archive.folders_tree(), vec!["/"]);
}

#[test]
fn test_folder_state_survives_reopen() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let source = dir.path().join("doc.md");
    fs::write(&source, b"# contents").unwrap();

    {
        let mut archive = Container::create(
            &archive_path,
            "p@ss",
            fast_params(),
            None,
            new_env(dir.path()),
        )
        .unwrap();
        archive.add_empty_folder("empty").unwrap();
        archive.add_files_and_folders(&[&source], false).unwrap();
        archive.close().unwrap();
    }

    let archive = Container::open(&archive_path, "p@ss", new_env(dir.path())).unwrap();
    assert_eq!(archive.folders_tree(), vec!["/", "/empty"]);
    let files = archive.all_files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, "/doc.md");
    assert_eq!(files[0].size, 10);
}

#[test]
fn test_move_into_own_subtree_is_rejected() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let mut archive = Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap();

    archive.add_empty_folder("A").unwrap();
    archive.set_root_folder("/A").unwrap();
    archive.add_empty_folder("B").unwrap();
    let before = archive.folders_tree();

    assert!(matches!(
        archive.move_files_and_folders(&["/A"], "/A/B"),
        Err(CofferError::InvalidOperation(_))
    ));
    assert!(matches!(
        archive.move_files_and_folders(&["/A"], "/A"),
        Err(CofferError::InvalidOperation(_))
    ));
    assert_eq!(archive.folders_tree(), before);
}

#[test]
fn test_move_rewrites_descendants_and_markers() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let source = dir.path().join("deep.txt");
    fs::write(&source, b"deep").unwrap();

    let mut archive = Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap();
    archive.add_empty_folder("src").unwrap();
    archive.add_empty_folder("dst").unwrap();
    archive.set_root_folder("/src").unwrap();
    archive.add_files_and_folders(&[&source], false).unwrap();
    archive.set_root_folder("/").unwrap();

    archive.move_files_and_folders(&["/src"], "/dst").unwrap();
    assert!(archive.contains_file("/dst/src/deep.txt"));
    assert!(!archive.folder_exists("/src"));
    assert_eq!(archive.subfolders_of("/dst"), vec!["src"]);

    // Moving the file out leaves its old folder as an empty one.
    archive
        .move_files_and_folders(&["/dst/src/deep.txt"], "/")
        .unwrap();
    assert!(archive.contains_file("/deep.txt"));
    assert!(archive.folder_exists("/dst/src"));
}

#[test]
fn test_move_conflict_is_precheckable() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let a = dir.path().join("same.txt");
    fs::write(&a, b"a").unwrap();

    let mut archive = Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap();
    archive.add_empty_folder("target").unwrap();
    archive.add_files_and_folders(&[&a], false).unwrap();
    archive.set_root_folder("/target").unwrap();
    archive.add_files_and_folders(&[&a], false).unwrap();
    archive.set_root_folder("/").unwrap();

    let conflicts = archive
        .test_move_files_and_folders(&["/same.txt"], "/target")
        .unwrap();
    assert_eq!(conflicts, vec!["/target/same.txt"]);
    assert!(matches!(
        archive.move_files_and_folders(&["/same.txt"], "/target"),
        Err(CofferError::NameConflict(_))
    ));
}

#[test]
fn test_rename_rules() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    fs::write(&a, b"a").unwrap();
    fs::write(&b, b"b").unwrap();

    let mut archive = Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap();
    archive.add_files_and_folders(&[&a, &b], false).unwrap();
    archive.add_empty_folder("folder").unwrap();

    assert!(matches!(
        archive.rename_file("/a.txt", "bad/name"),
        Err(CofferError::InvalidName(_))
    ));
    assert!(matches!(
        archive.rename_file("/a.txt", "B.TXT"),
        Err(CofferError::NameConflict(_))
    ));
    assert!(matches!(
        archive.rename_file("/missing.txt", "x"),
        Err(CofferError::NotFound(_))
    ));
    assert!(matches!(
        archive.rename_folder("/", "x"),
        Err(CofferError::InvalidOperation(_))
    ));

    archive.rename_file("/a.txt", "renamed.txt").unwrap();
    assert!(archive.contains_file("/renamed.txt"));
    assert!(!archive.contains_file("/a.txt"));

    archive.rename_folder("/folder", "vault-docs").unwrap();
    assert!(archive.folder_exists("/vault-docs"));
    assert!(!archive.folder_exists("/folder"));
}

#[test]
fn test_rename_folder_with_multibyte_case_mappings() {
    // The Kelvin sign and the capital sharp s change byte length when
    // lowercased. Renaming such a folder must carry its descendants along
    // without truncating or garbling their paths.
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let source = dir.path().join("f.txt");
    fs::write(&source, b"x").unwrap();

    let mut archive = Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap();

    archive.add_empty_folder("\u{212A}").unwrap();
    archive.set_root_folder("/\u{212A}").unwrap();
    archive.add_files_and_folders(&[&source], false).unwrap();
    archive.set_root_folder("/").unwrap();

    archive.rename_folder("/\u{212A}", "kelvin").unwrap();
    assert!(archive.contains_file("/kelvin/f.txt"));
    assert!(!archive.folder_exists("/\u{212A}"));

    archive.add_empty_folder("STRA\u{1E9E}E").unwrap();
    archive.set_root_folder("/STRA\u{1E9E}E").unwrap();
    archive.add_files_and_folders(&[&source], false).unwrap();
    archive.set_root_folder("/").unwrap();

    archive.rename_folder("/STRA\u{1E9E}E", "street").unwrap();
    assert!(archive.contains_file("/street/f.txt"));
    assert!(!archive.folder_exists("/STRA\u{1E9E}E"));
    assert_eq!(archive.folders_tree(), vec!["/", "/kelvin", "/street"]);
}

#[test]
fn test_extract_folder_with_differing_stored_casing() {
    // The caller may name the folder in a casing whose byte length differs
    // from the stored one; outputs must still land relative to the target.
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let source = dir.path().join("f.txt");
    fs::write(&source, b"x").unwrap();

    let mut archive = Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap();
    archive.add_empty_folder("STRA\u{1E9E}E").unwrap();
    archive.set_root_folder("/STRA\u{1E9E}E").unwrap();
    archive.add_empty_folder("sub").unwrap();
    archive.set_root_folder("/STRA\u{1E9E}E/sub").unwrap();
    archive.add_files_and_folders(&[&source], false).unwrap();

    let out = dir.path().join("out");
    archive
        .extract_files_and_folders(&["/stra\u{df}e/sub"], &out)
        .unwrap();
    assert_eq!(fs::read(out.join("sub/f.txt")).unwrap(), b"x");
}

struct TotalWatcher {
    max_total: AtomicU8,
}

impl ProgressListener for TotalWatcher {
    fn on_total_percent(&self, percent: u8) {
        self.max_total.fetch_max(percent, Ordering::SeqCst);
    }
}

#[test]
fn test_add_progress_reaches_one_hundred() {
    // 1000 bytes is not a multiple of the cipher block size; the aggregate
    // percentage must still finish exactly at 100.
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let source = dir.path().join("odd.bin");
    fs::write(&source, vec![0xabu8; 1000]).unwrap();

    let mut archive = Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap();
    let watcher = Arc::new(TotalWatcher {
        max_total: AtomicU8::new(0),
    });
    archive.add_listener(watcher.clone());

    archive.add_files_and_folders(&[&source], false).unwrap();
    assert_eq!(watcher.max_total.load(Ordering::SeqCst), 100);
}

#[test]
fn test_overwrite_keeps_single_entry() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let source = dir.path().join("data.txt");

    let mut archive = Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap();

    fs::write(&source, b"version one").unwrap();
    archive.add_files_and_folders(&[&source], false).unwrap();

    fs::write(&source, b"version two, longer").unwrap();
    let overwrites = archive.test_add_files_and_folders(&[&source]).unwrap();
    assert_eq!(overwrites, vec!["/data.txt"]);
    archive.add_files_and_folders(&[&source], false).unwrap();

    assert_eq!(archive.file_count(), 1);
    let out = dir.path().join("out");
    archive
        .extract_files_and_folders(&["/data.txt"], &out)
        .unwrap();
    assert_eq!(fs::read(out.join("data.txt")).unwrap(), b"version two, longer");
}

#[test]
fn test_extract_restores_modified_time() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let source = dir.path().join("stamped.txt");
    fs::write(&source, b"timestamped").unwrap();
    let source_mtime = fs::metadata(&source).unwrap().modified().unwrap();

    let mut archive = Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap();
    archive.add_files_and_folders(&[&source], false).unwrap();

    let out = dir.path().join("out");
    archive
        .extract_files_and_folders(&["/stamped.txt"], &out)
        .unwrap();
    let extracted_mtime = fs::metadata(out.join("stamped.txt"))
        .unwrap()
        .modified()
        .unwrap();

    let delta = extracted_mtime
        .duration_since(source_mtime)
        .unwrap_or_else(|e| e.duration());
    assert!(delta.as_secs() < 2, "mtime drifted by {:?}", delta);
}

#[test]
fn test_extract_folder_preserves_structure() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let tree = dir.path().join("tree");
    fs::create_dir_all(tree.join("inner/empty")).unwrap();
    fs::write(tree.join("top.txt"), b"top").unwrap();
    fs::write(tree.join("inner/leaf.txt"), b"leaf").unwrap();

    let mut archive = Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap();
    archive.add_files_and_folders(&[&tree], false).unwrap();
    assert!(archive.folder_exists("/tree/inner/empty"));

    let out = dir.path().join("out");
    archive.extract_files_and_folders(&["/tree"], &out).unwrap();
    assert_eq!(fs::read(out.join("tree/top.txt")).unwrap(), b"top");
    assert_eq!(fs::read(out.join("tree/inner/leaf.txt")).unwrap(), b"leaf");
    assert!(out.join("tree/inner/empty").is_dir());
}

#[test]
fn test_extract_to_scratch_uniquifies_and_protects() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let source = dir.path().join("view.txt");
    fs::write(&source, b"viewer copy").unwrap();

    let mut archive = Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap();
    archive.add_files_and_folders(&[&source], false).unwrap();

    let first = archive.extract_to_scratch(&["/view.txt"]).unwrap();
    let second = archive.extract_to_scratch(&["/view.txt"]).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_ne!(first[0], second[0]);
    assert!(second[0]
        .file_name()
        .unwrap()
        .to_string_lossy()
        .contains("(1)"));

    for path in first.iter().chain(&second) {
        assert_eq!(fs::read(path).unwrap(), b"viewer copy");
        assert!(fs::metadata(path).unwrap().permissions().readonly());
    }
}

#[test]
fn test_comment_roundtrip() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");

    {
        let mut archive = Container::create(
            &archive_path,
            "p@ss",
            fast_params(),
            None,
            new_env(dir.path()),
        )
        .unwrap();
        assert_eq!(archive.get_comment().unwrap(), "");
        archive.set_comment("tax papers, 2025: do not share").unwrap();
        archive.close().unwrap();
    }

    let archive = Container::open(&archive_path, "p@ss", new_env(dir.path())).unwrap();
    assert_eq!(
        archive.get_comment().unwrap(),
        "tax papers, 2025: do not share"
    );

    // The comment is stored encrypted, not readable from the raw file.
    drop(archive);
    let raw = fs::read(&archive_path).unwrap();
    assert!(!raw.windows(10).any(|w| w == b"tax papers"));
}

#[test]
fn test_destroy_sources_after_add() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    let source = dir.path().join("burn-after-adding.txt");
    fs::write(&source, b"incriminating").unwrap();

    let mut archive = Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap();
    archive.add_files_and_folders(&[&source], true).unwrap();

    assert!(!source.exists());
    assert!(archive.contains_file("/burn-after-adding.txt"));
}

#[test]
fn test_second_open_is_locked_out() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");

    let archive = Container::create(
        &archive_path,
        "p@ss",
        fast_params(),
        None,
        new_env(dir.path()),
    )
    .unwrap();

    assert!(matches!(
        Container::open(&archive_path, "p@ss", new_env(dir.path())),
        Err(CofferError::ArchiveLocked(_))
    ));
    drop(archive);

    // Released on drop.
    assert!(Container::open(&archive_path, "p@ss", new_env(dir.path())).is_ok());
}

#[test]
fn test_corrupt_archive_is_reported() {
    let dir = tempdir().unwrap();
    let archive_path = dir.path().join("vault.bar");
    fs::write(&archive_path, vec![0u8; 256]).unwrap();

    assert!(matches!(
        Container::open(&archive_path, "p@ss", new_env(dir.path())),
        Err(CofferError::InvalidFormat(_))
    ));
}
