use super::*;
use crate::config::AppConfig;
use crate::test_support::{serve, serve_with, CannedResponse};
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

fn store() -> Arc<StateStore> {
    Arc::new(StateStore::new(AppConfig::default()))
}

fn tar_gz_with_binary(contents: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, "CLIProxyAPI", contents)
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

fn release_json(base_url: &str, asset_name: &str) -> String {
    serde_json::json!({
        "tag_name": "v1.2.3",
        "assets": [
            {"name": "proxy_windows_amd64.zip", "browser_download_url": format!("{}/win", base_url)},
            {"name": asset_name, "browser_download_url": format!("{}/asset", base_url)},
        ]
    })
    .to_string()
}

/// An install request whose scratch space lives in `dir/work`.
fn request(dir: &TempDir, feed_url: String, destination: PathBuf) -> InstallRequest {
    let work_dir = dir.path().join("work");
    std::fs::create_dir_all(&work_dir).unwrap();
    InstallRequest {
        feed_url,
        target: Target::new("linux", "amd64"),
        destination,
        work_dir,
    }
}

fn leftover_scratch_dirs(request: &InstallRequest) -> Vec<PathBuf> {
    std::fs::read_dir(&request.work_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(SCRATCH_PREFIX))
        })
        .collect()
}

#[test]
fn test_full_install_from_tar_gz() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("bin").join("CLIProxyAPI");
    let payload = tar_gz_with_binary(b"fresh binary");
    let (base_url, server) = serve_with(|base| {
        vec![
            CannedResponse::json(200, &release_json(base, "proxy_linux_amd64.tar.gz")),
            CannedResponse::bytes(payload),
        ]
    });
    let store = store();
    let request = request(&dir, format!("{}/latest", base_url), destination.clone());

    let installed = run_install(&store, &request).unwrap();
    let heads = server.join().unwrap();

    assert_eq!(installed, destination);
    assert_eq!(std::fs::read(&destination).unwrap(), b"fresh binary");
    assert_eq!(store.install_progress(), PROGRESS_DONE);
    assert!(store.last_error().is_none());
    assert!(heads[1].starts_with("GET /asset "));
    assert!(store
        .logs()
        .iter()
        .any(|e| e.message == "Found asset: proxy_linux_amd64.tar.gz"));
    assert!(leftover_scratch_dirs(&request).is_empty());
}

#[test]
fn test_install_raw_executable() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("CLIProxyAPI");
    let (base_url, server) = serve_with(|base| {
        vec![
            CannedResponse::json(200, &release_json(base, "cli-proxy-api_linux_amd64")),
            CannedResponse::bytes(b"raw elf".to_vec()),
        ]
    });
    let store = store();

    run_install(&store, &request(&dir, base_url, destination.clone())).unwrap();
    server.join().unwrap();

    assert_eq!(std::fs::read(&destination).unwrap(), b"raw elf");
}

#[test]
fn test_no_compatible_asset_records_error() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("CLIProxyAPI");
    let (base_url, server) = serve_with(|base| {
        vec![CannedResponse::json(
            200,
            &release_json(base, "proxy_darwin_arm64.tar.gz"),
        )]
    });
    let store = store();

    let err = run_install(&store, &request(&dir, base_url, destination.clone())).unwrap_err();
    server.join().unwrap();

    assert_eq!(
        err,
        ManagerError::NoCompatibleAsset {
            target: "linux/amd64".to_string()
        }
    );
    assert_eq!(store.install_progress(), PROGRESS_METADATA);
    assert_eq!(store.last_error(), Some(err.to_string()));
    assert!(!destination.exists());
}

#[test]
fn test_metadata_failure_is_download_failed() {
    let dir = TempDir::new().unwrap();
    let (base_url, server) = serve(vec![CannedResponse::json(500, "{}")]);
    let store = store();

    let err = run_install(&store, &request(&dir, base_url, dir.path().join("bin"))).unwrap_err();
    server.join().unwrap();

    assert!(matches!(err, ManagerError::DownloadFailed { .. }));
    assert_eq!(store.install_progress(), 0.0);
    assert!(store.logs().iter().any(|e| e.level == LogLevel::Error));
}

#[test]
fn test_corrupt_archive_keeps_existing_binary() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("CLIProxyAPI");
    std::fs::write(&destination, b"known good").unwrap();
    let (base_url, server) = serve_with(|base| {
        vec![
            CannedResponse::json(200, &release_json(base, "proxy_linux_amd64.tar.gz")),
            CannedResponse::bytes(b"truncated garbage".to_vec()),
        ]
    });
    let store = store();
    let request = request(&dir, base_url, destination.clone());

    let err = run_install(&store, &request).unwrap_err();
    server.join().unwrap();

    assert!(matches!(err, ManagerError::ExtractFailed { .. }));
    assert_eq!(store.install_progress(), PROGRESS_CONFIRMED);
    assert_eq!(std::fs::read(&destination).unwrap(), b"known good");
    assert!(leftover_scratch_dirs(&request).is_empty());
}

#[test]
fn test_empty_download_fails() {
    let dir = TempDir::new().unwrap();
    let (base_url, server) = serve_with(|base| {
        vec![
            CannedResponse::json(200, &release_json(base, "proxy_linux_amd64.tar.gz")),
            CannedResponse::bytes(Vec::new()),
        ]
    });
    let store = store();

    let err = run_install(&store, &request(&dir, base_url, dir.path().join("bin"))).unwrap_err();
    server.join().unwrap();

    assert!(matches!(err, ManagerError::DownloadFailed { .. }));
}

#[test]
fn test_unpack_without_candidate_removes_scratch_dir() {
    let dir = TempDir::new().unwrap();
    let work_dir = dir.path().join("work");
    std::fs::create_dir(&work_dir).unwrap();
    let destination = dir.path().join("CLIProxyAPI");

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(4);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "README.md", &b"docs"[..])
        .unwrap();
    let bytes = builder.into_inner().unwrap().finish().unwrap();
    let asset = ReleaseAsset {
        name: "proxy_linux_amd64.tar.gz".to_string(),
        download_url: String::new(),
    };

    assert!(unpack_and_install(&bytes, &asset, &destination, &work_dir).is_err());
    assert_eq!(std::fs::read_dir(&work_dir).unwrap().count(), 0);
    assert!(!destination.exists());
}

#[test]
fn test_install_slot_is_single_flight() {
    let store = store();
    store.mutate(|s| s.state.last_error = Some("old".to_string()));

    let slot = InstallSlot::acquire(&store).unwrap();
    assert!(store.is_installing());
    assert!(store.last_error().is_none());
    assert!(matches!(
        InstallSlot::acquire(&store),
        Err(ManagerError::InstallInProgress)
    ));

    drop(slot);
    assert!(!store.is_installing());
    assert!(InstallSlot::acquire(&store).is_ok());
}
