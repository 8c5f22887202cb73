use super::*;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

fn write_tar_gz(path: &Path, files: &[(&str, &[u8], u32)]) {
    let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data, mode) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

fn write_zip(path: &Path, files: &[(&str, &[u8], u32)]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, data, mode) in files {
        let options = SimpleFileOptions::default().unix_permissions(*mode);
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// Like `write_tar_gz`, but stores names verbatim so archives can carry
/// absolute or `..` paths that `tar::Builder` would refuse.
fn write_tar_gz_raw_names(path: &Path, files: &[(&str, &[u8], u32)]) {
    let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data, mode) in files {
        let mut header = tar::Header::new_old();
        let name = name.as_bytes();
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append(&header, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

#[test]
fn test_classify_by_suffix() {
    let p = PathBuf::from("/tmp/x");
    assert_eq!(
        InstallPayload::classify(p.clone(), "a_linux_amd64.tar.gz"),
        InstallPayload::TarGz(p.clone())
    );
    assert_eq!(
        InstallPayload::classify(p.clone(), "a_linux_amd64.TGZ"),
        InstallPayload::TarGz(p.clone())
    );
    assert_eq!(
        InstallPayload::classify(p.clone(), "a_windows_amd64.zip"),
        InstallPayload::Zip(p.clone())
    );
    assert_eq!(
        InstallPayload::classify(p.clone(), "cli-proxy-api_linux_amd64"),
        InstallPayload::Raw(p)
    );
}

#[test]
fn test_raw_payload_is_its_own_candidate() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("asset");
    std::fs::write(&file, b"bin").unwrap();

    let candidate = InstallPayload::Raw(file.clone())
        .extract_candidate(dir.path())
        .unwrap();
    assert_eq!(candidate, file);
}

#[test]
fn test_tar_gz_prefers_known_name_over_earlier_executable() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("a.tar.gz");
    write_tar_gz(
        &archive,
        &[
            ("release/install.sh", b"#!/bin/sh", 0o755),
            ("release/helper", b"helper", 0o755),
            ("release/cli-proxy-api", b"real", 0o644),
            ("release/README.md", b"docs", 0o644),
        ],
    );
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let candidate = InstallPayload::TarGz(archive).extract_candidate(&out).unwrap();
    assert_eq!(candidate, out.join("release/cli-proxy-api"));
    assert_eq!(std::fs::read(&candidate).unwrap(), b"real");
}

#[test]
fn test_tar_gz_falls_back_to_first_executable_not_script() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("a.tgz");
    write_tar_gz(
        &archive,
        &[
            ("run.sh", b"#!/bin/sh", 0o755),
            ("LICENSE", b"mit", 0o644),
            ("server-bin", b"elf", 0o755),
            ("other-bin", b"elf2", 0o755),
        ],
    );
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let candidate = InstallPayload::TarGz(archive).extract_candidate(&out).unwrap();
    assert_eq!(candidate, out.join("server-bin"));
}

#[test]
fn test_tar_gz_without_candidate_fails() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("a.tar.gz");
    write_tar_gz(&archive, &[("README.md", b"docs", 0o644)]);

    let err = InstallPayload::TarGz(archive)
        .extract_candidate(dir.path())
        .unwrap_err();
    assert!(err.to_string().contains("could not find binary"));
}

#[test]
fn test_corrupt_tar_gz_fails() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("a.tar.gz");
    std::fs::write(&archive, b"definitely not gzip").unwrap();

    assert!(InstallPayload::TarGz(archive)
        .extract_candidate(dir.path())
        .is_err());
}

#[test]
fn test_zip_matches_name_case_insensitively() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("a.zip");
    write_zip(
        &archive,
        &[
            ("docs/readme.txt", b"docs", 0o644),
            ("cliproxyapi.exe", b"win", 0o644),
        ],
    );
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let candidate = InstallPayload::Zip(archive).extract_candidate(&out).unwrap();
    assert_eq!(candidate, out.join("cliproxyapi.exe"));
    assert!(out.join("docs/readme.txt").exists());
}

#[test]
fn test_zip_falls_back_to_executable_bit() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("a.zip");
    write_zip(
        &archive,
        &[("setup.sh", b"sh", 0o755), ("daemon", b"elf", 0o755)],
    );
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let candidate = InstallPayload::Zip(archive).extract_candidate(&out).unwrap();
    assert_eq!(candidate, out.join("daemon"));
}

#[test]
fn test_install_binary_replaces_existing() {
    let dir = TempDir::new().unwrap();
    let candidate = dir.path().join("candidate");
    std::fs::write(&candidate, b"new").unwrap();
    let destination = dir.path().join("bin").join("CLIProxyAPI");
    std::fs::create_dir_all(destination.parent().unwrap()).unwrap();
    std::fs::write(&destination, b"old").unwrap();

    install_binary(&candidate, &destination).unwrap();

    assert_eq!(std::fs::read(&destination).unwrap(), b"new");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&destination).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
    // Only the installed binary remains; the staging file was renamed away.
    let entries: Vec<_> = std::fs::read_dir(destination.parent().unwrap())
        .unwrap()
        .collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn test_install_binary_missing_candidate_keeps_existing() {
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("CLIProxyAPI");
    std::fs::write(&destination, b"old").unwrap();

    assert!(install_binary(&dir.path().join("absent"), &destination).is_err());
    assert_eq!(std::fs::read(&destination).unwrap(), b"old");
}

#[test]
fn test_enclosed_tar_path() {
    assert_eq!(
        enclosed_tar_path(Path::new("./release/proxy")),
        Some(PathBuf::from("release/proxy"))
    );
    assert_eq!(enclosed_tar_path(Path::new("/usr/bin/proxy")), None);
    assert_eq!(enclosed_tar_path(Path::new("release/../../proxy")), None);
    assert_eq!(enclosed_tar_path(Path::new(".")), None);
}

#[test]
fn test_tar_gz_absolute_entry_never_points_outside() {
    let dir = TempDir::new().unwrap();
    let host_file = dir.path().join("host").join("proxy");
    std::fs::create_dir_all(host_file.parent().unwrap()).unwrap();
    std::fs::write(&host_file, b"host file").unwrap();
    let archive = dir.path().join("a.tar.gz");
    let host_name = host_file.to_str().unwrap().to_string();
    write_tar_gz_raw_names(&archive, &[(host_name.as_str(), b"from archive", 0o755)]);
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let result = InstallPayload::TarGz(archive).extract_candidate(&out);

    assert!(result.is_err(), "picked {:?}", result);
    assert_eq!(std::fs::read(&host_file).unwrap(), b"host file");
}

#[test]
fn test_tar_gz_parent_dir_entry_is_skipped() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("a.tar.gz");
    write_tar_gz_raw_names(
        &archive,
        &[
            ("../proxy", b"escaped", 0o755),
            ("release/server", b"inside", 0o755),
        ],
    );
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let candidate = InstallPayload::TarGz(archive).extract_candidate(&out).unwrap();

    assert_eq!(candidate, out.join("release/server"));
    assert!(!dir.path().join("proxy").exists());
}

#[test]
fn test_zip_parent_dir_entry_is_skipped() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("a.zip");
    write_zip(
        &archive,
        &[("../proxy", b"escaped", 0o755), ("daemon", b"elf", 0o755)],
    );
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let candidate = InstallPayload::Zip(archive).extract_candidate(&out).unwrap();

    assert_eq!(candidate, out.join("daemon"));
    assert!(!dir.path().join("proxy").exists());
}
