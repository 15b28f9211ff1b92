//! Smoke tests for the `caplink` binary.
//!
//! Every test runs in a scratch directory with `HOME` pointed at it, so no
//! user config is picked up.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Output};

fn caplink(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_caplink"));
    cmd.current_dir(dir).env("HOME", dir).env_remove("CAPLINK_LOG");
    cmd
}

fn run(dir: &Path, args: &[&str]) -> Output {
    caplink(dir).args(args).output().expect("failed to execute caplink")
}

fn write_manifest(dir: &Path, address: &str) -> std::path::PathBuf {
    let root = dir.join("store");
    let manifest = format!(
        r#"
name = "http-blobstore"
version = "0.1.0"

[[components]]
id = "http-blobstore"

[[components.links]]
contract = "outgoing-http"
target = "httpclient"
values = {{ ADDRESS = "{address}" }}

[[components.links]]
contract = "blobstore"
target = "blobstore-fs"
values = {{ ROOT = "{}" }}

[[providers]]
id = "httpclient"
contract = "outgoing-http"

[[providers]]
id = "blobstore-fs"
contract = "blobstore"
"#,
        root.display()
    );
    let path = dir.join("app.toml");
    std::fs::write(&path, manifest).unwrap();
    path
}

// ── Help / basic CLI ──────────────────────────────────────────────────────────

#[test]
fn binary_responds_to_help() {
    let tmp = tempfile::tempdir().unwrap();
    let output = run(tmp.path(), &["--help"]);
    assert!(output.status.success(), "caplink --help should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("check"));
    assert!(stdout.contains("blob"));
    assert!(stdout.contains("http"));
}

#[test]
fn unknown_subcommand_exits_nonzero() {
    let tmp = tempfile::tempdir().unwrap();
    let output = run(tmp.path(), &["nonexistent-subcommand"]);
    assert!(!output.status.success());
}

// ── check ─────────────────────────────────────────────────────────────────────

#[test]
fn check_lists_resolved_links() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest = write_manifest(tmp.path(), "127.0.0.1:8080");
    let output = run(tmp.path(), &["check", manifest.to_str().unwrap()]);

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("http-blobstore -[outgoing-http]-> httpclient"), "{stdout}");
    assert!(stdout.contains("ADDRESS=127.0.0.1:8080"));
    assert!(stdout.contains("provider blobstore-fs (blob)"));
}

#[test]
fn demo_manifest_is_valid() {
    let tmp = tempfile::tempdir().unwrap();
    let demo = concat!(env!("CARGO_MANIFEST_DIR"), "/../../demos/http-blobstore.toml");
    let output = run(tmp.path(), &["check", demo]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("http-blobstore -[blobstore]-> blobstore-fs"), "{stdout}");
}

#[test]
fn check_json_is_machine_readable() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest = write_manifest(tmp.path(), "127.0.0.1:8080");
    let output = run(tmp.path(), &["check", "--json", manifest.to_str().unwrap()]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"links\""));
    assert!(stdout.contains("\"blobstore-fs\": \"blob\""), "{stdout}");
}

#[test]
fn check_rejects_link_to_undeclared_provider() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest = write_manifest(tmp.path(), "127.0.0.1:8080");
    let broken = std::fs::read_to_string(&manifest)
        .unwrap()
        .replace("target = \"httpclient\"", "target = \"ghost\"");
    std::fs::write(&manifest, broken).unwrap();

    let output = run(tmp.path(), &["check", manifest.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ghost"), "{stderr}");
}

#[test]
fn malformed_runtime_config_fails_cleanly() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest = write_manifest(tmp.path(), "127.0.0.1:8080");
    std::fs::write(tmp.path().join("caplink.toml"), "[http]\nmax_idle_targets = \"lots\"\n").unwrap();

    let output = run(tmp.path(), &["check", manifest.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("config"), "{stderr}");
}

// ── blob ──────────────────────────────────────────────────────────────────────

#[test]
fn blob_write_then_read() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest = write_manifest(tmp.path(), "127.0.0.1:8080");
    let manifest = manifest.to_str().unwrap();

    let write = run(
        tmp.path(),
        &["blob", manifest, "--component", "http-blobstore", "write", "greeting.txt", "--data", "hello"],
    );
    assert!(write.status.success(), "stderr: {}", String::from_utf8_lossy(&write.stderr));

    let read = run(
        tmp.path(),
        &["blob", manifest, "--component", "http-blobstore", "read", "greeting.txt"],
    );
    assert!(read.status.success());
    assert_eq!(read.stdout, b"hello");
    assert!(tmp.path().join("store/greeting.txt").is_file());
}

#[test]
fn blob_traversal_is_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest = write_manifest(tmp.path(), "127.0.0.1:8080");

    let output = run(
        tmp.path(),
        &[
            "blob",
            manifest.to_str().unwrap(),
            "--component",
            "http-blobstore",
            "write",
            "../escape.txt",
            "--data",
            "x",
        ],
    );
    assert!(!output.status.success());
    assert!(!tmp.path().join("escape.txt").exists());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("escapes the storage root"), "{stderr}");
}

// ── http ──────────────────────────────────────────────────────────────────────

#[test]
fn http_streams_response_body() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        if let Ok((mut socket, _)) = listener.accept() {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf);
            let _ = socket.write_all(
                b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\nconnection: close\r\n\r\nhello",
            );
        }
    });

    let tmp = tempfile::tempdir().unwrap();
    let manifest = write_manifest(tmp.path(), &addr.to_string());
    let output = run(
        tmp.path(),
        &["http", manifest.to_str().unwrap(), "--component", "http-blobstore", "/"],
    );

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(output.stdout, b"hello");
    assert!(String::from_utf8_lossy(&output.stderr).contains("HTTP 200"));
}

#[test]
fn http_from_unlinked_component_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest = write_manifest(tmp.path(), "127.0.0.1:8080");
    let output = run(
        tmp.path(),
        &["http", manifest.to_str().unwrap(), "--component", "stranger", "/"],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no link"), "{stderr}");
}
