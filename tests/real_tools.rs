//! End-to-end runs against real child processes: a shell script stands in
//! for the compiler CLI.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use pixie_lane::build::BuildError;
use pixie_lane::config::LaneConfig;
use pixie_lane::device::StaticPorts;
use pixie_lane::process::ProcessRunner;
use pixie_lane::{ArtifactKind, ErrorKind, Lane};
use tempfile::TempDir;

/// Fake compiler CLI. `compile` behavior is picked by a marker in the
/// sketch source: TIMEOUT sleeps, BROKEN fails, anything else succeeds.
const FAKE_CLI: &str = r#"#!/bin/sh
case "$1" in
  core)
    if [ "$2" = "list" ]; then
      echo "ID          Installed Latest Name"
      echo "esp32:esp32 3.0.7     3.0.7  esp32"
    fi
    exit 0
    ;;
  compile)
    for last; do :; done
    name=$(basename "$last")
    if grep -q TIMEOUT "$last/$name.ino"; then
      exec sleep 30
    fi
    if grep -q BROKEN "$last/$name.ino"; then
      echo "$name.ino:1:1: error: 'BROKEN' does not name a type" >&2
      exit 1
    fi
    printf 'merged-image' > "$last/$name.ino.merged.bin"
    exit 0
    ;;
esac
exit 2
"#;

fn install_fake_cli(dir: &Path) -> String {
    let path = dir.join("fake-arduino-cli");
    fs::write(&path, FAKE_CLI).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().to_string()
}

fn builds_left(root: &Path) -> usize {
    fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}

// One test function so the script is never written while another test forks.
#[test]
fn test_compile_with_real_processes() {
    let tmp = TempDir::new().unwrap();
    let mut config = LaneConfig {
        build_root: tmp.path().join("builds"),
        ..LaneConfig::default()
    };
    config.toolchain.cli = install_fake_cli(tmp.path());
    config.timeouts.compile_seconds = 1;
    config.timeouts.termination_grace_seconds = 1;

    let runner = Arc::new(ProcessRunner::new(config.timeouts.termination_grace()));
    let lane = Lane::new(config, runner, Box::new(StaticPorts::default()));
    assert!(lane.toolchain().check_or_install().is_ready());
    assert_eq!(lane.toolchain().install_runs(), 0);

    // success
    let firmware = lane.builds().compile("void setup() {}\nvoid loop() {}\n").unwrap();
    let merged = firmware.artifacts.get(ArtifactKind::Merged).unwrap();
    assert_eq!(merged.bytes(), b"merged-image");
    assert_eq!(builds_left(&tmp.path().join("builds")), 0);

    // compiler error
    let err = lane.builds().compile("BROKEN").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CompilationError);
    assert!(err.to_string().contains("does not name a type"));
    assert_eq!(builds_left(&tmp.path().join("builds")), 0);

    // timeout
    let err = lane.builds().compile("// TIMEOUT\nvoid setup() {}").unwrap_err();
    assert!(matches!(err, BuildError::TimedOut { .. }));
    assert_eq!(builds_left(&tmp.path().join("builds")), 0);
}
