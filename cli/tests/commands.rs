//! CLI command tests driven through `dispatch`.
//!
//! The executable packed here is a shell script, which the resolver treats
//! as a static binary, so no host libraries end up in the archive.

use std::path::Path;

use clap::Parser;
use guest_harness_cli::commands::{dispatch, Cli};
use guest_harness_runtime::read_archive;
use tempfile::TempDir;

async fn run_cli(args: &[&str]) -> Result<i32, Box<dyn std::error::Error>> {
    let mut argv = vec!["guest-harness"];
    argv.extend_from_slice(args);
    let cli = Cli::try_parse_from(argv)?;
    let config = cli.load_config()?;
    dispatch(cli, config).await
}

fn write(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_pack_then_inspect() {
    let dir = TempDir::new().unwrap();
    let binary = write(dir.path(), "guest", "#!/bin/sh\nexit 0\n");
    let module = write(dir.path(), "pf_ring.ko", "module");
    let config = write(dir.path(), "harness.yaml", "ldd: \"false\"\n");
    let output = dir.path().join("initrd.cpio");
    let output_arg = output.to_string_lossy().into_owned();

    let code = run_cli(&[
        "--config", &config, "pack", &binary, "--output", &output_arg, "--module", &module,
    ])
    .await
    .unwrap();
    assert_eq!(code, 0);

    let entries = read_archive(&std::fs::read(&output).unwrap()).unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec![".", "init", "pf_ring.ko"]);
    assert_eq!(entries[1].data, b"#!/bin/sh\nexit 0\n");

    assert_eq!(run_cli(&["inspect", &output_arg]).await.unwrap(), 0);
    assert_eq!(run_cli(&["inspect", "--json", &output_arg]).await.unwrap(), 0);
}

#[tokio::test]
async fn test_resolve_static_binary() {
    let dir = TempDir::new().unwrap();
    let binary = write(dir.path(), "guest", "#!/bin/sh\nexit 0\n");
    let config = write(dir.path(), "harness.yaml", "ldd: \"false\"\n");

    let code = run_cli(&["-c", &config, "resolve", "--json", &binary])
        .await
        .unwrap();
    assert_eq!(code, 0);
}

#[tokio::test]
async fn test_pack_missing_module_fails() {
    let dir = TempDir::new().unwrap();
    let binary = write(dir.path(), "guest", "#!/bin/sh\n");
    let config = write(dir.path(), "harness.yaml", "ldd: \"false\"\n");
    let output = dir.path().join("initrd.cpio");

    let err = run_cli(&[
        "-c",
        &config,
        "pack",
        &binary,
        "-o",
        &output.to_string_lossy(),
        "--module",
        "/nonexistent/pf_ring.ko",
    ])
    .await
    .unwrap_err();
    assert!(err.to_string().contains("Couldn't open /nonexistent/pf_ring.ko"));
    assert!(!output.exists());
}

#[tokio::test]
async fn test_inspect_rejects_garbage() {
    let dir = TempDir::new().unwrap();
    let junk = write(dir.path(), "junk", "not an archive");
    assert!(run_cli(&["inspect", &junk]).await.is_err());
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let dir = TempDir::new().unwrap();
    let config = write(dir.path(), "harness.yaml", "guest:\n  build_command: []\n");
    let cli = Cli::try_parse_from(["guest-harness", "-c", &config, "check"]).unwrap();
    assert!(cli.load_config().is_err());
}
