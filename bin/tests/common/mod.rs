use std::{
    io::Write,
    path::Path,
    process::{Command, Output},
};

use tempfile::NamedTempFile;

/// write `contents` to a temp manifest, removed when dropped
pub(crate) fn manifest_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("nsx-apply-")
        .suffix(".yaml")
        .tempfile()
        .expect("tempfile");
    file.write_all(contents.as_bytes()).expect("failed to write manifest");
    file
}

/// run the binary in dry-run mode against the manifest at `path`
pub(crate) fn dry_run(path: &Path, action: &str, extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_nsx-apply"))
        .env("NSX_LOG", "debug")
        .env("LOG_FORMAT", "json")
        .arg("--dry-run")
        .arg(format!("--manifest-path={}", path.display()))
        .arg(format!("--action={action}"))
        .args(extra)
        .output()
        .expect("failed to run nsx-apply")
}
