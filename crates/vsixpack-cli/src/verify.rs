//! Implementation of the `vsixpack verify` command.

use anyhow::{bail, Context, Result};
use std::path::Path;

pub fn verify(file: &Path) -> Result<()> {
    let report = vsixpack::verify_vsix(file)
        .with_context(|| format!("cannot verify '{}'", file.display()))?;

    if report.is_ok() {
        println!("{}: OK", file.display());
        return Ok(());
    }

    for path in &report.mismatched {
        eprintln!("mismatched: {path}");
    }
    for path in &report.missing {
        eprintln!("missing:    {path}");
    }
    for path in &report.unexpected {
        eprintln!("unexpected: {path}");
    }
    bail!("integrity check failed for '{}'", file.display());
}
