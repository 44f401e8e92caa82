//! Implementation of the `vsixpack package` command.

use anyhow::{Context, Result};
use vsixpack::{format_size, pack, PackageOptions};

pub fn package(options: &PackageOptions) -> Result<()> {
    let result = pack(options).with_context(|| {
        format!("failed to package '{}'", options.cwd.display())
    })?;

    let size = std::fs::metadata(&result.out)
        .with_context(|| format!("cannot stat '{}'", result.out.display()))?
        .len();

    println!(
        "Packaged {} {} ({} files, {})",
        result.manifest.id(),
        result.manifest.version,
        result.members.len(),
        format_size(size),
    );
    println!("{}", result.out.display());
    Ok(())
}
