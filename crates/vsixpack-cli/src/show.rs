//! Implementation of the `vsixpack show` command.

use anyhow::{Context, Result};
use std::path::Path;
use vsixpack::format_size;

pub fn show(file: &Path, members: bool) -> Result<()> {
    let contents = vsixpack::read_vsix(file)
        .with_context(|| format!("cannot read '{}'", file.display()))?;

    let manifest = &contents.manifest;
    println!("id:          {}", manifest.id());
    println!("version:     {}", contents.identity.version);
    println!("publisher:   {}", contents.identity.publisher);
    println!("display:     {}", manifest.display_name());
    if let Some(description) = &manifest.description {
        println!("description: {description}");
    }
    println!("engine:      {}", manifest.engines.get("vscode").map_or("", String::as_str));
    println!("members:     {}", contents.members.len());

    if members {
        println!();
        for member in &contents.members {
            println!("{} {}", member.path, format_size(member.size));
        }
    }
    Ok(())
}
