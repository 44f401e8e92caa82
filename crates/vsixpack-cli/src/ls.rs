//! Implementation of the `vsixpack ls` command.

use anyhow::{Context, Result};
use vsixpack::{format_size, list_files, CollectedFile, FileContents, PackageOptions};

pub fn ls(options: &PackageOptions, sizes: bool) -> Result<()> {
    let (_, files) = list_files(options)
        .with_context(|| format!("failed to list '{}'", options.cwd.display()))?;

    for line in render(&files, sizes)? {
        println!("{line}");
    }
    println!("{} files", files.len());
    Ok(())
}

fn render(files: &[CollectedFile], sizes: bool) -> Result<Vec<String>> {
    files
        .iter()
        .map(|file| {
            if !sizes {
                return Ok(file.path.clone());
            }
            let size = match &file.contents {
                FileContents::OnDisk(local) => {
                    std::fs::metadata(local)
                        .with_context(|| format!("cannot stat '{}'", local.display()))?
                        .len()
                }
                FileContents::InMemory(bytes) => bytes.len() as u64,
            };
            Ok(format!("{} {}", file.path, format_size(size)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_plain_and_sized() {
        let dir = tempfile::TempDir::new().unwrap();
        let local = dir.path().join("a.js");
        std::fs::write(&local, vec![b'x'; 2048]).unwrap();

        let files = vec![
            CollectedFile::on_disk("extension/a.js", local),
            CollectedFile::in_memory("extension/b.json", b"{}".to_vec()),
        ];

        let plain = render(&files, false).unwrap();
        assert_eq!(plain, vec!["extension/a.js", "extension/b.json"]);

        let sized = render(&files, true).unwrap();
        assert_eq!(sized[0], "extension/a.js 2.00 KB");
        assert_eq!(sized[1], "extension/b.json 2 B");
    }
}
