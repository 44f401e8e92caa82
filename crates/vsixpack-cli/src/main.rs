//! vsixpack CLI - package, inspect and verify extension archives

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vsixpack::{PackageManagerKind, PackageOptions};

mod ls;
mod package;
mod show;
mod verify;

#[derive(Parser)]
#[command(name = "vsixpack")]
#[command(version)]
#[command(about = "Package VS Code compatible extensions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SourceArgs {
    /// Extension root directory
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Dependency resolution strategy: none, npm or yarn (auto-detected
    /// by default)
    #[arg(long)]
    package_manager: Option<String>,

    /// Skip dependency resolution, same as --package-manager none
    #[arg(long, conflicts_with = "package_manager")]
    no_dependencies: bool,

    /// Ignore file to use instead of the in-tree .vsixignore
    #[arg(long)]
    ignore_file: Option<PathBuf>,

    /// Descend into symlinked directories
    #[arg(long)]
    follow_symlinks: bool,

    /// Only package these production dependencies (yarn only)
    #[arg(long, value_delimiter = ',')]
    packaged_dependencies: Vec<String>,
}

impl SourceArgs {
    fn into_options(self) -> Result<PackageOptions> {
        let mut options = PackageOptions::new(self.path);
        options.package_manager = if self.no_dependencies {
            Some(PackageManagerKind::None)
        } else {
            self.package_manager
                .as_deref()
                .map(str::parse)
                .transpose()?
        };
        options.ignore_file = self.ignore_file;
        options.follow_symlinks = self.follow_symlinks;
        if !self.packaged_dependencies.is_empty() {
            options.packaged_dependencies = Some(self.packaged_dependencies);
        }
        Ok(options)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Package the extension into a .vsix archive
    Package {
        #[command(flatten)]
        source: SourceArgs,

        /// Output archive path (defaults to <name>-<version>.vsix)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List the files a packaging run would archive
    Ls {
        #[command(flatten)]
        source: SourceArgs,

        /// Show file sizes
        #[arg(long)]
        sizes: bool,
    },

    /// Check an archive against its integrity manifest
    Verify {
        /// Path to the .vsix archive
        file: PathBuf,
    },

    /// Print the metadata of an existing archive
    Show {
        /// Path to the .vsix archive
        file: PathBuf,

        /// Also list the archive members
        #[arg(long)]
        members: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Package { source, out } => {
            let mut options = source.into_options()?;
            options.out = out;
            package::package(&options)?;
        }

        Commands::Ls { source, sizes } => {
            let options = source.into_options()?;
            ls::ls(&options, sizes)?;
        }

        Commands::Verify { file } => {
            verify::verify(&file)?;
        }

        Commands::Show { file, members } => {
            show::show(&file, members)?;
        }
    }

    Ok(())
}
