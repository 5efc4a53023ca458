//! Command dispatch
//!
//! Path arguments are client tokens (`%2Fmovies`) unless `--plain` is given,
//! in which case they are root-relative paths and get encoded first.

use anyhow::{Context, Result};
use app_core::{AppConfig, AppError, FileSystem, Reply, UploadReceipt};
use app_fs::{CancelToken, MediaKind, PathCodec};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "qloud", version, about = "Sandboxed media library over one storage root")]
pub struct Cli {
    /// Storage root (overrides config and QLOUD_ROOT)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Configuration file to use instead of the default one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path arguments are plain root-relative paths, not encoded tokens
    #[arg(long, global = true)]
    pub plain: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show a folder listing or file details
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Search entry names (case-insensitive)
    Search { query: String },
    /// List every file of a media kind
    Find { kind: MediaKind },
    /// Create a folder
    Mkdir { parent: String, name: String },
    /// Upload a local file in chunks
    Upload {
        parent: String,
        file: PathBuf,
        /// Name to store the file under
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value_t = 1024 * 1024)]
        chunk_size: usize,
        /// Send chunks last to first
        #[arg(long)]
        reverse: bool,
    },
    /// Delete entries
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Move entries into a folder
    Mv {
        dest: String,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Rename an entry inside a folder
    Rename { parent: String, old: String, new: String },
    /// Folder picker for a path
    Subfolders {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Remove staged chunks left behind by interrupted uploads
    Sweep,
    /// Encode a root-relative path into a token
    Encode { path: String },
    /// Decode a token into its location on disk
    Decode { token: String },
    /// Print the effective configuration
    Config {
        /// Also write it to the configuration file
        #[arg(long)]
        save: bool,
    },
}

/// Run one command and print its reply
pub fn run(cli: Cli, config: AppConfig) -> Result<ExitCode> {
    let plain = cli.plain;
    let token = |arg: &str| -> String {
        if plain {
            PathCodec::encode(arg).into_string()
        } else {
            arg.to_string()
        }
    };
    let open = || -> Result<FileSystem> {
        let qloud = match &cli.root {
            Some(root) => FileSystem::open_at(root, &config)?,
            None => FileSystem::open(&config)?,
        };
        Ok(qloud)
    };
    let cancel = CancelToken::new();

    match &cli.command {
        Command::Ls { path } => print(&Reply::from(open()?.resolve(&token(path), &cancel))),
        Command::Search { query } => print(&Reply::from(open()?.search(query, &cancel))),
        Command::Find { kind } => print(&Reply::from(open()?.find_by_kind(*kind, &cancel))),
        Command::Mkdir { parent, name } => print(&Reply::from(open()?.create_folder(&token(parent), name))),
        Command::Upload {
            parent,
            file,
            name,
            chunk_size,
            reverse,
        } => {
            let plan = UploadPlan::read(file, name.as_deref(), *chunk_size, *reverse)?;
            print(&plan.send(&open()?, &token(parent)))
        }
        Command::Rm { paths } => {
            let tokens: Vec<String> = paths.iter().map(|p| token(p)).collect();
            print(&Reply::batch(open()?.delete(&tokens), "Deleted"))
        }
        Command::Mv { dest, paths } => {
            let tokens: Vec<String> = paths.iter().map(|p| token(p)).collect();
            match open()?.move_entries(&tokens, &token(dest)) {
                Ok(report) => print(&Reply::batch(report, "Moved")),
                Err(e) => print(&Reply::<()>::from(Err(e))),
            }
        }
        Command::Rename { parent, old, new } => {
            let mut reply = Reply::from(open()?.rename(&token(parent), old, new));
            if reply.ok {
                reply = reply.with_message(format!("Renamed '{}' to '{}'", old, new));
            }
            print(&reply)
        }
        Command::Subfolders { path } => print(&Reply::from(open()?.list_subfolders(&token(path)))),
        Command::Sweep => print(&Reply::success(open()?.sweep_uploads())),
        Command::Encode { path } => print(&Reply::success(PathCodec::encode(path))),
        Command::Decode { token: raw } => {
            let qloud = open()?;
            let decoded = qloud
                .codec()
                .decode(raw)
                .map(|p| p.to_path_buf())
                .map_err(AppError::from);
            print(&Reply::from(decoded))
        }
        Command::Config { save } => {
            if *save {
                config.save()?;
            }
            let path = AppConfig::config_path();
            print(&Reply::success(&config).with_message(path.display().to_string()))
        }
    }
}

fn print<T: Serialize>(reply: &Reply<T>) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(reply)?);
    Ok(if reply.ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// A local file split into upload chunks
struct UploadPlan {
    name: String,
    bytes: Vec<u8>,
    chunk_size: usize,
    reverse: bool,
}

impl UploadPlan {
    fn read(file: &Path, name: Option<&str>, chunk_size: usize, reverse: bool) -> Result<Self> {
        let bytes = std::fs::read(file).with_context(|| format!("cannot read {}", file.display()))?;
        let name = match name {
            Some(name) => name.to_string(),
            None => file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .context("upload needs a file name")?,
        };

        Ok(Self {
            name,
            bytes,
            chunk_size: chunk_size.max(1),
            reverse,
        })
    }

    fn chunks(&self) -> Vec<&[u8]> {
        if self.bytes.is_empty() {
            vec![&self.bytes[..]]
        } else {
            self.bytes.chunks(self.chunk_size).collect()
        }
    }

    /// Send every chunk; the reply carries the last receipt or the first error
    fn send(&self, qloud: &FileSystem, parent: &str) -> Reply<UploadReceipt> {
        let chunks = self.chunks();
        let total = match u32::try_from(chunks.len()) {
            Ok(total) => total,
            Err(_) => return Reply::failure("file has too many chunks for this chunk size"),
        };

        let mut order: Vec<u32> = (0..total).collect();
        if self.reverse {
            order.reverse();
        }

        let mut last = None;
        for index in order {
            match qloud.upload_chunk(parent, &self.name, index, total, chunks[index as usize]) {
                Ok(receipt) => {
                    tracing::debug!(index, total, "Chunk sent");
                    last = Some(receipt);
                }
                Err(e) => return Reply::from(Err(e)),
            }
        }

        match last {
            Some(receipt) => Reply::success(receipt),
            None => Reply::failure("nothing was uploaded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["qloud", "--plain", "mv", "/dest", "/a", "/b"]).unwrap();
        assert!(cli.plain);
        match cli.command {
            Command::Mv { dest, paths } => {
                assert_eq!(dest, "/dest");
                assert_eq!(paths, vec!["/a", "/b"]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let cli = Cli::try_parse_from(["qloud", "find", "video"]).unwrap();
        assert!(matches!(cli.command, Command::Find { kind: MediaKind::Video }));

        assert!(Cli::try_parse_from(["qloud", "find", "podcast"]).is_err());
        assert!(Cli::try_parse_from(["qloud", "rm"]).is_err());
        // sessions only live inside one process, so there is nothing to abandon from here
        assert!(Cli::try_parse_from(["qloud", "abandon", "00ff"]).is_err());
    }

    #[test]
    fn test_upload_plan_chunks() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("clip.mp4");
        std::fs::write(&file, b"0123456789").unwrap();

        let plan = UploadPlan::read(&file, None, 4, false).unwrap();
        assert_eq!(plan.name, "clip.mp4");
        assert_eq!(plan.chunks(), vec![&b"0123"[..], &b"4567"[..], &b"89"[..]]);

        let empty = temp.path().join("empty.bin");
        std::fs::write(&empty, b"").unwrap();
        assert_eq!(UploadPlan::read(&empty, Some("x.bin"), 0, false).unwrap().chunks().len(), 1);
    }

    #[test]
    fn test_reverse_upload_assembles() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("movie.mp4");
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        std::fs::write(&file, &data).unwrap();

        let qloud = FileSystem::open_at(&temp.path().join("root"), &AppConfig::default()).unwrap();
        let plan = UploadPlan::read(&file, None, 128, true).unwrap();
        let reply = plan.send(&qloud, "%2Fuploads");

        assert!(reply.ok);
        assert!(matches!(reply.data, Some(UploadReceipt::Complete { .. })));
        assert_eq!(std::fs::read(qloud.root().join("uploads/movie.mp4")).unwrap(), data);
    }
}
