//! VFS CLI - a line shell over the drive-letter filesystem.
//!
//! Usage:
//!   vfs [--config drives.json] [--package LETTER=zip]... [-- command...]
//!
//! Examples:
//!   vfs                                   # Default drives, interactive shell
//!   vfs --package A=site.zip              # Install site.zip onto A: first
//!   vfs -- "mkdir A:/docs" "ls A:/"       # Run commands and exit
//!   RUST_LOG=vfs_core=debug vfs           # Trace drive operations

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use vfs_core::{path::parse_letter, DriveSize, EntryKind, FileContent, FileSystem, VfsConfig};

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Drive-letter virtual filesystem shell
#[derive(Parser, Debug)]
#[command(name = "vfs")]
#[command(about = "Explore a drive-letter virtual filesystem")]
struct Args {
    /// JSON drive configuration (defaults to A: memory, B: transactional, C: blob cache)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Install a ZIP package onto a drive, as LETTER=PATH
    #[arg(short, long = "package", value_parser = parse_package_arg)]
    packages: Vec<(char, PathBuf)>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Commands to run instead of the interactive shell
    #[arg(last = true)]
    commands: Vec<String>,
}

fn parse_package_arg(arg: &str) -> Result<(char, PathBuf), String> {
    let (letter, path) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected LETTER=PATH, got '{}'", arg))?;
    let letter = parse_letter(letter).ok_or_else(|| format!("invalid drive letter '{}'", letter))?;
    if path.is_empty() {
        return Err("missing package path".to_string());
    }
    Ok((letter, PathBuf::from(path)))
}

/// Whether the shell keeps reading after a command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

const HELP: &str = "\
Commands:
  drives                      List drives
  df [LETTER]                 Show drive capacity
  ls PATH                     List a directory
  cat PATH                    Print a file
  write PATH TEXT...          Replace a file's content
  append PATH TEXT...         Append to a file
  splice PATH OFFSET TEXT...  Overwrite text at a character offset
  touch PATH                  Create an empty file
  mkdir PATH                  Create a directory
  rm PATH                     Delete a file
  rmdir PATH                  Remove an empty directory
  mv FROM TO                  Move a file or directory (across drives too)
  stat PATH                   Show metadata
  exists PATH                 Check whether a path exists
  help                        Show this help
  exit                        Leave the shell";

fn format_size(size: DriveSize) -> String {
    match size {
        DriveSize::Unbounded => "unbounded".to_string(),
        DriveSize::Limited { used, quota } => format!("{} of {} bytes used", used, quota),
    }
}

fn arg<'a>(args: &[&'a str], index: usize, usage: &str) -> CliResult<&'a str> {
    args.get(index)
        .copied()
        .ok_or_else(|| format!("usage: {}", usage).into())
}

/// Text after the first `skip` words of a command line, spacing preserved.
fn rest_of_line(line: &str, skip: usize) -> &str {
    let mut rest = line.trim_start();
    for _ in 0..skip {
        rest = rest
            .split_once(char::is_whitespace)
            .map(|(_, tail)| tail.trim_start())
            .unwrap_or("");
    }
    rest
}

/// Run one shell command, writing its output to `out`.
fn execute(fs: &FileSystem, line: &str, out: &mut impl Write) -> CliResult<Flow> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&command, args)) = words.split_first() else {
        return Ok(Flow::Continue);
    };
    debug!(command, "running");

    match command {
        "drives" => {
            for letter in fs.get_drives()? {
                writeln!(out, "{}:", letter)?;
            }
        }
        "df" => {
            let letters = match args.first() {
                Some(letter) => {
                    vec![parse_letter(letter).ok_or_else(|| format!("invalid drive letter '{}'", letter))?]
                }
                None => fs.get_drives()?,
            };
            for letter in letters {
                let info = fs.get_drive(letter)?;
                writeln!(out, "{}: {}", info.letter, format_size(info.size))?;
            }
        }
        "ls" => {
            let mut listing = fs.list_directory(arg(args, 0, "ls PATH")?)?;
            listing.sort_by(|a, b| a.name.cmp(&b.name));
            for entry in listing {
                match entry.kind {
                    EntryKind::Directory => writeln!(out, "{}/", entry.name)?,
                    EntryKind::File => writeln!(out, "{}", entry.name)?,
                }
            }
        }
        "cat" => match fs.read_file(arg(args, 0, "cat PATH")?)? {
            FileContent::Json(value) => writeln!(out, "{:#}", value)?,
            FileContent::Text(text) => writeln!(out, "{}", text)?,
        },
        "write" => {
            let path = arg(args, 0, "write PATH TEXT...")?;
            let written = fs.write_file(path, rest_of_line(line, 2))?;
            writeln!(out, "{} characters written", written)?;
        }
        "append" => {
            let path = arg(args, 0, "append PATH TEXT...")?;
            let written = fs.append_file(path, rest_of_line(line, 2))?;
            writeln!(out, "{} characters appended", written)?;
        }
        "splice" => {
            let usage = "splice PATH OFFSET TEXT...";
            let path = arg(args, 0, usage)?;
            let offset: usize = arg(args, 1, usage)?
                .parse()
                .map_err(|_| format!("usage: {}", usage))?;
            let written = fs.write_at(path, offset, rest_of_line(line, 3))?;
            writeln!(out, "{} characters written at {}", written, offset)?;
        }
        "touch" => fs.create_file(arg(args, 0, "touch PATH")?)?,
        "mkdir" => fs.create_directory(arg(args, 0, "mkdir PATH")?)?,
        "rm" => fs.delete_file(arg(args, 0, "rm PATH")?)?,
        "rmdir" => fs.remove_directory(arg(args, 0, "rmdir PATH")?)?,
        "mv" => fs.rename(arg(args, 0, "mv FROM TO")?, arg(args, 1, "mv FROM TO")?)?,
        "stat" => {
            let meta = fs.stat(arg(args, 0, "stat PATH")?)?;
            writeln!(out, "kind:     {:?}", meta.kind)?;
            writeln!(out, "size:     {}", meta.size)?;
            writeln!(out, "created:  {}", meta.created)?;
            writeln!(out, "modified: {}", meta.modified)?;
            writeln!(out, "accessed: {}", meta.accessed)?;
        }
        "exists" => writeln!(out, "{}", fs.exists(arg(args, 0, "exists PATH")?)?)?,
        "help" => writeln!(out, "{}", HELP)?,
        "exit" | "quit" => return Ok(Flow::Exit),
        other => return Err(format!("unknown command '{}' (try 'help')", other).into()),
    }
    Ok(Flow::Continue)
}

/// Interactive loop: errors are reported and the shell continues.
fn run_shell(fs: &FileSystem) -> CliResult<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut lines = stdin.lock().lines();

    loop {
        write!(stdout, "vfs> ")?;
        stdout.flush()?;
        let Some(line) = lines.next() else {
            writeln!(stdout)?;
            return Ok(());
        };
        match execute(fs, &line?, &mut stdout) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => return Ok(()),
            Err(e) => eprintln!("Error: {}", e),
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = match &args.config {
        Some(path) => VfsConfig::from_path(path)?,
        None => VfsConfig::default(),
    };
    for (letter, path) in &args.packages {
        config.drive_mut(*letter).packages.push(path.clone());
    }

    let commands = args.commands;

    // Filesystem calls block; keep them off the async runtime.
    let shell = tokio::task::spawn_blocking(move || -> CliResult<()> {
        let fs = config.build()?;
        if commands.is_empty() {
            return run_shell(&fs);
        }

        let mut stdout = std::io::stdout();
        for line in &commands {
            match execute(&fs, line, &mut stdout) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break,
                Err(e) => {
                    error!(command = %line, "command failed");
                    return Err(e);
                }
            }
        }
        Ok(())
    });

    shell.await?
}
