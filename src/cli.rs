// Command-line front end for apspatch.
//
// Subcommands mirror the classic n64 APS tooling: `single` works on one
// image/patch, `multi` fans out over directories. Both resolve into a flat
// Options struct before dispatch.

use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use indicatif::{ProgressBar, ProgressStyle};

use crate::aps::decoder::ApplyOptions;
use crate::aps::header::{APS_MAGIC, HEADER_LEN, IMAGE_CART_ID_OFFSET, IMAGE_CRC_OFFSET};
use crate::aps::identify::{PATCH_EXTENSION, PatchId};
use crate::aps::record::{MAX_RECORD_LEN, Record};
use crate::batch::{self, BatchReport, IMAGE_EXTENSION};
use crate::io::{self, PatchError};

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Create, apply and rename APS cartridge-image patches.
#[derive(Parser, Debug)]
#[command(
    name = "apspatch",
    version,
    about = "APS patch creator/applier for cartridge images",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Process a single rom and/or patch.
    #[command(subcommand)]
    Single(SingleCmd),
    /// Process directories of roms and/or patches.
    #[command(subcommand)]
    Multi(MultiCmd),
    /// Print a patch's header and records.
    Info(InfoArgs),
    /// Print build/configuration details.
    Config,
}

#[derive(Subcommand, Debug)]
enum SingleCmd {
    /// Create patch.
    Create(CreateArgs),
    /// Apply patch.
    Apply(ApplyArgs),
    /// Rename patch (CRC HI).
    Rename(RenameArgs),
}

#[derive(Subcommand, Debug)]
enum MultiCmd {
    /// Create patches.
    Create(CreateDirArgs),
    /// Apply patches.
    Apply(ApplyDirArgs),
    /// Rename patches (CRC HI).
    Rename(RenameDirArgs),
}

#[derive(Args, Debug)]
struct OutDirArg {
    /// Path of out dir.
    #[arg(long = "out-dir", short = 'o', value_name = "DIR", value_hint = ValueHint::DirPath, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Args, Debug)]
struct CreateArgs {
    /// Path of rom file.
    #[arg(long, short = 'r', value_name = "ROM", value_hint = ValueHint::FilePath)]
    rom: PathBuf,

    /// Path of patched rom file.
    #[arg(long = "patched-rom", short = 'p', value_name = "ROM", value_hint = ValueHint::FilePath)]
    patched_rom: PathBuf,

    #[command(flatten)]
    out: OutDirArg,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Path of rom file.
    #[arg(long, short = 'r', value_name = "ROM", value_hint = ValueHint::FilePath)]
    rom: PathBuf,

    /// Path of aps patch.
    #[arg(long, short = 'p', value_name = "PATCH", value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// Resize the output to the length recorded in the patch header.
    #[arg(long)]
    resize: bool,

    #[command(flatten)]
    out: OutDirArg,
}

#[derive(Args, Debug)]
struct RenameArgs {
    /// Path of aps patch.
    #[arg(long, short = 'p', value_name = "PATCH", value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    #[command(flatten)]
    out: OutDirArg,
}

#[derive(Args, Debug)]
struct CreateDirArgs {
    /// Path of roms dir.
    #[arg(long = "rom-dir", short = 'r', value_name = "DIR", value_hint = ValueHint::DirPath)]
    rom_dir: PathBuf,

    /// Path of patched roms dir.
    #[arg(long = "patched-dir", short = 'p', value_name = "DIR", value_hint = ValueHint::DirPath)]
    patched_dir: PathBuf,

    #[command(flatten)]
    out: OutDirArg,
}

#[derive(Args, Debug)]
struct ApplyDirArgs {
    /// Path of roms dir.
    #[arg(long = "rom-dir", short = 'r', value_name = "DIR", value_hint = ValueHint::DirPath)]
    rom_dir: PathBuf,

    /// Path of patches dir.
    #[arg(long = "patch-dir", short = 'p', value_name = "DIR", value_hint = ValueHint::DirPath)]
    patch_dir: PathBuf,

    /// Resize outputs to the length recorded in each patch header.
    #[arg(long)]
    resize: bool,

    #[command(flatten)]
    out: OutDirArg,
}

#[derive(Args, Debug)]
struct RenameDirArgs {
    /// Path of patches dir.
    #[arg(long = "patch-dir", short = 'p', value_name = "DIR", value_hint = ValueHint::DirPath)]
    patch_dir: PathBuf,

    #[command(flatten)]
    out: OutDirArg,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// APS patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// List every record.
    #[arg(long)]
    records: bool,
}

// ---------------------------------------------------------------------------
// Resolved command + options (flattened from Cli)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Create { rom: PathBuf, modified: PathBuf },
    Apply { rom: PathBuf, patch: PathBuf },
    Rename { patch: PathBuf },
    CreateMulti { rom_dir: PathBuf, modified_dir: PathBuf },
    ApplyMulti { rom_dir: PathBuf, patch_dir: PathBuf },
    RenameMulti { patch_dir: PathBuf },
    Info { patch: PathBuf, list_records: bool },
    Config,
}

#[derive(Debug)]
struct Options {
    command: Command,
    force: bool,
    quiet: bool,
    verbose: u8,
    json_output: bool,
    resize: bool,
    out_dir: PathBuf,
}

impl Options {
    fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            resize: self.resize,
            overwrite: self.force,
        }
    }
}

fn resolve_options(cli: Cli) -> Options {
    let here = PathBuf::from(".");
    let (command, out_dir, resize) = match cli.command {
        Cmd::Single(SingleCmd::Create(args)) => (
            Command::Create {
                rom: args.rom,
                modified: args.patched_rom,
            },
            args.out.out_dir,
            false,
        ),
        Cmd::Single(SingleCmd::Apply(args)) => (
            Command::Apply {
                rom: args.rom,
                patch: args.patch,
            },
            args.out.out_dir,
            args.resize,
        ),
        Cmd::Single(SingleCmd::Rename(args)) => (
            Command::Rename { patch: args.patch },
            args.out.out_dir,
            false,
        ),
        Cmd::Multi(MultiCmd::Create(args)) => (
            Command::CreateMulti {
                rom_dir: args.rom_dir,
                modified_dir: args.patched_dir,
            },
            args.out.out_dir,
            false,
        ),
        Cmd::Multi(MultiCmd::Apply(args)) => (
            Command::ApplyMulti {
                rom_dir: args.rom_dir,
                patch_dir: args.patch_dir,
            },
            args.out.out_dir,
            args.resize,
        ),
        Cmd::Multi(MultiCmd::Rename(args)) => (
            Command::RenameMulti {
                patch_dir: args.patch_dir,
            },
            args.out.out_dir,
            false,
        ),
        Cmd::Info(args) => (
            Command::Info {
                patch: args.patch,
                list_records: args.records,
            },
            here,
            false,
        ),
        Cmd::Config => (Command::Config, here, false),
    };

    Options {
        command,
        force: cli.force,
        quiet: cli.quiet,
        verbose: cli.verbose.min(2),
        json_output: cli.json_output,
        resize,
        out_dir,
    }
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("apspatch".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let _ = resolve_options(cli);
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn check_dir(dir: &Path, what: &str) -> Result<(), i32> {
    if dir.is_dir() {
        Ok(())
    } else {
        eprintln!("apspatch: {what} is not a directory: {}", dir.display());
        Err(1)
    }
}

fn file_name(path: &Path) -> &Path {
    path.file_name().map_or(path, Path::new)
}

fn report_error(err: &PatchError) -> i32 {
    eprintln!("apspatch: {err}");
    1
}

fn print_elapsed(opts: &Options, started: Instant) {
    if !opts.quiet {
        eprintln!(
            "apspatch: completed in {:.3} seconds",
            started.elapsed().as_secs_f64()
        );
    }
}

fn hex_digest(digest: &Option<[u8; 32]>) -> Option<String> {
    digest.as_ref().map(hex::encode_upper)
}

fn emit_json(value: serde_json::Value) {
    match serde_json::to_string_pretty(&value) {
        Ok(s) => eprintln!("{s}"),
        Err(e) => eprintln!("apspatch: json error: {e}"),
    }
}

fn progress_bar(opts: &Options, total: usize, message: String) -> ProgressBar {
    if opts.quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.green/red} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    pb.set_style(style);
    pb.set_message(message);
    pb
}

// ---------------------------------------------------------------------------
// Single commands
// ---------------------------------------------------------------------------

fn cmd_create(opts: &Options, rom: &Path, modified: &Path) -> i32 {
    if let Err(code) = check_dir(opts.out_dir.as_path(), "out dir") {
        return code;
    }

    let started = Instant::now();
    let patch_path = opts
        .out_dir
        .join(batch::swap_extension(file_name(rom), PATCH_EXTENSION));

    let stats = match io::create_file(rom, modified, &patch_path, opts.force) {
        Ok(s) => s,
        Err(e) => return report_error(&e),
    };

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "apspatch: create: original size: {}, modified size: {}, patch size: {}, \
             records: {} literal / {} run-length",
            stats.original_size,
            stats.modified_size,
            stats.patch_size,
            stats.records.literal_records,
            stats.records.run_records
        );
    }

    if opts.json_output {
        emit_json(serde_json::json!({
            "command": "create",
            "patch": patch_path.display().to_string(),
            "original_size": stats.original_size,
            "modified_size": stats.modified_size,
            "patch_size": stats.patch_size,
            "literal_records": stats.records.literal_records,
            "run_records": stats.records.run_records,
            "modified_sha256": hex_digest(&stats.modified_sha256),
        }));
    }

    print_elapsed(opts, started);
    0
}

fn cmd_apply(opts: &Options, rom: &Path, patch: &Path) -> i32 {
    if let Err(code) = check_dir(opts.out_dir.as_path(), "out dir") {
        return code;
    }

    let started = Instant::now();
    let output = opts.out_dir.join(file_name(rom));

    let stats = match io::apply_file(rom, patch, &output, &opts.apply_options()) {
        Ok(s) => s,
        Err(e) => return report_error(&e),
    };

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "apspatch: apply: image size: {}, patch size: {}, output size: {}, records: {}",
            stats.image_size,
            stats.patch_size,
            stats.output_size,
            stats.records.records()
        );
    }

    if opts.json_output {
        emit_json(serde_json::json!({
            "command": "apply",
            "output": output.display().to_string(),
            "image_size": stats.image_size,
            "patch_size": stats.patch_size,
            "output_size": stats.output_size,
            "records": stats.records.records(),
            "output_sha256": hex_digest(&stats.output_sha256),
        }));
    }

    print_elapsed(opts, started);
    0
}

fn cmd_rename(opts: &Options, patch: &Path) -> i32 {
    if let Err(code) = check_dir(opts.out_dir.as_path(), "out dir") {
        return code;
    }

    let started = Instant::now();
    let dest = match io::rename_file(patch, &opts.out_dir, opts.force) {
        Ok(d) => d,
        Err(e) => return report_error(&e),
    };

    if opts.verbose > 0 && !opts.quiet {
        eprintln!("apspatch: rename: {} -> {}", patch.display(), dest.display());
    }
    if opts.json_output {
        emit_json(serde_json::json!({
            "command": "rename",
            "patch": patch.display().to_string(),
            "output": dest.display().to_string(),
        }));
    }

    print_elapsed(opts, started);
    0
}

// ---------------------------------------------------------------------------
// Multi commands
// ---------------------------------------------------------------------------

fn finish_batch(opts: &Options, command: &str, started: Instant, report: &BatchReport) -> i32 {
    for failure in &report.failures {
        eprintln!("apspatch: {}", failure.error);
    }

    if opts.json_output {
        let failures: Vec<_> = report
            .failures
            .iter()
            .map(|f| {
                serde_json::json!({
                    "item": f.item.display().to_string(),
                    "error": f.error.to_string(),
                })
            })
            .collect();
        emit_json(serde_json::json!({
            "command": command,
            "succeeded": report.succeeded.len(),
            "failed": report.failures.len(),
            "failures": failures,
        }));
    }

    print_elapsed(opts, started);
    if report.is_success() { 0 } else { 1 }
}

fn cmd_create_multi(opts: &Options, rom_dir: &Path, modified_dir: &Path) -> i32 {
    for (dir, what) in [(rom_dir, "rom dir"), (modified_dir, "patched dir"), (opts.out_dir.as_path(), "out dir")] {
        if let Err(code) = check_dir(dir, what) {
            return code;
        }
    }

    let started = Instant::now();
    let total = match batch::list_files(modified_dir) {
        Ok(files) => files.len(),
        Err(e) => return report_error(&e),
    };
    let pb = progress_bar(
        opts,
        total,
        format!("Writing patches to {}", opts.out_dir.display()),
    );

    let report = batch::create_batch(
        rom_dir,
        modified_dir,
        &opts.out_dir,
        batch::same_name,
        opts.force,
        |_| pb.inc(1),
    );
    pb.finish_and_clear();

    match report {
        Ok(report) => finish_batch(opts, "multi create", started, &report),
        Err(e) => report_error(&e),
    }
}

fn cmd_apply_multi(opts: &Options, rom_dir: &Path, patch_dir: &Path) -> i32 {
    for (dir, what) in [(rom_dir, "rom dir"), (patch_dir, "patch dir"), (opts.out_dir.as_path(), "out dir")] {
        if let Err(code) = check_dir(dir, what) {
            return code;
        }
    }

    let started = Instant::now();
    let total = match batch::list_files(patch_dir) {
        Ok(files) => files.len(),
        Err(e) => return report_error(&e),
    };
    let pb = progress_bar(
        opts,
        total,
        format!("Writing roms to {}", opts.out_dir.display()),
    );

    let report = batch::apply_batch(
        rom_dir,
        patch_dir,
        &opts.out_dir,
        batch::image_for_patch,
        &opts.apply_options(),
        |_| pb.inc(1),
    );
    pb.finish_and_clear();

    match report {
        Ok(report) => finish_batch(opts, "multi apply", started, &report),
        Err(e) => report_error(&e),
    }
}

fn cmd_rename_multi(opts: &Options, patch_dir: &Path) -> i32 {
    for (dir, what) in [(patch_dir, "patch dir"), (opts.out_dir.as_path(), "out dir")] {
        if let Err(code) = check_dir(dir, what) {
            return code;
        }
    }

    let started = Instant::now();
    match batch::rename_batch(patch_dir, &opts.out_dir, opts.force, |_| {}) {
        Ok(report) => finish_batch(opts, "multi rename", started, &report),
        Err(e) => report_error(&e),
    }
}

// ---------------------------------------------------------------------------
// Info command
// ---------------------------------------------------------------------------

fn cmd_info(opts: &Options, patch: &Path, list_records: bool) -> i32 {

    let (header, records) = match io::inspect_file(patch) {
        Ok(r) => r,
        Err(e) => return report_error(&e),
    };

    let literal = records
        .iter()
        .filter(|r| matches!(r, Record::Literal { .. }))
        .count();
    let run = records.len() - literal;
    let covered: u64 = records.iter().map(|r| r.len() as u64).sum();

    println!("Patch:            {}", patch.display());
    println!("Description:      {}", header.description_text());
    println!("Format type:      {:#04X}", header.format);
    println!("Cartridge ID:     {}", header.cart_id);
    println!("Image CRC:        {}", header.crc);
    println!(
        "Canonical name:   {}",
        PatchId::from_crc(&header.crc).file_name()
    );
    println!("Modified length:  {}", header.modified_len);
    println!("Records:          {} ({literal} literal, {run} run-length)", records.len());
    println!("Bytes covered:    {covered}");

    if list_records {
        println!();
        println!("  Offset      Kind        Length  Data");
        for record in &records {
            match record {
                Record::Literal { offset, data } => {
                    let shown = &data[..data.len().min(16)];
                    let ellipsis = if data.len() > shown.len() { "..." } else { "" };
                    println!(
                        "  {offset:#010X}  literal     {:>6}  {}{ellipsis}",
                        data.len(),
                        hex::encode_upper(shown)
                    );
                }
                Record::RunLength {
                    offset,
                    fill,
                    count,
                } => {
                    println!("  {offset:#010X}  run-length  {count:>6}  {fill:02X}");
                }
            }
        }
    }

    if opts.json_output {
        emit_json(serde_json::json!({
            "command": "info",
            "format": header.format,
            "cart_id": header.cart_id.to_string(),
            "crc": header.crc.to_string(),
            "modified_len": header.modified_len,
            "literal_records": literal,
            "run_records": run,
            "bytes_covered": covered,
        }));
    }

    0
}

// ---------------------------------------------------------------------------
// Config command
// ---------------------------------------------------------------------------

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("apspatch version {version} (Rust)");
    eprintln!("Licensed under the MIT License");

    let file_io = cfg!(feature = "file-io") as u8;
    let parallel = cfg!(feature = "parallel") as u8;

    eprintln!("FILE_IO={file_io}");
    eprintln!("PARALLEL={parallel}");
    eprintln!("APS_MAGIC={}", hex::encode_upper(APS_MAGIC));
    eprintln!("HEADER_LEN={HEADER_LEN}");
    eprintln!("MAX_RECORD_LEN={MAX_RECORD_LEN}");
    eprintln!("IMAGE_CRC_OFFSET={IMAGE_CRC_OFFSET:#X}");
    eprintln!("IMAGE_CART_ID_OFFSET={IMAGE_CART_ID_OFFSET:#X}");
    eprintln!("IMAGE_EXTENSION={IMAGE_EXTENSION}");
    eprintln!("PATCH_EXTENSION={PATCH_EXTENSION}");

    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();
    let opts = resolve_options(cli);

    let default_filter = match opts.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let exit_code = match &opts.command {
        Command::Create { rom, modified } => cmd_create(&opts, rom, modified),
        Command::Apply { rom, patch } => cmd_apply(&opts, rom, patch),
        Command::Rename { patch } => cmd_rename(&opts, patch),
        Command::CreateMulti {
            rom_dir,
            modified_dir,
        } => cmd_create_multi(&opts, rom_dir, modified_dir),
        Command::ApplyMulti { rom_dir, patch_dir } => cmd_apply_multi(&opts, rom_dir, patch_dir),
        Command::RenameMulti { patch_dir } => cmd_rename_multi(&opts, patch_dir),
        Command::Info {
            patch,
            list_records,
        } => cmd_info(&opts, patch, *list_records),
        Command::Config => cmd_config(),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
