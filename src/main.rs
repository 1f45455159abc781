use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use evidence_walk::common::HashAlgorithm;
use evidence_walk::container::{ContainerInfo, EvidenceContainer, ImageKind};
use evidence_walk::error::{EvidenceError, EvidenceResult};
use evidence_walk::evidence::{Evidence, EvidenceOptions, HashList, MountFailure, VolumeSummary};
use evidence_walk::filesystem::Mounter;
use evidence_walk::report::{format_time, ListingWriter, MatchWriter};
use evidence_walk::volume::{PartitionTable, TableScheme};
use evidence_walk::walker::{ExtensionFilter, MatchLogic};

/// Walk the filesystems inside raw and EWF evidence images
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Evidence format; sniffed from the file signature when omitted
    #[arg(short = 't', long = "type", global = true, value_name = "raw|ewf")]
    image_type: Option<ImageKind>,

    /// Partition table scheme; every scheme is tried when omitted
    #[arg(short = 'p', long = "partition-table", global = true, value_name = "DOS|GPT|MAC|SUN")]
    table: Option<TableScheme>,

    /// Verbose logging with file and line
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show container metadata, the partition table and mounted volumes
    Info {
        evidence: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List one directory
    Ls {
        evidence: PathBuf,
        /// Mount the filesystem at this sector offset instead of reading the partition table
        #[arg(short, long)]
        offset: Option<u64>,
        #[arg(long, default_value = "/")]
        path: String,
    },
    /// Write a CSV metadata listing of every entry
    List {
        evidence: PathBuf,
        output: PathBuf,
        #[arg(long, default_value = "/")]
        path: String,
    },
    /// Copy files with the given extensions out of the evidence
    Extract {
        evidence: PathBuf,
        /// Comma-delimited, e.g. `txt,docx,evtx`
        extensions: String,
        output: PathBuf,
        #[arg(long, default_value = "/")]
        path: String,
    },
    /// Hash every file and report digests found in a hash list
    Hashscan {
        evidence: PathBuf,
        hash_list: PathBuf,
        /// JSON Lines match report; matches are printed to stdout otherwise
        #[arg(long)]
        output: Option<PathBuf>,
        /// Digest algorithm of the list; inferred from digest length when omitted
        #[arg(long, value_name = "md5|sha1|sha256|sha512|blake3")]
        algorithm: Option<HashAlgorithm>,
    },
    /// Find files by name
    Find {
        evidence: PathBuf,
        pattern: String,
        #[arg(long, default_value = "equal")]
        logic: MatchLogic,
        #[arg(long)]
        case_sensitive: bool,
        #[arg(long, default_value = "/")]
        path: String,
    },
}

/// Outcome of a command that ran but may have found nothing
enum Outcome {
    Found,
    Empty,
}

const EXIT_BAD_INPUT: u8 = 1;
const EXIT_CONTAINER: u8 = 2;
const EXIT_NO_RESULTS: u8 = 3;
const EXIT_IO: u8 = 4;

fn exit_code(err: &EvidenceError) -> u8 {
    match err {
        EvidenceError::InvalidArgument(_) => EXIT_BAD_INPUT,
        EvidenceError::Container(_) => EXIT_CONTAINER,
        EvidenceError::PartitionTable(_)
        | EvidenceError::FilesystemMount { .. }
        | EvidenceError::Directory { .. } => EXIT_NO_RESULTS,
        EvidenceError::DirectoryEntry(_) | EvidenceError::ContentRead { .. } | EvidenceError::Io(_) => EXIT_IO,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Control log level with RUST_LOG, e.g.
    //   RUST_LOG=evidence_walk::walker=trace evidence-walk find image.E01 SAM
    if cli.verbose {
        evidence_walk::logging::init_verbose();
    } else {
        evidence_walk::logging::init();
    }

    match run(&cli) {
        Ok(Outcome::Found) => ExitCode::SUCCESS,
        Ok(Outcome::Empty) => ExitCode::from(EXIT_NO_RESULTS),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("[-] {}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn require_file(path: &Path, what: &str) -> EvidenceResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(EvidenceError::InvalidArgument(format!("{} {} not found", what, path.display())))
    }
}

fn run(cli: &Cli) -> EvidenceResult<Outcome> {
    let options = EvidenceOptions {
        image_kind: cli.image_type,
        table_hint: cli.table,
        ..EvidenceOptions::default()
    };

    match &cli.command {
        Command::Info { evidence, json } => {
            require_file(evidence, "Evidence file")?;
            let evidence = open_evidence(evidence, &options)?;
            print_info(&evidence, *json)?;
            Ok(Outcome::Found)
        }
        Command::Ls { evidence, offset, path } => {
            require_file(evidence, "Evidence file")?;
            match offset {
                Some(sector) => list_at_offset(evidence, &options, *sector, path),
                None => {
                    let evidence = open_evidence(evidence, &options)?;
                    list_directory(&evidence, path)
                }
            }
        }
        Command::List { evidence, output, path } => {
            require_file(evidence, "Evidence file")?;
            let evidence = open_evidence(evidence, &options)?;
            let mut writer = ListingWriter::create(output)?;
            let stats = evidence.list_entries(path, |volume, item| writer.write_entry(volume, item))?;
            let rows = writer.rows();
            writer.finish()?;
            info!(
                rows,
                skipped = stats.entries_skipped,
                unreadable_dirs = stats.directories_unreadable,
                cycles = stats.cycles_skipped,
                "Listing written"
            );
            println!("[+] Wrote {} rows to {}", rows, output.display());
            Ok(if rows == 0 { Outcome::Empty } else { Outcome::Found })
        }
        Command::Extract {
            evidence,
            extensions,
            output,
            path,
        } => {
            require_file(evidence, "Evidence file")?;
            let filter = ExtensionFilter::parse(extensions);
            let evidence = open_evidence(evidence, &options)?;
            let report = evidence.extract_by_extension(&filter, path, output)?;
            for file in &report.extracted {
                println!("[+] PARTITION {} {} -> {}", file.partition, file.source, file.destination.display());
            }
            for failed in &report.failed {
                println!("[-] {}: {}", failed.path, failed.reason);
            }
            Ok(if report.extracted.is_empty() { Outcome::Empty } else { Outcome::Found })
        }
        Command::Hashscan {
            evidence,
            hash_list,
            output,
            algorithm,
        } => {
            require_file(evidence, "Evidence file")?;
            require_file(hash_list, "Hash list")?;
            let list = HashList::load(hash_list, *algorithm)?;
            let evidence = open_evidence(evidence, &options)?;

            let mut writer = output.as_deref().map(MatchWriter::create).transpose()?;
            let mut write_error = None;
            let report = evidence.scan_hashes(&list, |found| match writer.as_mut() {
                Some(writer) => {
                    if let Err(e) = writer.write_match(found) {
                        write_error.get_or_insert(e);
                        evidence.cancel_token().cancel();
                    }
                }
                None => println!("[*] MATCH: PARTITION {} {}\n{}", found.partition, found.path, found.digest),
            });
            if let Some(e) = write_error {
                return Err(e);
            }
            info!(
                hashed = report.hashed,
                matches = report.matches,
                failed = report.failed.len(),
                "Hash scan finished"
            );
            Ok(if report.matches == 0 { Outcome::Empty } else { Outcome::Found })
        }
        Command::Find {
            evidence,
            pattern,
            logic,
            case_sensitive,
            path,
        } => {
            require_file(evidence, "Evidence file")?;
            let evidence = open_evidence(evidence, &options)?;
            let report = evidence.recurse_files(pattern, path, *logic, *case_sensitive)?;
            for m in &report.matches {
                println!("PARTITION {}\t{}\t{}", m.partition, m.entry.size, m.path);
            }
            info!(
                matched = report.matches.len(),
                skipped = report.stats.entries_skipped,
                unreadable_dirs = report.stats.directories_unreadable,
                cycles = report.stats.cycles_skipped,
                "Name search finished"
            );
            if report.stats.entries_skipped > 0 || report.stats.directories_unreadable > 0 {
                eprintln!(
                    "[-] {} entries and {} directories could not be read",
                    report.stats.entries_skipped, report.stats.directories_unreadable
                );
            }
            Ok(if report.matches.is_empty() { Outcome::Empty } else { Outcome::Found })
        }
    }
}

/// Open evidence, treating "nothing mounted" as an empty result
fn open_evidence(path: &Path, options: &EvidenceOptions) -> EvidenceResult<Evidence> {
    let evidence = Evidence::open(path, options)?;
    if evidence.volumes().is_empty() {
        let reasons: Vec<String> = evidence
            .mount_failures()
            .iter()
            .map(|f| format!("offset {}: {}", f.offset, f.reason))
            .collect();
        return Err(EvidenceError::FilesystemMount {
            offset: evidence.mount_failures().first().map_or(0, |f| f.offset),
            reason: if reasons.is_empty() {
                "no usable partitions".to_string()
            } else {
                reasons.join("; ")
            },
        });
    }
    Ok(evidence)
}

#[derive(Serialize)]
struct InfoReport<'a> {
    container: ContainerInfo,
    partition_table: Option<&'a PartitionTable>,
    table_error: Option<&'a str>,
    volumes: Vec<VolumeSummary>,
    mount_failures: &'a [MountFailure],
}

fn print_info(evidence: &Evidence, json: bool) -> EvidenceResult<()> {
    let report = InfoReport {
        container: evidence.container().info(),
        partition_table: evidence.partition_table(),
        table_error: evidence.table_error(),
        volumes: evidence.volumes().iter().map(|v| v.summary()).collect(),
        mount_failures: evidence.mount_failures(),
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if json {
        serde_json::to_writer_pretty(&mut out, &report)?;
        writeln!(out)?;
        return Ok(());
    }

    let container = &report.container;
    writeln!(out, "Evidence:    {}", container.path)?;
    writeln!(out, "Type:        {}", container.kind)?;
    writeln!(out, "Size:        {} bytes", container.size)?;
    writeln!(out, "Segments:    {}", container.segments.len())?;
    if let Some(raw) = container.raw.as_ref().filter(|raw| raw.segment_count > 1) {
        for (path, size) in container.segments.iter().zip(&raw.segment_sizes) {
            writeln!(out, "  {:>14}  {}", size, path)?;
        }
    }
    if let Some(ewf) = &container.ewf {
        for (key, value) in &ewf.header_values {
            writeln!(out, "  {:<16} {}", key, value)?;
        }
        if let Some(md5) = &ewf.md5 {
            writeln!(out, "  {:<16} {}", "md5", md5)?;
        }
        if let Some(sha1) = &ewf.sha1 {
            writeln!(out, "  {:<16} {}", "sha1", sha1)?;
        }
    }

    writeln!(out)?;
    match report.partition_table {
        Some(table) => {
            writeln!(out, "{} partition table, {} byte sectors", table.scheme, table.block_size)?;
            writeln!(out, "{:>4}  {:>12}  {:>12}  {:>12}  Description", "Addr", "Start", "End", "Length")?;
            for p in &table.partitions {
                writeln!(
                    out,
                    "{:>4}  {:>12}  {:>12}  {:>12}  {}",
                    p.addr,
                    p.start,
                    p.end().saturating_sub(1),
                    p.length,
                    p.description
                )?;
            }
        }
        None => match report.table_error {
            Some(reason) => writeln!(out, "Partition table unreadable ({}); whole image mounted", reason)?,
            None => writeln!(out, "No partition table; whole image mounted")?,
        },
    }

    writeln!(out)?;
    for volume in &report.volumes {
        writeln!(
            out,
            "PARTITION {}: {} at byte offset {}",
            volume.label, volume.filesystem, volume.offset
        )?;
    }
    for failure in report.mount_failures {
        writeln!(out, "Not mounted: offset {}: {}", failure.offset, failure.reason)?;
    }
    Ok(())
}

fn list_directory(evidence: &Evidence, path: &str) -> EvidenceResult<Outcome> {
    let listings = evidence.query_directory(path);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for listing in &listings {
        writeln!(out, "PARTITION {} {}", listing.partition, listing.path)?;
        for entry in &listing.entries {
            writeln!(
                out,
                "  {:<5} {:>12}  {:<19}  {:<19}  {}",
                if entry.is_dir() { "DIR" } else { "FILE" },
                entry.size,
                format_time(entry.times.created),
                format_time(entry.times.modified),
                entry.name
            )?;
        }
        if listing.unreadable > 0 {
            writeln!(out, "  ({} entries unreadable)", listing.unreadable)?;
        }
    }
    Ok(if listings.is_empty() { Outcome::Empty } else { Outcome::Found })
}

/// Mount the filesystem at a sector offset, bypassing the partition table
fn list_at_offset(path: &Path, options: &EvidenceOptions, sector: u64, dir: &str) -> EvidenceResult<Outcome> {
    let container = Arc::new(EvidenceContainer::open_with(path, options.image_kind, &options.container)?);
    let offset = sector * container.sector_size() as u64;
    let fs = Mounter::default().mount(&container, offset)?;
    let directory = fs.open_directory(dir)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{} at byte offset {} {}", fs.type_name(), offset, dir)?;
    let mut listed = 0;
    for child in fs.entries(&directory)? {
        match child {
            Ok(entry) if entry.is_pseudo() => {}
            Ok(entry) => {
                listed += 1;
                writeln!(
                    out,
                    "  {:<5} {:>12}  {:<19}  {:<19}  {}",
                    if entry.is_dir() { "DIR" } else { "FILE" },
                    entry.size,
                    format_time(entry.times.created),
                    format_time(entry.times.modified),
                    entry.name
                )?;
            }
            Err(e) => writeln!(out, "  (unreadable: {})", e)?,
        }
    }
    Ok(if listed == 0 { Outcome::Empty } else { Outcome::Found })
}
