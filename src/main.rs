//! drift CLI - content-addressed snapshot store with static deltas

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use drift::delta::{apply_offline, generate, list_deltas, DeltaConfig};
use drift::ops::{commit, fsck};
use drift::{read_commit, read_file, read_meta, read_tree, Checksum, ObjectKind, Repo};

const MIB: u64 = 1024 * 1024;

#[derive(Parser)]
#[command(name = "drift")]
#[command(about = "content-addressed snapshot store with static deltas")]
#[command(version)]
struct Cli {
    /// repository path
    #[arg(short, long, default_value = ".")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// initialize a new repository
    Init {
        /// path to create repository at
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// commit a directory to a ref
    Commit {
        /// source directory to commit
        source: PathBuf,

        /// ref name to commit to
        #[arg(short = 'r', long)]
        ref_name: String,

        /// one-line subject
        #[arg(short, long)]
        subject: Option<String>,

        /// free-form body text
        #[arg(short, long)]
        body: Option<String>,
    },

    /// list refs
    Refs,

    /// resolve a rev to a commit checksum
    RevParse {
        /// ref or checksum to resolve
        rev: String,

        /// output short checksum (first 12 chars)
        #[arg(long)]
        short: bool,
    },

    /// delete a ref
    DeleteRef {
        /// ref name
        ref_name: String,
    },

    /// show contents of an object
    CatFile {
        /// object kind (file, dirtree, dirmeta, commit)
        kind: String,

        /// object checksum
        checksum: String,
    },

    /// verify repository integrity
    Fsck,

    /// manage static deltas
    StaticDelta {
        #[command(subcommand)]
        command: StaticDeltaCommands,
    },
}

#[derive(Subcommand)]
enum StaticDeltaCommands {
    /// list static deltas in the repository
    List,

    /// generate a static delta between two commits
    Generate {
        /// TO revision (ref or checksum)
        to: Option<String>,

        /// TO revision (overrides the positional)
        #[arg(long = "to", value_name = "REV")]
        to_rev: Option<String>,

        /// FROM revision (defaults to the parent of TO)
        #[arg(long, value_name = "REV")]
        from: Option<String>,

        /// generate a from-scratch delta
        #[arg(long, conflicts_with = "from")]
        empty: bool,

        /// emit literals instead of binary diffs
        #[arg(long)]
        disable_bsdiff: bool,

        /// objects at or above this many megabytes travel whole
        #[arg(long, value_name = "MB")]
        min_fallback_size: Option<u64>,

        /// never binary-diff objects at or above this many megabytes
        #[arg(long, value_name = "MB")]
        max_bsdiff_size: Option<u64>,

        /// chunk payload size limit in megabytes
        #[arg(long, value_name = "MB")]
        max_chunk_size: Option<u64>,
    },

    /// apply a static delta artifact to this repository
    ApplyOffline {
        /// delta directory or superblock file
        path: PathBuf,

        /// require fallback objects to already exist in the store
        #[arg(long)]
        no_fallbacks: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(cli: Cli) -> drift::Result<()> {
    match cli.command {
        Commands::Init { path } => {
            Repo::init(&path)?;
            println!("initialized drift repository at {}", path.display());
        }

        Commands::Commit {
            source,
            ref_name,
            subject,
            body,
        } => {
            let repo = Repo::open(&cli.repo)?;
            let checksum = commit(&repo, &source, &ref_name, subject.as_deref(), body.as_deref())?;
            println!("{}", checksum);
        }

        Commands::Refs => {
            let repo = Repo::open(&cli.repo)?;
            for ref_name in drift::list_refs(&repo)? {
                let checksum = drift::read_ref(&repo, &ref_name)?;
                println!("{} {}", checksum, ref_name);
            }
        }

        Commands::RevParse { rev, short } => {
            let repo = Repo::open(&cli.repo)?;
            let checksum = drift::resolve(&repo, &rev)?;
            if short {
                println!("{}", &checksum.to_hex()[..12]);
            } else {
                println!("{}", checksum);
            }
        }

        Commands::DeleteRef { ref_name } => {
            let repo = Repo::open(&cli.repo)?;
            drift::delete_ref(&repo, &ref_name)?;
            println!("deleted ref {}", ref_name);
        }

        Commands::CatFile { kind, checksum } => {
            let repo = Repo::open(&cli.repo)?;
            let kind = parse_object_kind(&kind)?;
            let checksum = Checksum::from_hex(&checksum)?;
            cat_object(&repo, kind, &checksum)?;
        }

        Commands::Fsck => {
            let repo = Repo::open(&cli.repo)?;
            let report = fsck(&repo)?;

            println!("objects checked: {}", report.objects_checked);

            if !report.corrupt_objects.is_empty() {
                println!("\ncorrupt objects:");
                for obj in &report.corrupt_objects {
                    println!("  {} {}: {}", obj.kind, obj.checksum, obj.message);
                }
            }

            if !report.missing_objects.is_empty() {
                println!("\nmissing objects:");
                for obj in &report.missing_objects {
                    println!(
                        "  {} {} (referenced by {})",
                        obj.kind, obj.checksum, obj.referenced_by
                    );
                }
            }

            if !report.dangling_objects.is_empty() {
                println!("\ndangling objects: {}", report.dangling_objects.len());
            }

            if report.is_ok() {
                println!("\nrepository is healthy");
            } else {
                println!("\nrepository has issues");
                return Err(drift::Error::CorruptRepository(
                    "integrity check failed".to_string(),
                ));
            }
        }

        Commands::StaticDelta { command } => match command {
            StaticDeltaCommands::List => {
                let repo = Repo::open(&cli.repo)?;
                let names = list_deltas(&repo)?;
                if names.is_empty() {
                    println!("(no static deltas)");
                } else {
                    for name in names {
                        println!("{}", name);
                    }
                }
            }

            StaticDeltaCommands::Generate {
                to,
                to_rev,
                from,
                empty,
                disable_bsdiff,
                min_fallback_size,
                max_bsdiff_size,
                max_chunk_size,
            } => {
                let to = to_rev.or(to).ok_or(drift::Error::MissingToRevision)?;
                let repo = Repo::open(&cli.repo)?;

                let mut config = DeltaConfig::from_tuning(&repo.config().delta);
                if let Some(mb) = min_fallback_size {
                    config.min_fallback_size = mb * MIB;
                }
                if let Some(mb) = max_bsdiff_size {
                    config.max_bsdiff_size = mb * MIB;
                }
                if let Some(mb) = max_chunk_size {
                    config.max_chunk_size = mb * MIB;
                }
                if disable_bsdiff {
                    config.bsdiff_enabled = false;
                }

                let from_rev = if empty {
                    None
                } else if let Some(from) = from {
                    Some(from)
                } else {
                    // default to an upgrade delta from the parent commit
                    let to_commit = drift::resolve(&repo, &to)?;
                    let commit_obj = read_commit(&repo, &to_commit)?;
                    match commit_obj.parent {
                        Some(parent) => Some(parent.to_hex()),
                        None => return Err(drift::Error::CommitHasNoParent(to_commit)),
                    }
                };

                println!("generating static delta:");
                println!("  from: {}", from_rev.as_deref().unwrap_or("empty"));
                println!("  to:   {}", to);

                let report = generate(&repo, from_rev.as_deref(), &to, &config)?;
                println!(
                    "wrote {}: {} copy, {} literal, {} patch, {} fallback ops in {} chunks",
                    report.name,
                    report.copy_ops,
                    report.literal_ops,
                    report.patch_ops,
                    report.fallback_ops,
                    report.chunks
                );
            }

            StaticDeltaCommands::ApplyOffline { path, no_fallbacks } => {
                let repo = Repo::open(&cli.repo)?;
                let checksum = apply_offline(&repo, &path, !no_fallbacks)?;
                println!("applied {}", checksum);
            }
        },
    }

    Ok(())
}

fn parse_object_kind(s: &str) -> drift::Result<ObjectKind> {
    match s.to_lowercase().as_str() {
        "file" => Ok(ObjectKind::File),
        "dirtree" => Ok(ObjectKind::DirTree),
        "dirmeta" => Ok(ObjectKind::DirMeta),
        "commit" => Ok(ObjectKind::Commit),
        _ => Err(drift::Error::InvalidObjectKind(s.to_string())),
    }
}

fn cat_object(repo: &Repo, kind: ObjectKind, checksum: &Checksum) -> drift::Result<()> {
    match kind {
        ObjectKind::File => {
            let file = read_file(repo, checksum)?;
            if let Some(target) = file.symlink_target() {
                println!("symlink -> {}", target);
            } else {
                io::stdout().write_all(&file.content).map_err(|e| drift::Error::Io {
                    path: "stdout".into(),
                    source: e,
                })?;
            }
        }
        ObjectKind::DirTree => {
            let tree = read_tree(repo, checksum)?;
            for entry in tree.files() {
                println!("file {} {}", entry.checksum, entry.name);
            }
            for entry in tree.dirs() {
                println!("dir {} {}", entry.tree, entry.name);
            }
        }
        ObjectKind::DirMeta => {
            let meta = read_meta(repo, checksum)?;
            println!("uid {} gid {} mode {:o}", meta.uid, meta.gid, meta.mode);
            for xattr in &meta.xattrs {
                println!("xattr {} ({} bytes)", xattr.name, xattr.value.len());
            }
        }
        ObjectKind::Commit => {
            let commit_obj = read_commit(repo, checksum)?;
            println!("tree {}", commit_obj.tree);
            println!("meta {}", commit_obj.meta);
            if let Some(parent) = &commit_obj.parent {
                println!("parent {}", parent);
            }
            println!("timestamp {}", commit_obj.timestamp);
            for (key, value) in &commit_obj.metadata {
                println!("{}={}", key, value);
            }
            println!();
            println!("{}", commit_obj.subject);
            if !commit_obj.body.is_empty() {
                println!();
                println!("{}", commit_obj.body);
            }
        }
    }
    Ok(())
}
