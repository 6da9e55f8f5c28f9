//! Content repository admin CLI
//!
//! # Usage
//!
//! ```bash
//! # Create a repository that keeps its 5 newest versions
//! contentrepo-admin --db store.db repo create files --retain 5
//!
//! # Register two files and add them as a new version
//! contentrepo-admin --db store.db content register --type file.file --key a.txt --key b.txt
//! contentrepo-admin --db store.db version add files <content-id> <content-id>
//!
//! # Inspect and compact history
//! contentrepo-admin --db store.db version list files
//! contentrepo-admin --db store.db version delete files 1
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use contentrepo_storage::logging::init_tracing;
use contentrepo_storage::{
    ContentId, ContentUnit, Repository, RepositoryService, StoreConfig, DEFAULT_DOMAIN, FILE_KIND,
};

#[derive(Parser)]
#[command(name = "contentrepo-admin")]
#[command(about = "Manage versioned content repositories", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database (overrides database.path)
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Repository management
    Repo {
        #[command(subcommand)]
        action: RepoCommand,
    },

    /// Content catalog
    Content {
        #[command(subcommand)]
        action: ContentCommand,
    },

    /// Repository versions
    Version {
        #[command(subcommand)]
        action: VersionCommand,
    },
}

#[derive(Subcommand)]
enum RepoCommand {
    /// Create a repository with an empty version 0
    Create {
        name: String,

        /// Repository kind
        #[arg(short, long, default_value = FILE_KIND)]
        kind: String,

        /// Number of versions to keep
        #[arg(long)]
        retain: Option<u32>,

        #[arg(long)]
        description: Option<String>,
    },

    /// List repositories
    List,

    /// Show a repository and its versions
    Show { name: String },

    /// Delete a repository and its whole history
    Delete { name: String },

    /// Set or clear the retention limit
    Retain {
        name: String,

        /// Versions to keep; omit to keep everything
        keep: Option<u32>,
    },

    /// Apply the retention limit now
    Cleanup { name: String },

    /// Check every version snapshot against the ledger
    Verify { name: String },
}

#[derive(Subcommand)]
enum ContentCommand {
    /// Register content units, one per natural key
    Register {
        /// Content type
        #[arg(short = 't', long = "type", default_value = FILE_KIND)]
        content_type: String,

        /// Natural key (relative path, package name, ...)
        #[arg(short, long = "key", required = true)]
        keys: Vec<String>,
    },
}

#[derive(Subcommand)]
enum VersionCommand {
    /// List versions with their content counts
    List { repo: String },

    /// Create a version that adds content
    Add {
        repo: String,

        #[arg(required = true)]
        content: Vec<ContentId>,

        /// Start from this version instead of the latest
        #[arg(long)]
        base: Option<u32>,
    },

    /// Create a version that removes content
    Remove {
        repo: String,

        #[arg(required = true)]
        content: Vec<ContentId>,
    },

    /// Delete a version, folding its changes into the next one
    Delete { repo: String, number: u32 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_yaml(path)?,
        None => StoreConfig::default(),
    };
    if let Some(db) = cli.db {
        config.database.path = Some(db);
    }
    init_tracing(&config.logging)?;

    let service = RepositoryService::from_config(&config)?;

    match cli.command {
        Commands::Repo { action } => run_repo(&service, action).await?,
        Commands::Content { action } => run_content(&service, action).await?,
        Commands::Version { action } => run_version(&service, action).await?,
    }
    Ok(())
}

async fn find(service: &RepositoryService, name: &str) -> contentrepo_storage::Result<Repository> {
    service.repository_by_name(name, DEFAULT_DOMAIN).await
}

async fn run_repo(
    service: &RepositoryService,
    action: RepoCommand,
) -> contentrepo_storage::Result<()> {
    match action {
        RepoCommand::Create {
            name,
            kind,
            retain,
            description,
        } => {
            let mut repository = Repository::new(name, kind);
            repository.retain_repo_versions = retain;
            repository.description = description;
            let repository = service.create_repository_with(repository).await?;
            println!("Created {}", repository);
        }
        RepoCommand::List => {
            for repo in service.list_repositories().await? {
                let retain = repo
                    .retain_repo_versions
                    .map_or_else(|| "all".to_string(), |n| n.to_string());
                println!(
                    "{:<30} {:<15} next={:<5} retain={}",
                    repo.name, repo.kind, repo.next_version, retain
                );
            }
        }
        RepoCommand::Show { name } => {
            let repo = find(service, &name).await?;
            println!("{}", serde_json::to_string_pretty(&repo)?);
            let protected: BTreeSet<u32> = service
                .protected_versions(repo.id)
                .await?
                .into_iter()
                .map(|v| v.number)
                .collect();
            for version in service.list_versions(repo.id).await? {
                let state = if version.complete { "complete" } else { "open" };
                let mark = if protected.contains(&version.number) {
                    " (protected)"
                } else {
                    ""
                };
                println!("  version {:<5} {}{}", version.number, state, mark);
            }
        }
        RepoCommand::Delete { name } => {
            let repo = find(service, &name).await?;
            service.delete_repository(repo.id).await?;
            println!("Deleted {}", repo);
        }
        RepoCommand::Retain { name, keep } => {
            let repo = find(service, &name).await?;
            let deleted = service.set_retention(repo.id, keep).await?;
            println!("Retention for {} set, {} versions deleted", repo.name, deleted.len());
        }
        RepoCommand::Cleanup { name } => {
            let repo = find(service, &name).await?;
            let deleted = service.cleanup_old_versions(repo.id).await?;
            for version in &deleted {
                println!("Deleted version {}", version.number);
            }
            println!("{} versions deleted", deleted.len());
        }
        RepoCommand::Verify { name } => {
            let repo = find(service, &name).await?;
            let report = service.verify_repository(repo.id).await?;
            for mismatch in &report.mismatches {
                println!(
                    "version {}: {} missing from snapshot, {} missing from ledger",
                    mismatch.number,
                    mismatch.missing_from_snapshot.len(),
                    mismatch.missing_from_ledger.len()
                );
            }
            println!(
                "{} versions checked, {}",
                report.versions_checked,
                if report.is_consistent() {
                    "consistent"
                } else {
                    "INCONSISTENT"
                }
            );
        }
    }
    Ok(())
}

async fn run_content(
    service: &RepositoryService,
    action: ContentCommand,
) -> contentrepo_storage::Result<()> {
    match action {
        ContentCommand::Register { content_type, keys } => {
            let units: Vec<ContentUnit> = keys
                .into_iter()
                .map(|key| ContentUnit::new(content_type.clone()).with_natural_key(key))
                .collect();
            service.register_content(&units).await?;
            for unit in &units {
                println!("{} {}", unit.id, unit.natural_key.as_deref().unwrap_or(""));
            }
        }
    }
    Ok(())
}

async fn run_version(
    service: &RepositoryService,
    action: VersionCommand,
) -> contentrepo_storage::Result<()> {
    match action {
        VersionCommand::List { repo } => {
            let repo = find(service, &repo).await?;
            for version in service.list_versions(repo.id).await? {
                let counts = service.counts(repo.id, version.number).await?;
                let summary: Vec<String> = counts
                    .iter()
                    .map(|c| format!("{}:{}={}", c.count_type.as_str(), c.content_type, c.count))
                    .collect();
                println!("version {:<5} {}", version.number, summary.join(" "));
            }
        }
        VersionCommand::Add {
            repo,
            content,
            base,
        } => {
            let repo = find(service, &repo).await?;
            let mut handle = service.new_version(repo.id, base).await?;
            handle.add_content(&content.into_iter().collect()).await?;
            report_finalized(handle.finalize().await?);
        }
        VersionCommand::Remove { repo, content } => {
            let repo = find(service, &repo).await?;
            let mut handle = service.new_version(repo.id, None).await?;
            handle.remove_content(&content.into_iter().collect()).await?;
            report_finalized(handle.finalize().await?);
        }
        VersionCommand::Delete { repo, number } => {
            let repo = find(service, &repo).await?;
            service.delete_version(repo.id, number).await?;
            println!("Deleted version {} of {}", number, repo.name);
        }
    }
    Ok(())
}

fn report_finalized(version: Option<contentrepo_storage::RepositoryVersion>) {
    match version {
        Some(version) => println!("Created version {}", version.number),
        None => println!("No changes, version discarded"),
    }
}
