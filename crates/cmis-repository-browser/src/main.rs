mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use cmis_repository::{
    CmisRepository, OrderBy, Page, RepositoryConfig, RepositoryEntity, RequestScope,
};
use cmis_repository_browser::{BrowserBindingParams, BrowserConnectionFactory};
use cmis_repository_core::{ContentStream, LocalId};
use cmis_repository_local::{JsonFileMappingStore, StaticHostFolders};
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{Command, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so command output stays clean on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    info!("Starting cmis-repository v{}", env!("CARGO_PKG_VERSION"));
    info!("  Browser binding: {}", config.url);
    info!("  Mapping file: {}", config.mapping_file.display());
    info!("  Delete depth: {}", config.delete_depth);

    let factory = BrowserConnectionFactory::new(BrowserBindingParams {
        url: config.url.clone(),
        repository_id: config.cmis_repository_id.clone(),
        username: config.username.clone(),
        password: config.password.clone(),
        timeout: Duration::from_secs(config.timeout_secs),
    })?;

    let mappings = Arc::new(
        JsonFileMappingStore::open(&config.mapping_file, config.mount_folder_id + 1)
            .await
            .with_context(|| format!("Failed to open {}", config.mapping_file.display()))?,
    );

    let repo = CmisRepository::new(
        RepositoryConfig::new(config.repository_id).with_delete_depth(config.delete_depth),
        Arc::new(factory),
        mappings.clone(),
        mappings,
        Arc::new(StaticHostFolders::new().with_mount_point(config.mount_folder_id)),
    );

    let context = repo.open_context(config.username.clone());
    let scope = repo.begin_request(&context);

    run(&repo, &scope, &config).await
}

async fn run(repo: &CmisRepository, scope: &RequestScope, config: &Config) -> anyhow::Result<()> {
    let mount = config.mount_folder_id;

    match &config.command {
        Command::Info => {
            let info = repo.init_repository(scope).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Ls {
            folder_id,
            order,
            desc,
            start,
            end,
        } => {
            let order = order.map(|field| OrderBy::new(field.into(), !desc));
            let entries = repo
                .get_folders_and_file_entries(
                    scope,
                    folder_id.unwrap_or(mount),
                    order,
                    Page::from_bounds(*start, *end),
                )
                .await?;
            for entry in &entries {
                println!("{}", describe(entry));
            }
        }
        Command::Tree { folder_id } => {
            print_tree(repo, scope, folder_id.unwrap_or(mount)).await?;
        }
        Command::Stat { file_entry_id } => {
            let entry = repo.get_file_entry(scope, *file_entry_id).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Command::Cat {
            file_entry_id,
            version,
        } => {
            let content = repo
                .get_content_stream(scope, *file_entry_id, version.as_deref())
                .await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&content.data).await?;
            stdout.flush().await?;
        }
        Command::Versions { file_entry_id } => {
            for version in repo.get_file_versions(scope, *file_entry_id).await? {
                println!(
                    "{}\t{}\t{}",
                    version.file_version_id,
                    version.version(),
                    version.remote.name
                );
            }
        }
        Command::Mkdir {
            parent_folder_id,
            title,
        } => {
            let folder = repo.add_folder(scope, *parent_folder_id, title).await?;
            println!("{}", folder.folder_id);
        }
        Command::Put {
            folder_id,
            path,
            title,
        } => {
            let data = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .context("Upload path has no file name")?;
            let title = title.clone().unwrap_or_else(|| file_name.clone());

            let content = ContentStream::new(file_name, None, Bytes::from(data));
            let entry = repo.add_file_entry(scope, *folder_id, &title, content).await?;
            println!("{}", entry.file_entry_id);
        }
        Command::Rm { file_entry_id } => {
            repo.delete_file_entry(scope, *file_entry_id).await?;
        }
        Command::Rmdir { folder_id } => {
            repo.delete_folder(scope, *folder_id).await?;
        }
        Command::Revert {
            file_entry_id,
            version,
        } => {
            let entry = repo.revert_file_entry(scope, *file_entry_id, version).await?;
            println!("{}\t{}", entry.file_entry_id, entry.version());
        }
    }

    Ok(())
}

fn describe(entry: &RepositoryEntity) -> String {
    match entry {
        RepositoryEntity::Folder(folder) => format!("d\t{}\t{}", folder.folder_id, folder.name()),
        RepositoryEntity::FileEntry(file) => format!(
            "-\t{}\t{}\t{}\t{}",
            file.file_entry_id,
            file.version(),
            file.remote.content_length,
            file.title()
        ),
    }
}

async fn print_tree(
    repo: &CmisRepository,
    scope: &RequestScope,
    root: LocalId,
) -> anyhow::Result<()> {
    let children = repo.get_folders(scope, root, None, Page::All).await?;
    let mut pending: Vec<_> = children.into_iter().rev().map(|f| (f, 0usize)).collect();

    while let Some((folder, depth)) = pending.pop() {
        println!("{}{}\t{}", "  ".repeat(depth), folder.name(), folder.folder_id);

        let children = repo.get_folders(scope, folder.folder_id, None, Page::All).await?;
        pending.extend(children.into_iter().rev().map(|f| (f, depth + 1)));
    }
    Ok(())
}
