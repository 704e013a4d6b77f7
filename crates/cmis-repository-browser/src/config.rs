use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use cmis_repository::{DeleteDepth, OrderField};

/// Configuration for the cmis-repository command line.
#[derive(Parser, Debug, Clone)]
#[command(name = "cmis-repository")]
#[command(about = "Browse and edit a CMIS repository through stable local ids")]
pub struct Config {
    /// CMIS Browser Binding service URL
    #[arg(long, env = "CMIS_BROWSER_URL")]
    pub url: String,

    /// Remote repository id (first advertised repository when unset)
    #[arg(long, env = "CMIS_REPOSITORY_ID")]
    pub cmis_repository_id: Option<String>,

    /// Login for the remote store
    #[arg(long, env = "CMIS_USERNAME")]
    pub username: String,

    /// Password for the remote store
    #[arg(long, env = "CMIS_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// HTTP request timeout (seconds)
    #[arg(long, default_value = "60", env = "CMIS_TIMEOUT")]
    pub timeout_secs: u64,

    /// JSON file holding the local id mappings
    #[arg(long, default_value = "cmis-mappings.json", env = "CMIS_MAPPING_FILE")]
    pub mapping_file: PathBuf,

    /// Local id of the folder the remote root is mounted at
    #[arg(long, default_value = "1", env = "CMIS_MOUNT_FOLDER_ID")]
    pub mount_folder_id: i64,

    /// Owning repository id written to mapping rows
    #[arg(long, default_value = "1", env = "CMIS_OWNER_REPOSITORY_ID")]
    pub repository_id: i64,

    /// Mapping rows purged on delete: none, shallow or deep
    #[arg(long, default_value = "none", env = "CMIS_DELETE_DEPTH")]
    pub delete_depth: DeleteDepth,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the remote repository information
    Info,

    /// List the folders and file entries of a folder
    Ls {
        /// Folder local id (defaults to the mount folder)
        folder_id: Option<i64>,

        #[arg(long, value_enum)]
        order: Option<SortField>,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        start: i64,

        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        end: i64,
    },

    /// Print the folder tree below a folder
    Tree { folder_id: Option<i64> },

    /// Show a file entry
    Stat { file_entry_id: i64 },

    /// Write the content of a file entry to stdout
    Cat {
        file_entry_id: i64,

        /// Version label (latest when unset)
        #[arg(long)]
        version: Option<String>,
    },

    /// List the versions of a file entry
    Versions { file_entry_id: i64 },

    /// Create a folder
    Mkdir { parent_folder_id: i64, title: String },

    /// Upload a local file as a new file entry
    Put {
        folder_id: i64,
        path: PathBuf,

        /// Title of the file entry (file name when unset)
        #[arg(long)]
        title: Option<String>,
    },

    /// Delete a file entry
    Rm { file_entry_id: i64 },

    /// Delete a folder and everything below it
    Rmdir { folder_id: i64 },

    /// Make a historical version the latest one
    Revert { file_entry_id: i64, version: String },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum SortField {
    Name,
    Created,
    Modified,
    Size,
}

impl From<SortField> for OrderField {
    fn from(field: SortField) -> Self {
        match field {
            SortField::Name => OrderField::Name,
            SortField::Created => OrderField::CreateDate,
            SortField::Modified => OrderField::ModifiedDate,
            SortField::Size => OrderField::Size,
        }
    }
}
