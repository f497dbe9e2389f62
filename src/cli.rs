//! The admin CLI: loads the directory configuration, drives exactly one
//! [`StoreHandle`] operation, and reports the result.
//!
//! Intentionally thin, per the upstream tool it replaces: no interactive
//! prompts, no progress bars. Passwords are supplied on the command line
//! (or piped in by a wrapper script); prompting them securely is left to
//! whatever shell invokes this binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::directory::Directory;
use crate::dispatcher::{self, UpgradePolicy};
use crate::error::StoreError;
use crate::secret::SecretString;
use crate::store_handle::StoreHandle;

/// whawty-authd - credential store and authentication agent.
#[derive(Parser)]
#[command(name = "whawty-authd", version, about = "Administer a whawty-auth credential store.")]
pub struct App {
    /// Path to the directory configuration document.
    #[arg(short, long, global = true, default_value = "/etc/whawty/auth/store.yaml")]
    config: PathBuf,

    /// Directory scanned for post-mutation hook executables.
    #[arg(long, global = true)]
    hooks_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the first admin user. Requires an empty base directory.
    Init {
        user: String,
        #[arg(long)]
        password: String,
    },
    /// Register a new user.
    Add {
        user: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        admin: bool,
    },
    /// Replace a user's stored password.
    Update {
        user: String,
        #[arg(long)]
        password: String,
    },
    /// Delete a user.
    Remove { user: String },
    /// Promote or demote an existing user.
    SetAdmin {
        user: String,
        #[arg(long)]
        admin: bool,
    },
    /// List users with currently supported hash files.
    List,
    /// Validate every entry in the base directory.
    Check,
}

impl App {
    /// Installs the global `tracing` subscriber and parses `argv`, mirroring
    /// the teacher crate's `App::init`.
    pub fn init() -> Self {
        let subscriber = tracing_subscriber::fmt().with_file(true).with_line_number(true).finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
        Self::parse()
    }

    pub async fn execute(self) -> Result<(), StoreError> {
        let directory = self.build_directory()?;
        let base_dir = directory.base_dir().to_path_buf();
        let hooks_dir = self.hooks_dir.clone().unwrap_or_else(|| base_dir.join("hooks"));
        let hook_tx = crate::hooks::spawn(hooks_dir, base_dir);
        let handle = dispatcher::spawn(directory, self.config.clone(), hook_tx, UpgradePolicy::None);

        self.run(&handle).await
    }

    /// Builds the `Directory` the command operates on. `init` is the one
    /// command allowed to run against a directory that does not yet pass
    /// `check` (it requires the base dir to be empty, the opposite of what
    /// `check` asks for).
    fn build_directory(&self) -> Result<Directory, StoreError> {
        let config = crate::config::DirectoryConfig::load(&self.config)?;
        let registry = config.build_registry()?;
        let directory = Directory::new(config.basedir, registry);
        if !matches!(self.command, Commands::Init { .. }) {
            directory.check()?;
        }
        Ok(directory)
    }

    async fn run(self, handle: &StoreHandle) -> Result<(), StoreError> {
        match self.command {
            Commands::Init { user, password } => handle.init(user, SecretString::from_str(&password)).await,
            Commands::Add { user, password, admin } => handle.add(user, SecretString::from_str(&password), admin).await,
            Commands::Update { user, password } => handle.update(user, SecretString::from_str(&password)).await,
            Commands::Remove { user } => handle.remove(user).await,
            Commands::SetAdmin { user, admin } => handle.set_admin(user, admin).await,
            Commands::List => {
                let users = handle.list().await?;
                for (user, is_admin) in users {
                    if is_admin {
                        println!("{user} (admin)");
                    } else {
                        println!("{user}");
                    }
                }
                Ok(())
            }
            Commands::Check => handle.check().await,
        }
    }
}
