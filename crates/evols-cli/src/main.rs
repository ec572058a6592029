use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use evols_core::generator::{self, PasswordPolicy};
use evols_core::{strength, AppSettings, NewRecord, RecordUpdate, Vault, VaultPaths};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

mod prompt;

#[derive(Parser, Debug)]
#[command(name = "evols", author, version, about = "EVOLS password vault", long_about = None)]
struct Cli {
    /// Vault directory (defaults to $EVOLS_DATA_DIR, then the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Current two-factor code, if two-factor authentication is enabled
    #[arg(long, global = true)]
    otp: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new vault
    Init,
    /// Store a new entry
    Add {
        title: String,
        #[arg(long)]
        username: Option<String>,
        /// Entry password (prompted if omitted and --generate is not set)
        #[arg(long)]
        password: Option<String>,
        /// Generate a random password with the default policy
        #[arg(long, conflicts_with = "password")]
        generate: bool,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        folder: Option<String>,
    },
    /// Show one decrypted entry
    Get { id: i64 },
    /// List entries (id, title, category)
    List {
        /// Only entries filed in this folder
        #[arg(long, conflicts_with = "unfiled")]
        folder: Option<String>,
        /// Only entries without a folder
        #[arg(long)]
        unfiled: bool,
    },
    /// Search titles, categories and urls
    Search { query: String },
    /// Change fields of an entry
    Update {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Permanently delete an entry
    Delete { id: i64 },
    /// List folder names in use
    Folders,
    /// File an entry under a folder (omit the folder to unfile it)
    Move { id: i64, folder: Option<String> },
    /// Change the master password and re-encrypt every entry
    Passwd,
    /// Generate a random password
    Generate {
        #[arg(short, long, default_value_t = generator::DEFAULT_LENGTH)]
        length: usize,
        #[arg(long)]
        no_uppercase: bool,
        #[arg(long)]
        no_digits: bool,
        #[arg(long)]
        no_punctuation: bool,
    },
    /// Score a password
    Strength { password: String },
    /// Score every stored password
    Audit,
    /// Snapshot the vault files
    Backup {
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// Two-factor authentication
    #[command(name = "2fa", subcommand)]
    TwoFactor(TwoFactorCommand),
    /// Application settings
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand, Debug)]
enum TwoFactorCommand {
    /// Enrol an authenticator app
    Enable {
        #[arg(long, default_value = "vault")]
        account: String,
        /// Use this base32 secret instead of generating one
        #[arg(long)]
        secret: Option<String>,
        /// Confirmation code (prompted if omitted)
        #[arg(long)]
        code: Option<String>,
    },
    /// Remove two-factor authentication (needs --otp)
    Disable,
    /// Whether two-factor authentication is enabled
    Status,
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    Show,
    Set {
        #[arg(long)]
        auto_lock_minutes: Option<u32>,
        #[arg(long)]
        backup_dir: Option<PathBuf>,
        #[arg(long)]
        auto_backup: Option<bool>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evols_core=warn,evols=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = match cli.data_dir {
        Some(dir) => VaultPaths::new(dir),
        None => VaultPaths::default_location()?,
    };
    let otp = cli.otp.as_deref();

    match cli.command {
        Commands::Init => init_command(paths),
        Commands::Add {
            title,
            username,
            password,
            generate,
            url,
            category,
            notes,
            folder,
        } => {
            let password = match (password, generate) {
                (Some(pw), _) => pw,
                (None, true) => generator::generate(&PasswordPolicy::default())?,
                (None, false) => prompt::password_once("Entry password")?.to_string(),
            };
            let record = NewRecord {
                title,
                username: username.unwrap_or_default(),
                password,
                url: url.unwrap_or_default(),
                category: category.unwrap_or_default(),
                notes: notes.unwrap_or_default(),
                folder,
            };
            let mut vault = unlock(paths, otp)?;
            let id = vault.add(&record)?;
            print_json(&json!({ "id": id }))
        }
        Commands::Get { id } => {
            let mut vault = unlock(paths, otp)?;
            print_json(&vault.get(id)?)
        }
        Commands::List { folder, unfiled } => {
            let mut vault = unlock(paths, otp)?;
            let records = if unfiled {
                vault.list_folder(None)?
            } else if let Some(folder) = folder {
                vault.list_folder(Some(&folder))?
            } else {
                vault.list()?
            };
            print_json(&records)
        }
        Commands::Search { query } => {
            let mut vault = unlock(paths, otp)?;
            print_json(&vault.search(&query)?)
        }
        Commands::Update {
            id,
            title,
            username,
            password,
            url,
            category,
            notes,
        } => {
            let update = RecordUpdate {
                title,
                username,
                password,
                url,
                category,
                notes,
                folder: None,
            };
            if update.is_empty() {
                return Err(anyhow!("nothing to update"));
            }
            let mut vault = unlock(paths, otp)?;
            if !vault.update(id, &update)? {
                return Err(anyhow!("record not found: {id}"));
            }
            print_json(&json!({ "id": id, "updated": true }))
        }
        Commands::Delete { id } => {
            let mut vault = unlock(paths, otp)?;
            if !vault.delete(id)? {
                return Err(anyhow!("record not found: {id}"));
            }
            print_json(&json!({ "id": id, "deleted": true }))
        }
        Commands::Folders => {
            let mut vault = unlock(paths, otp)?;
            print_json(&vault.folders()?)
        }
        Commands::Move { id, folder } => {
            let mut vault = unlock(paths, otp)?;
            if !vault.move_to_folder(id, folder.as_deref())? {
                return Err(anyhow!("record not found: {id}"));
            }
            print_json(&json!({ "id": id, "folder": folder }))
        }
        Commands::Passwd => passwd_command(paths, otp),
        Commands::Generate {
            length,
            no_uppercase,
            no_digits,
            no_punctuation,
        } => {
            let policy = PasswordPolicy {
                length,
                uppercase: !no_uppercase,
                digits: !no_digits,
                punctuation: !no_punctuation,
            };
            let password = generator::generate(&policy)?;
            let report = strength::score(&password);
            print_json(&json!({
                "password": password,
                "score": report.score,
                "level": report.level,
            }))
        }
        Commands::Strength { password } => {
            let report = strength::score(&password);
            print_json(&json!({
                "score": report.score,
                "level": report.level,
                "entropy_bits": strength::entropy_bits(&password),
                "suggestions": report.suggestions,
            }))
        }
        Commands::Audit => {
            let mut vault = unlock(paths, otp)?;
            print_json(&vault.strength_report()?)
        }
        Commands::Backup { dest } => {
            let mut vault = unlock(paths, otp)?;
            let (dir, manifest) = vault.backup(dest.as_deref())?;
            print_json(&json!({ "dir": dir, "manifest": manifest }))
        }
        Commands::TwoFactor(cmd) => two_factor_command(paths, otp, cmd),
        Commands::Settings(cmd) => settings_command(paths, cmd),
    }
}

fn init_command(paths: VaultPaths) -> Result<()> {
    if paths.vault_exists() {
        return Err(anyhow!("vault already exists in {}", paths.root().display()));
    }
    let password = prompt::password_twice(
        "Create master password",
        prompt::PASSWORD_ENV,
        Some(prompt::PASSWORD_CONFIRM_ENV),
    )?;
    let vault = Vault::create(paths, &password)?;
    info!(dir = %vault.paths().root().display(), "initialised vault");
    print_json(&json!({ "created": vault.paths().root() }))
}

fn passwd_command(paths: VaultPaths, otp: Option<&str>) -> Result<()> {
    let current = prompt::master_password()?;
    let mut vault = Vault::open(paths)?;
    vault.unlock(&current, otp)?;
    let new = prompt::password_twice("New master password", prompt::NEW_PASSWORD_ENV, None)?;
    let records = vault.change_master_password(&current, &new)?;
    print_json(&json!({ "rekeyed": records }))
}

fn two_factor_command(paths: VaultPaths, otp: Option<&str>, cmd: TwoFactorCommand) -> Result<()> {
    match cmd {
        TwoFactorCommand::Status => {
            let vault = Vault::open(paths)?;
            print_json(&json!({ "enabled": vault.two_factor_enabled() }))
        }
        TwoFactorCommand::Enable {
            account,
            secret,
            code,
        } => {
            let mut vault = unlock(paths, otp)?;
            let setup = match secret {
                Some(secret) => vault.enable_two_factor_with_secret(&account, &secret)?,
                None => vault.enable_two_factor(&account)?,
            };
            let code = match code {
                Some(code) => code,
                None => {
                    eprintln!("Add this account to your authenticator app:");
                    eprintln!("{}", setup.provisioning_uri);
                    prompt::read_line("Code from the app")?
                }
            };
            vault.confirm_two_factor(&code)?;
            print_json(&json!({
                "enabled": true,
                "secret": setup.secret,
                "provisioning_uri": setup.provisioning_uri,
            }))
        }
        TwoFactorCommand::Disable => {
            let code = otp.ok_or_else(|| anyhow!("--otp is required to disable two-factor"))?;
            let mut vault = unlock(paths, Some(code))?;
            vault.disable_two_factor(code)?;
            print_json(&json!({ "enabled": false }))
        }
    }
}

fn settings_command(paths: VaultPaths, cmd: SettingsCommand) -> Result<()> {
    let mut vault = Vault::open(paths)?;
    match cmd {
        SettingsCommand::Show => print_json(vault.settings()),
        SettingsCommand::Set {
            auto_lock_minutes,
            backup_dir,
            auto_backup,
        } => {
            let current = vault.settings().clone();
            let updated = AppSettings {
                auto_lock_minutes: auto_lock_minutes.unwrap_or(current.auto_lock_minutes),
                backup_dir: backup_dir.or(current.backup_dir),
                auto_backup: auto_backup.unwrap_or(current.auto_backup),
            };
            vault.update_settings(updated)?;
            print_json(vault.settings())
        }
    }
}

fn unlock(paths: VaultPaths, otp: Option<&str>) -> Result<Vault> {
    let mut vault = Vault::open(paths)?;
    let password = prompt::master_password()?;
    vault.unlock(&password, otp)?;
    Ok(vault)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
