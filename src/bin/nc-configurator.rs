//! nc-configurator CLI
//!
//! Usage:
//!   nc-configurator show [certificate|access-control] [--json]
//!   nc-configurator certificate pem <PATH>
//!   nc-configurator certificate pair <CRT> <KEY>
//!   nc-configurator access-control set <FIELD> <VALUE>
//!   nc-configurator access-control add-user <NAME>
//!

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{debug, error};

use nc_configurator::certificate::CertificateRecord;
use nc_configurator::{
    AccessControlModule, Action, CertificateModule, CertificateState, CommitOutcome, ConfigModule,
    ReloadStatus, Result, ScalarField, Settings,
};

#[derive(Parser, Debug)]
#[command(name = "nc-configurator")]
#[command(author, version, about = "Configure a NETCONF server installation")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file (JSON)
    #[arg(short, long, global = true, env = "NC_CONFIGURATOR_SETTINGS")]
    settings: Option<PathBuf>,

    /// Netopeer configuration directory
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// libnetconf working directory
    #[arg(long, global = true)]
    working_dir: Option<PathBuf>,

    /// NETCONF server PID file, signalled after access control changes
    #[arg(long, global = true)]
    server_pid_file: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current configuration
    Show {
        /// Only this module
        module: Option<ModuleName>,

        /// JSON report instead of text
        #[arg(long)]
        json: bool,
    },
    /// Replace the server certificate
    Certificate {
        #[command(subcommand)]
        action: CertificateAction,

        /// Validate and report, but do not commit
        #[arg(long)]
        dry_run: bool,
    },
    /// Change NETCONF access control
    AccessControl {
        #[command(subcommand)]
        action: AccessControlAction,

        /// Report whether a commit would be necessary, but do not commit
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ModuleName {
    Certificate,
    AccessControl,
}

#[derive(Subcommand, Debug)]
enum CertificateAction {
    /// Install a PEM file holding both certificate and private key
    Pem { path: PathBuf },
    /// Install a certificate and its private key
    Pair { cert: PathBuf, key: PathBuf },
}

#[derive(Subcommand, Debug)]
enum AccessControlAction {
    /// Set a scalar field (enable-nacm, enable-external-groups,
    /// read-default, write-default, exec-default)
    Set { field: ScalarField, value: String },
    /// Grant a user unrestricted access
    AddUser { name: String },
    /// Revoke a user's unrestricted access
    RemoveUser { name: String },
    /// Rename a user with unrestricted access
    RenameUser { name: String, new_name: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli)?;
    debug!(?settings, "using settings");

    match cli.command {
        Command::Show { module, json } => show(settings, module, json),
        Command::Certificate { action, dry_run } => {
            let mut module = CertificateModule::new(settings);
            module.activate()?;
            let record = match &action {
                CertificateAction::Pem { path } => module.stage_pem(path)?,
                CertificateAction::Pair { cert, key } => module.stage_pair(cert, key)?,
            };
            println!("New certificate:");
            print_record(record);
            finish(&mut module, dry_run)
        }
        Command::AccessControl { action, dry_run } => {
            let mut module = AccessControlModule::new(settings);
            module.activate()?;
            match &action {
                AccessControlAction::Set { field, value } => module.config_mut().stage(*field, value)?,
                AccessControlAction::AddUser { name } => module.add_privileged_member(name)?,
                AccessControlAction::RemoveUser { name } => module.remove_privileged_member(name)?,
                AccessControlAction::RenameUser { name, new_name } => {
                    module.rename_privileged_member(name, new_name)?
                }
            }
            finish(&mut module, dry_run)
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.settings {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    if let Some(dir) = &cli.config_dir {
        settings.config_dir = dir.clone();
    }
    if let Some(dir) = &cli.working_dir {
        settings.working_dir = dir.clone();
    }
    if let Some(file) = &cli.server_pid_file {
        settings.server_pid_file = Some(file.clone());
    }
    Ok(settings)
}

fn finish(module: &mut impl ConfigModule, dry_run: bool) -> Result<()> {
    if dry_run {
        let verdict = if module.unsaved_changes() { "would be changed" } else { "unchanged" };
        println!("{}: {}", module.name(), verdict);
        return Ok(());
    }

    match module.commit()? {
        CommitOutcome::Unchanged => println!("{}: nothing to commit", module.name()),
        CommitOutcome::Committed { reload } => {
            println!("{}: changes saved", module.name());
            match reload {
                ReloadStatus::Signalled { pid } => println!("Reload requested from PID {}", pid),
                ReloadStatus::NotRunning => println!("Daemon not running, nothing to reload"),
                ReloadStatus::Failed { reason } => println!(
                    "Could not force config reload ({}), changes may not take effect before restart",
                    reason
                ),
            }
        }
    }
    Ok(())
}

fn show(settings: Settings, only: Option<ModuleName>, as_json: bool) -> Result<()> {
    let wants = |name| only.is_none() || only == Some(name);
    let mut report = serde_json::Map::new();

    if wants(ModuleName::Certificate) {
        let mut module = CertificateModule::new(settings.clone());
        match module.activate() {
            Ok(()) => {
                if as_json {
                    report.insert("certificate".to_string(), serde_json::to_value(module.state())?);
                } else {
                    print_certificate(module.state());
                }
            }
            Err(e) => {
                if as_json {
                    report.insert("certificate".to_string(), json!({ "state": "unavailable", "reason": e.to_string() }));
                } else {
                    println!("Server certificate: unavailable ({})", e);
                }
            }
        }
    }

    if wants(ModuleName::AccessControl) {
        let mut module = AccessControlModule::new(settings);
        match module.activate() {
            Ok(()) => {
                if as_json {
                    report.insert(
                        "access-control".to_string(),
                        json!({
                            "available": module.is_available(),
                            "fields": module.config().views(),
                            "privileged-members": module.privileged_members(),
                            "groups": module.groups(),
                            "rule-lists": module.rule_lists(),
                        }),
                    );
                } else {
                    print_access_control(&module);
                }
            }
            Err(e) => {
                if as_json {
                    report.insert(
                        "access-control".to_string(),
                        json!({ "available": false, "reason": e.to_string() }),
                    );
                } else {
                    println!("Access control: unavailable ({})", e);
                }
            }
        }
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn print_certificate(state: &CertificateState) {
    match state {
        CertificateState::Unavailable { reason } => {
            println!("Server certificate: stunnel config unavailable ({})", reason);
        }
        CertificateState::Inaccessible {
            cert_path,
            key_path,
            reason,
        } => {
            println!("Server certificate: inaccessible or corrupted ({})", reason);
            println!("  Certificate: {}", cert_path.display());
            if let Some(key) = key_path {
                println!("  Key:         {}", key.display());
            }
        }
        CertificateState::Installed(record) => {
            println!("Server certificate:");
            print_record(record);
        }
    }
}

fn print_record(record: &CertificateRecord) {
    println!("  Certificate: {}", record.cert_path.display());
    if let Some(key) = &record.key_path {
        println!("  Key:         {}", key.display());
    }
    for (title, name) in [("Subject", &record.info.subject), ("Issuer", &record.info.issuer)] {
        println!("  {}:", title);
        for (label, value) in name.rows() {
            println!("    {:<3} {}", label, value.unwrap_or("(none)"));
        }
    }
    println!("  Valid until: {}", record.info.not_after);
}

fn print_access_control(module: &AccessControlModule) {
    if !module.is_available() {
        println!("Access control: datastore unavailable, showing defaults");
    } else {
        println!("Access control:");
    }
    for view in module.config().views() {
        let origin = if view.bound { "" } else { " (default)" };
        println!("  {:<24} {}{}", view.field.element(), view.value, origin);
    }

    let members = module.privileged_members();
    if members.is_empty() {
        println!("  Users with unrestricted access: none");
    } else {
        println!("  Users with unrestricted access: {}", members.join(", "));
    }

    for group in module.groups() {
        println!("  Group {}: {}", group.name, group.members.join(", "));
    }
    for list in module.rule_lists() {
        println!("  Rule list {} (groups: {})", list.name, list.groups.join(", "));
        for rule in &list.rules {
            println!(
                "    Rule {}: {:?} module={} operations={} action={}",
                rule.name,
                rule.target,
                rule.module_name.as_deref().unwrap_or("*"),
                rule.access_operations.iter().cloned().collect::<Vec<_>>().join(" "),
                rule.action.map(Action::as_str).unwrap_or("-"),
            );
            if let Some(comment) = &rule.comment {
                println!("      {}", comment);
            }
        }
    }
}
