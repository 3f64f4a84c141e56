use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, warn};
use vpnctl::background::Background;
use vpnctl::client::CliVpnClient;
use vpnctl::orchestrator::Settings;
use vpnctl::state::StateStore;
use vpnctl::{
    Config, ConnectOutcome, CredentialVault, Orchestrator, Profile, config, discovery, logging,
    process, updater,
};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "vpnctl")]
#[command(about = "Connect to Cisco Secure Client VPN profiles from the command line")]
#[command(version)]
struct Cli {
    /// Defaults to `info`
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.vpnctl/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a VPN profile (intra or dev)
    Connect {
        /// Profile name
        profile: String,
    },
    /// Disconnect the VPN and stop client processes
    Disconnect,
    /// Show current VPN status
    Status,
    /// Stop lingering client processes without disconnecting
    Kill,
    /// Launch the Cisco Secure Client GUI
    Gui,
    /// Manage the stored credential
    Credential {
        #[command(subcommand)]
        action: CredentialAction,
    },
    /// Show version and update information
    Info,
    /// Generate default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum CredentialAction {
    /// Show the stored credential with the password masked
    Fetch,
    /// Prompt for a new credential and store it
    Update,
    /// Delete the stored credential
    Remove,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Info);

    if let Commands::Init { force } = command {
        return match run_init(cli.config.as_deref(), force) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let config = match Config::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let logged = match config.log_path() {
        Ok(path) => logging::init(&config.logging.level, cli.verbose, &path),
        Err(_) => logging::init_console(&config.logging.level, cli.verbose),
    };
    if let Err(e) = logged {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let state = match config
        .database_path()
        .map_err(|e| e.to_string())
        .and_then(|path| StateStore::init(path).map_err(|e| e.to_string()))
    {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let background = Background::new();
    let result = run(command, &config, state, background.clone()).await;
    background.drain().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(
    command: Commands,
    config: &Config,
    state: StateStore,
    background: Background,
) -> CommandResult {
    match command {
        Commands::Connect { profile } => {
            let profile: Profile = match profile.parse() {
                Ok(profile) => profile,
                Err(e) => {
                    error!("{}", e);
                    let names: Vec<_> = Profile::ALL.iter().map(|p| p.name()).collect();
                    println!("Available profiles: {}", names.join(", "));
                    return Ok(());
                }
            };

            let vault = CredentialVault::from_config(config, state.clone(), background.clone())?;
            let credential = vault.get_or_prompt(profile)?;

            let orchestrator = build_orchestrator(config, state, background)?;
            match orchestrator.connect(profile.name(), &credential).await? {
                ConnectOutcome::Connected { profile, attempts } => {
                    println!("Connected to {} ({} attempt(s))", profile, attempts);
                }
                ConnectOutcome::AlreadyConnected(profile) => {
                    println!("Already connected to {}", profile);
                }
                ConnectOutcome::AgentLocked => {}
                ConnectOutcome::GaveUp { attempts } => {
                    println!(
                        "Could not connect after {} attempt(s). Run 'vpnctl connect {}' to try again.",
                        attempts, profile
                    );
                }
                ConnectOutcome::UnknownProfile(name) => {
                    println!("Unknown VPN profile: {}", name);
                }
            }
        }
        Commands::Disconnect => {
            let orchestrator = build_orchestrator(config, state, background)?;
            orchestrator.disconnect().await?;
            println!("VPN disconnected");
        }
        Commands::Status => {
            let orchestrator = build_orchestrator(config, state, background)?;
            orchestrator.status().await?;
        }
        Commands::Kill => {
            let orchestrator = build_orchestrator(config, state, background)?;
            let report = orchestrator.kill().await?;
            println!("Stopped {} process(es)", report.signalled.len());
        }
        Commands::Gui => {
            let orchestrator = build_orchestrator(config, state, background)?;
            orchestrator.launch_gui().await?;
        }
        Commands::Credential { action } => {
            let vault = CredentialVault::from_config(config, state, background)?;
            match action {
                CredentialAction::Fetch => match vault.fetch()? {
                    Some(credential) => {
                        println!("Username: {}", credential.username);
                        println!("Password: {}", credential.masked_password());
                        println!("Expires:  {}", credential.expires_on);
                    }
                    None => println!("No valid credential stored"),
                },
                CredentialAction::Update => {
                    let credential = vault.update()?;
                    println!("Credential updated, valid until {}", credential.expires_on);
                }
                CredentialAction::Remove => {
                    if vault.remove()? {
                        println!("Credential removed");
                    } else {
                        println!("No credential stored");
                    }
                }
            }
        }
        Commands::Info => {
            let current = env!("CARGO_PKG_VERSION");
            println!("{} {}", env!("CARGO_PKG_NAME"), current);
            println!("{}", env!("CARGO_PKG_DESCRIPTION"));
            println!("Data dir: {}", config.data_dir()?.display());

            match updater::check_latest_version(&config.update.releases_url, &state).await? {
                Some(latest) if updater::is_newer(&latest, current) => {
                    println!("Update available: {}", latest);
                }
                Some(latest) => println!("Latest release: {} (up to date)", latest),
                None => println!("Latest release: unknown"),
            }
        }
        // Handled before the config is loaded
        Commands::Init { .. } => {}
    }

    Ok(())
}

fn build_orchestrator(
    config: &Config,
    state: StateStore,
    background: Background,
) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let binary = match discovery::detect_client_binary(&config.vpn.binary_path) {
        Some(path) => path,
        None => {
            warn!(
                "VPN client not found at {}, trying anyway",
                config.vpn.binary_path.display()
            );
            config.vpn.binary_path.clone()
        }
    };
    let client = CliVpnClient::new(binary, &config.vpn.gui_path);
    let processes = process::system_process_table()?;

    Ok(Orchestrator::new(
        Box::new(client),
        Arc::from(processes),
        state,
        Settings::from_config(config),
        background,
    ))
}

fn run_init(explicit: Option<&Path>, force: bool) -> CommandResult {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config::default_config_path()?,
    };
    if path.exists() && !force {
        println!(
            "Config already exists: {} (use --force to overwrite)",
            path.display()
        );
        return Ok(());
    }

    Config::default().save(&path)?;
    println!("Created default config: {}", path.display());
    Ok(())
}
