use clap::{Parser, Subcommand};
use lmm::cancel::CancelToken;
use lmm::config::LinkMethod;
use lmm::error::ErrorKind;
use lmm::game::Game;
use lmm::lock::ConfigLock;
use lmm::profile::ModReference;
use lmm::reconciler::Reconciler;
use lmm::service::Service;
use lmm::source::nexus::NexusAdapter;
use lmm::source::SourceAdapter;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lmm")]
#[command(author, version, about = "Linux mod deployment engine")]
struct Cli {
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Game {
        #[command(subcommand)]
        action: GameCommands,
    },
    Profile {
        #[command(subcommand)]
        action: ProfileCommands,
    },
    Reconcile {
        #[arg(long)]
        profile: Option<String>,
        #[arg(long)]
        game: String,
        #[arg(long)]
        force_hooks: bool,
    },
    Switch {
        #[arg(long)]
        game: String,
        profile: String,
    },
    Install {
        #[arg(long)]
        game: String,
        #[arg(long)]
        profile: String,
        source: String,
        mod_id: String,
        version: String,
    },
    Uninstall {
        #[arg(long)]
        game: String,
        #[arg(long)]
        profile: String,
        source: String,
        mod_id: String,
    },
    Conflicts {
        #[arg(long)]
        game: String,
        #[arg(long)]
        profile: String,
        source: String,
        mod_id: String,
        version: String,
    },
    Status {
        #[arg(long)]
        game: String,
        #[arg(long)]
        profile: String,
    },
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },
}

#[derive(Subcommand)]
enum GameCommands {
    Add {
        id: String,
        name: String,
        install_path: PathBuf,
        mod_path: PathBuf,
        #[arg(long, value_enum, default_value = "symlink")]
        link_method: LinkMethodArg,
    },
    List,
    Remove {
        id: String,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    Create {
        #[arg(long)]
        game: String,
        name: String,
    },
    List {
        #[arg(long)]
        game: String,
    },
    Show {
        #[arg(long)]
        game: String,
        name: String,
    },
    SetDefault {
        #[arg(long)]
        game: String,
        name: String,
    },
    Export {
        #[arg(long)]
        game: String,
        name: String,
    },
    Import {
        #[arg(long)]
        game: String,
        path: PathBuf,
    },
    Mod {
        #[command(subcommand)]
        action: ProfileModCommands,
    },
}

#[derive(Subcommand)]
enum ProfileModCommands {
    Add {
        #[arg(long)]
        game: String,
        #[arg(long)]
        profile: String,
        source: String,
        mod_id: String,
        version: String,
    },
    Remove {
        #[arg(long)]
        game: String,
        #[arg(long)]
        profile: String,
        source: String,
        mod_id: String,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Delete cache entries not referenced by any profile for any known game.
    Gc,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum LinkMethodArg {
    Symlink,
    Hardlink,
    Copy,
}

impl From<LinkMethodArg> for LinkMethod {
    fn from(v: LinkMethodArg) -> Self {
        match v {
            LinkMethodArg::Symlink => LinkMethod::Symlink,
            LinkMethodArg::Hardlink => LinkMethod::Hardlink,
            LinkMethodArg::Copy => LinkMethod::Copy,
        }
    }
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(cli.command).await {
        Ok(()) => ExitCode::from(0),
        Err(e) if e.kind() == ErrorKind::Cancelled => {
            tracing::warn!("cancelled");
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(1)
        }
    }
}

async fn run(command: Commands) -> lmm::error::Result<()> {
    let adapters: Vec<Box<dyn SourceAdapter>> = match std::env::var("NEXUS_API_KEY") {
        Ok(key) => vec![Box::new(NexusAdapter::new(&key)?)],
        Err(_) => Vec::new(),
    };
    let mut service = Service::load(adapters).await?;

    let _lock = if is_write_bearing(&command) {
        Some(ConfigLock::acquire(&service.paths().lock_file())?)
    } else {
        None
    };

    match command {
        Commands::Game { action } => run_game(&mut service, action).await,
        Commands::Profile { action } => run_profile(&service, action).await,
        Commands::Reconcile { profile, game, force_hooks } => {
            run_reconcile(&service, &game, profile, force_hooks).await
        }
        Commands::Switch { game, profile } => {
            service.profiles.set_default(&game, &profile).await?;
            run_reconcile(&service, &game, Some(profile), false).await
        }
        Commands::Install { game, profile, source, mod_id, version } => {
            run_install(&service, &game, &profile, &source, &mod_id, &version).await
        }
        Commands::Uninstall { game, profile, source, mod_id } => {
            run_uninstall(&service, &game, &profile, &source, &mod_id).await
        }
        Commands::Conflicts { game, profile, source, mod_id, version } => {
            run_conflicts(&service, &game, &profile, &source, &mod_id, &version).await
        }
        Commands::Status { game, profile } => run_status(&service, &game, &profile).await,
        Commands::Cache { action } => match action {
            CacheCommands::Gc => run_cache_gc(&service, &game_ids(&service)).await,
        },
    }
}

/// Only commands that mutate the config directory, ledger, or cache take
/// the advisory lock; pure reads (list/show/status/conflicts) don't.
fn is_write_bearing(command: &Commands) -> bool {
    match command {
        Commands::Game { action } => !matches!(action, GameCommands::List),
        Commands::Profile { action } => !matches!(
            action,
            ProfileCommands::List { .. } | ProfileCommands::Show { .. } | ProfileCommands::Export { .. }
        ),
        Commands::Reconcile { .. } | Commands::Switch { .. } | Commands::Install { .. } | Commands::Uninstall { .. } => true,
        Commands::Conflicts { .. } | Commands::Status { .. } => false,
        Commands::Cache { action } => matches!(action, CacheCommands::Gc),
    }
}

fn game_ids(service: &Service) -> Vec<String> {
    service.games.list().into_iter().map(|g| g.id.clone()).collect()
}

async fn run_game(service: &mut Service, action: GameCommands) -> lmm::error::Result<()> {
    match action {
        GameCommands::Add { id, name, install_path, mod_path, link_method } => {
            service.games.upsert(Game {
                id,
                name,
                install_path,
                mod_path,
                link_method: link_method.into(),
                sources: Default::default(),
                cache_path: None,
                hooks: Default::default(),
            });
            service.games.save(service.paths()).await?;
        }
        GameCommands::List => {
            for game in service.games.list() {
                println!("{}\t{}\t{}", game.id, game.name, game.install_path.display());
            }
        }
        GameCommands::Remove { id } => {
            service.games.remove(&id);
            service.games.save(service.paths()).await?;
        }
    }
    Ok(())
}

async fn run_profile(service: &Service, action: ProfileCommands) -> lmm::error::Result<()> {
    match action {
        ProfileCommands::Create { game, name } => {
            service.profiles.create(&game, &name).await?;
        }
        ProfileCommands::List { game } => {
            for profile in service.profiles.list(&game).await? {
                println!("{}", profile.name);
            }
        }
        ProfileCommands::Show { game, name } => {
            let profile = service.profiles.get(&game, &name).await?;
            print!("{}", service.profiles.export(&profile)?);
        }
        ProfileCommands::SetDefault { game, name } => {
            service.profiles.set_default(&game, &name).await?;
        }
        ProfileCommands::Export { game, name } => {
            let profile = service.profiles.get(&game, &name).await?;
            print!("{}", service.profiles.export(&profile)?);
        }
        ProfileCommands::Import { game, path } => {
            let content = tokio::fs::read_to_string(&path).await?;
            let profile = service.profiles.import(&game, &content).await?;
            println!("imported as '{}'", profile.name);
        }
        ProfileCommands::Mod { action } => match action {
            ProfileModCommands::Add { game, profile, source, mod_id, version } => {
                service
                    .profiles
                    .upsert_mod(&game, &profile, ModReference { source, mod_id, version, file_ids: Vec::new() })
                    .await?;
            }
            ProfileModCommands::Remove { game, profile, source, mod_id } => {
                service.profiles.remove_mod(&game, &profile, &source, &mod_id).await?;
            }
        },
    }
    Ok(())
}

async fn run_reconcile(
    service: &Service,
    game_id: &str,
    profile_name: Option<String>,
    force_hooks: bool,
) -> lmm::error::Result<()> {
    let game = service.games.get(game_id)?;
    let profile_name = match profile_name {
        Some(name) => name,
        None => service
            .profiles
            .default_profile(game_id)
            .await?
            .ok_or_else(|| lmm::error::Error::not_found("no default profile set"))?,
    };
    let profile = service.profiles.get(game_id, &profile_name).await?;
    let cache = service.cache_for(game_id)?;
    let reconciler = Reconciler::new(&cache, &service.ledger, &service.hooks);
    let plan = reconciler.plan(game_id, &profile)?;

    println!(
        "plan: {} to disable, {} to enable, {} to install",
        plan.disable.len(),
        plan.enable.len(),
        plan.install.len()
    );

    let cancel = CancelToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_for_signal.cancel();
        }
    });

    let sources = service.sources_as_slice();
    let report = reconciler
        .execute(game, &profile, &sources, &game.hooks, &plan, force_hooks, &cancel)
        .await?;

    println!(
        "done: {} disabled, {} enabled, {} installed, {} failed",
        report.disabled,
        report.enabled,
        report.installed,
        report.failures.len()
    );
    for failure in &report.failures {
        eprintln!("  {}:{} failed: {}", failure.source, failure.mod_id, failure.message);
    }
    Ok(())
}

async fn run_install(
    service: &Service,
    game_id: &str,
    profile: &str,
    source: &str,
    mod_id: &str,
    version: &str,
) -> lmm::error::Result<()> {
    let game = service.games.get(game_id)?;
    let cache = service.cache_for(game_id)?;
    let mut file_ids = Vec::new();
    if !cache.exists(game_id, source, mod_id, version) {
        let adapter = service.source(source)?;
        let source_game_id = game.source_game_id(source).unwrap_or(game_id);
        let files = adapter.list_files(source_game_id, mod_id).await?;
        let file = files.iter().find(|f| f.is_primary).or_else(|| files.first());
        let file = file.ok_or_else(|| lmm::error::Error::not_found(format!("{mod_id} has no files")))?;
        let scratch = cache.download_scratch_path(game_id, mod_id, &file.file_id)?;
        adapter.download(source_game_id, mod_id, &file.file_id, &scratch).await?;
        let result = cache.put(game_id, source, mod_id, version, &scratch);
        let _ = std::fs::remove_file(&scratch);
        result?;
        file_ids.push(file.file_id.clone());
    }

    let cancel = CancelToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_for_signal.cancel();
        }
    });

    let installer = lmm::installer::Installer::new(&cache, &service.ledger);
    let count = installer.install(
        game_id, profile, source, mod_id, version, &file_ids, &game.mod_path, game.link_method, &cancel,
    )?;
    println!("deployed {count} files");
    Ok(())
}

async fn run_uninstall(
    service: &Service,
    game_id: &str,
    profile: &str,
    source: &str,
    mod_id: &str,
) -> lmm::error::Result<()> {
    let game = service.games.get(game_id)?;
    let cache = service.cache_for(game_id)?;
    let installer = lmm::installer::Installer::new(&cache, &service.ledger);
    let count = installer.uninstall(game_id, profile, source, mod_id, &game.mod_path)?;
    println!("removed {count} files");
    Ok(())
}

async fn run_conflicts(
    service: &Service,
    game_id: &str,
    profile: &str,
    source: &str,
    mod_id: &str,
    version: &str,
) -> lmm::error::Result<()> {
    let cache = service.cache_for(game_id)?;
    let installer = lmm::installer::Installer::new(&cache, &service.ledger);
    let conflicts = installer.get_conflicts(game_id, profile, source, mod_id, version)?;
    for conflict in conflicts {
        println!("{} owned by {}:{}", conflict.relative_path, conflict.current_owner.0, conflict.current_owner.1);
    }
    Ok(())
}

async fn run_status(service: &Service, game_id: &str, profile: &str) -> lmm::error::Result<()> {
    for m in service.ledger.list_installed_mods(game_id, profile)? {
        println!(
            "{}:{} v{} enabled={} deployed={}",
            m.source, m.mod_id, m.version, m.enabled, m.deployed
        );
    }
    Ok(())
}

async fn run_cache_gc(service: &Service, game_ids: &[String]) -> lmm::error::Result<()> {
    for game_id in game_ids {
        let cache = service.cache_for(game_id)?;
        let mut referenced = std::collections::HashSet::new();
        for profile in service.profiles.list(game_id).await? {
            for reference in &profile.mods {
                referenced.insert((reference.source.clone(), reference.mod_id.clone(), reference.version.clone()));
            }
            for m in service.ledger.list_installed_mods(game_id, &profile.name)? {
                referenced.insert((m.source.clone(), m.mod_id.clone(), m.version.clone()));
            }
        }

        for (game, source, mod_id, version) in cache.all_entries()? {
            if !referenced.contains(&(source.clone(), mod_id.clone(), version.clone())) {
                cache.delete(&game, &source, &mod_id, &version)?;
                println!("removed cache entry {game}/{source}/{mod_id}/{version}");
            }
        }
    }
    Ok(())
}
