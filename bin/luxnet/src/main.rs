//! luxnet is a CLI tool to run local Lux test networks and deploy custom chains onto them.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Command, ConfigCommand, DeployArgs, NetworkCommand, RunCommand, StartArgs};
use luxnet_deploy::{
    AppContext, ChainDeployer, ClusterLauncher, ClusterSource, ClusterSummary, ConfigManager,
    ControlConnector, ControlProcessManager, DeploymentOutcome, DeploymentRequest,
    FsPluginInstaller, GatewayConnector, HealthReport, LaunchOptions, NetworkProfile,
    OsProcessTable, RunManager, Settings, VmId, health::endpoints_table,
};

type Manager = ControlProcessManager<GatewayConnector, OsProcessTable>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let settings = Settings::load(cli.config.as_deref())?;
    let ctx = AppContext::from_settings(&settings);
    let profile = cli.profile;

    tracing::debug!(
        base_dir = %ctx.base_dir().display(),
        %profile,
        "Loaded settings"
    );

    match cli.command {
        Command::Network(command) => network(command, &settings, ctx, profile).await,
        Command::Run(command) => run(command, &ctx, profile),
        Command::Config(command) => config(command, &ctx, profile),
        Command::Deploy(args) => deploy(args, &settings, ctx, profile).await,
        Command::Settings { save } => {
            print!("{}", settings.to_toml()?);
            if save {
                settings.save_to_file(&settings.file_path())?;
            }
            Ok(())
        }
        Command::Vmid { name } => {
            println!("{}", VmId::from_name(&name)?);
            Ok(())
        }
    }
}

async fn network(
    command: NetworkCommand,
    settings: &Settings,
    ctx: AppContext,
    profile: NetworkProfile,
) -> Result<()> {
    let connector = GatewayConnector::new(ctx.host());
    let manager: Manager = ControlProcessManager::new(ctx, connector.clone(), OsProcessTable);

    match command {
        NetworkCommand::Start(args) => {
            start_network(args, settings, &manager, &connector, profile).await
        }
        NetworkCommand::Stop => manager.stop(profile).await,
        NetworkCommand::Status => network_status(settings, &manager, &connector, profile).await,
        NetworkCommand::Serve => {
            let status = manager.serve(profile).await?;
            tracing::info!(%profile, %status, "Network runner exited");
            Ok(())
        }
    }
}

async fn start_network(
    args: StartArgs,
    settings: &Settings,
    manager: &Manager,
    connector: &GatewayConnector,
    profile: NetworkProfile,
) -> Result<()> {
    let outcome = manager.start_and_wait(profile, settings.startup_timeout()).await?;
    tracing::info!(
        %profile,
        pid = outcome.record().pid,
        gateway_port = outcome.record().gateway_port,
        "Network runner ready"
    );

    let source = match (args.snapshot_name, args.node_path.or_else(|| settings.node_path.clone())) {
        (Some(name), _) => ClusterSource::Snapshot(name),
        (None, Some(node_path)) => ClusterSource::Nodes {
            node_path,
            num_nodes: args.num_nodes.unwrap_or(settings.num_nodes),
        },
        (None, None) => {
            tracing::info!("No node binary or snapshot given, not booting a cluster");
            return Ok(());
        }
    };
    let options = LaunchOptions {
        fresh: args.fresh,
        new_run: args.new_run,
        admin: args.admin,
    };

    let client = connector.connect(profile).await?;
    let cluster = ClusterLauncher::new(manager.context(), profile, settings.cluster_start_timeout())
        .launch(&client, &source, options)
        .await?;

    println!("{}", ClusterSummary(&cluster));
    println!("{}", endpoints_table(&cluster));
    Ok(())
}

async fn network_status(
    settings: &Settings,
    manager: &Manager,
    connector: &GatewayConnector,
    profile: NetworkProfile,
) -> Result<()> {
    let Some(record) = manager.record(profile)? else {
        println!("No network runner for profile {profile}");
        return Ok(());
    };
    if !manager.is_running(profile)? {
        println!("Network runner {} of profile {profile} is not running (stale record)", record.pid);
        return Ok(());
    }

    println!(
        "Network runner {} (control port {}, gateway port {})",
        record.pid, record.control_port, record.gateway_port
    );
    println!("Logs: {}", record.log_file.display());

    let client = connector.connect(profile).await?;
    let report = HealthReport::probe(&client, settings.deploy_timeouts().health_probe).await;
    print!("{report}");
    if let Some(cluster) = &report.cluster {
        println!("{}", endpoints_table(cluster));
    }
    Ok(())
}

fn run(command: RunCommand, ctx: &AppContext, profile: NetworkProfile) -> Result<()> {
    let runs = RunManager::new(ctx, profile);
    match command {
        RunCommand::Ensure { fresh, new_run } => {
            println!("{}", runs.ensure_run_dir(fresh, new_run)?.display());
        }
        RunCommand::List => {
            let current = runs.current_run_dir()?;
            for name in runs.list_runs()? {
                let marker = match &current {
                    Some(dir) if dir.file_name().is_some_and(|n| n == name.as_str()) => "*",
                    _ => " ",
                };
                println!("{marker} {name}");
            }
        }
        RunCommand::Current => {
            println!("{}", runs.require_current_run_dir()?.display());
        }
        RunCommand::Clean { keep } => {
            for name in runs.clean_old_runs(keep)? {
                println!("removed {name}");
            }
        }
    }
    Ok(())
}

fn config(command: ConfigCommand, ctx: &AppContext, profile: NetworkProfile) -> Result<()> {
    let runs = RunManager::new(ctx, profile);
    let mut configs = ConfigManager::new(ctx);
    configs.load_deployed_chains_for(profile)?;
    let run_dir = runs.current_run_dir()?;
    if let Some(run_dir) = &run_dir {
        configs.load_run_overrides_all(run_dir)?;
    }

    match command {
        ConfigCommand::Show { chain } => {
            let config = configs
                .get(&chain)
                .with_context(|| format!("Unknown chain {chain}"))?;
            println!("{}", config.effective_json()?);
        }
        ConfigCommand::Set {
            chain,
            values,
            global,
        } => {
            let config = configs
                .get_mut(&chain)
                .with_context(|| format!("Unknown chain {chain}"))?;
            if global {
                for (key, value) in values {
                    config.set_cli_override(key, value);
                }
                config.save_global()?;
            } else {
                let run_dir = run_dir
                    .context("No current run directory; run `luxnet run ensure` first")?;
                for (key, value) in values {
                    config.set_run_override(key, value);
                }
                config.save_run_overrides(&run_dir)?;
            }
            println!("{}", config.effective_json()?);
        }
        ConfigCommand::Render { admin } => {
            let run_dir = runs.ensure_run_dir(false, false)?;
            if admin {
                configs.enable_admin_all();
            }
            for path in configs.render_all(&run_dir)? {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}

async fn deploy(
    args: DeployArgs,
    settings: &Settings,
    ctx: AppContext,
    profile: NetworkProfile,
) -> Result<()> {
    let mut request = match &args.genesis {
        Some(genesis) => DeploymentRequest::new(&args.chain, &args.vm, &args.vm_binary, genesis)?,
        None => DeploymentRequest::from_chain_dir(&ctx, &args.chain, &args.vm, &args.vm_binary)?,
    };
    if let Some(path) = args.chain_config {
        request = request.chain_config_path(path);
    }
    if let Some(path) = args.per_node_config {
        request = request.per_node_config_path(path);
    }
    if let Some(subnet_id) = args.subnet_id {
        request = request.subnet_id(subnet_id);
    }

    let manager: Manager =
        ControlProcessManager::new(ctx.clone(), GatewayConnector::new(ctx.host()), OsProcessTable);
    let deployer = ChainDeployer::new(
        profile,
        GatewayConnector::new(ctx.host()),
        FsPluginInstaller::for_profile(&ctx, profile),
    )
    .with_timeouts(settings.deploy_timeouts())
    .with_backend_log_dir(manager.backend_log_dir(profile)?);

    match deployer.deploy(&request).await? {
        DeploymentOutcome::AlreadyDeployed(chain) => {
            println!(
                "Chain {} is already deployed (blockchain {})",
                chain.chain_name, chain.blockchain_id
            );
        }
        DeploymentOutcome::Deployed(chain) => {
            println!("Chain {} deployed", chain.chain_name);
            println!("  VM ID:         {}", chain.vm_id);
            println!("  Subnet ID:     {}", chain.subnet_id);
            println!("  Blockchain ID: {}", chain.blockchain_id);
            if let Some(endpoint) = &chain.rpc_endpoint {
                println!("  RPC endpoint:  {endpoint}");
            }
        }
    }
    Ok(())
}
