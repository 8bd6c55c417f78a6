//! Gatelink CLI - gateways, links and device stores from the command line

use anyhow::{Context, Result};
use clap::Parser;
use gatelink_control::{
    fixture, store, ActivationError, ActivationOptions, ChannelRegistry, ExportRoot, GatewayError,
    GatewayService, LinkActivator, LinkProvisioner, SshExecutor,
};
use gatelink_db::entities::{device, domain, gateway, link, prelude::*};
use gatelink_proto::{ClientLinkConfig, FixtureEnvelope, RemoteAccess};
use gatelink_runtime::{
    ContainerRuntime, DockerRuntime, LaunchError, RuntimeSettings, TunnelManager,
};
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatelink_cli::cli::{
    Cli, Commands, DeviceCommands, DomainCommands, FixtureCommands, GatewayCommands, LinkCommands,
    LinkOptions,
};
use gatelink_cli::{ConfigManager, GatelinkConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let mut config = ConfigManager::load()?;
    if cli.database_url.is_some() {
        config.database_url = cli.database_url.clone();
    }
    if cli.device_name.is_some() {
        config.device_name = cli.device_name.clone();
    }
    if cli.resources_dir.is_some() {
        config.resources_dir = cli.resources_dir.clone();
    }

    let database_url = config.database_url()?;
    debug!("Using store {}", database_url);
    let db = gatelink_db::connect(&database_url)
        .await
        .context("Failed to open the device store")?;
    gatelink_db::migrate(&db)
        .await
        .context("Failed to migrate the device store")?;

    let session = Session { config, db };

    match cli.command {
        Commands::Device { command } => handle_device_command(&session, command).await,
        Commands::Domain { command } => handle_domain_command(&session, command).await,
        Commands::Gateway { command } => handle_gateway_command(&session, command).await,
        Commands::Link { command } => handle_link_command(&session, command).await,
        Commands::Fixture { command } => handle_fixture_command(&session, command).await,
    }
}

/// Everything a command needs
struct Session {
    config: GatelinkConfig,
    db: DatabaseConnection,
}

impl Session {
    fn device_name(&self) -> Result<&str> {
        self.config.device_name.as_deref().context(
            "No device name configured. Run `gatelink device register <name> --current` first",
        )
    }

    fn tunnel_manager(&self) -> Result<Arc<TunnelManager>> {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(
            DockerRuntime::connect().context("Failed to connect to the container runtime")?,
        );
        let settings = match &self.config.resources_dir {
            Some(dir) => RuntimeSettings::with_resources_dir(dir),
            None => RuntimeSettings::default(),
        };
        Ok(Arc::new(TunnelManager::new(runtime, settings)))
    }
}

async fn handle_device_command(session: &Session, command: DeviceCommands) -> Result<()> {
    match command {
        DeviceCommands::Register { name, ssh, current } => {
            let device = store::get_or_create_device(&session.db, &name).await?;
            let access = ssh
                .ssh_host
                .map(|host| RemoteAccess::new(host, ssh.ssh_port.unwrap_or(22)));
            let device = store::set_device_remote_access(&session.db, device, access).await?;

            if current {
                ConfigManager::set_device_name(device.name.clone())?;
            }

            println!("✅ Device registered: {}", device.name);
            if let Some(access) = device.remote_access() {
                println!("   Remote shell: {}", access);
            }
            if current {
                println!("   This machine now runs as '{}'", device.name);
            }
        }
        DeviceCommands::List => {
            let devices = Device::find()
                .order_by_asc(device::Column::Name)
                .all(&session.db)
                .await?;

            if devices.is_empty() {
                println!("No devices registered");
                return Ok(());
            }

            for device in devices {
                let marker = if session.config.device_name.as_deref() == Some(&device.name) {
                    "*"
                } else {
                    " "
                };
                match device.remote_access() {
                    Some(access) => println!("{} {}  {}  ssh://{}", marker, device.name, device.id, access),
                    None => println!("{} {}  {}", marker, device.name, device.id),
                }
            }
        }
    }

    Ok(())
}

async fn handle_domain_command(session: &Session, command: DomainCommands) -> Result<()> {
    match command {
        DomainCommands::Add { uri } => {
            let device = store::get_or_create_device(&session.db, session.device_name()?).await?;
            let domain = store::get_or_create_domain(&session.db, &uri.to_lowercase()).await?;
            store::authorize_device(&session.db, domain.id, device.id).await?;

            println!("✅ {} served by {}", domain.uri, device.name);
        }
        DomainCommands::List => {
            let domains = Domain::find()
                .order_by_asc(domain::Column::Uri)
                .all(&session.db)
                .await?;

            for domain in domains {
                let devices = store::domain_devices(&session.db, domain.id).await?;
                println!("{}  ({} device(s))", domain.uri, devices.len());
            }
        }
    }

    Ok(())
}

async fn handle_gateway_command(session: &Session, command: GatewayCommands) -> Result<()> {
    match command {
        GatewayCommands::Init { name, fqdn } => {
            let service = gateway_service(session)?;
            let gateway = service
                .init_gateway(&name, &fqdn)
                .await
                .map_err(gateway_failure)?;

            println!("✅ Gateway {} is up", gateway.name);
            println!("   Id: {}", gateway.id);
        }
        GatewayCommands::Register { name, fqdn } => {
            let service = gateway_service(session)?;
            let gateway = service
                .register_gateway(&name, &fqdn)
                .await
                .map_err(gateway_failure)?;

            println!("✅ {} registered on gateway {}", fqdn, gateway.name);
        }
        GatewayCommands::Launch { gateway } => {
            let service = gateway_service(session)?;
            let gateway = service
                .launch_gateway(&gateway)
                .await
                .map_err(gateway_failure)?;

            println!("✅ Gateway {} relaunched", gateway.name);
        }
        GatewayCommands::Add {
            name,
            ssh_host,
            ssh_port,
        } => {
            let gateway = store::create_remote_gateway(
                &session.db,
                &name,
                RemoteAccess::new(ssh_host, ssh_port),
            )
            .await?;

            println!("✅ Gateway {} recorded ({})", gateway.name, gateway.id);
        }
        GatewayCommands::List => {
            let gateways = Gateway::find()
                .order_by_asc(gateway::Column::Name)
                .all(&session.db)
                .await?;

            if gateways.is_empty() {
                println!("No gateways registered");
                return Ok(());
            }

            for gateway in gateways {
                match gateway.remote_access() {
                    Some(access) => println!("{}  {}  ssh://{}", gateway.name, gateway.id, access),
                    None => println!("{}  {}", gateway.name, gateway.id),
                }
            }
        }
    }

    Ok(())
}

fn gateway_service(session: &Session) -> Result<GatewayService> {
    Ok(GatewayService::new(
        session.db.clone(),
        session.tunnel_manager()?,
        session.device_name()?,
    ))
}

async fn handle_link_command(session: &Session, command: LinkCommands) -> Result<()> {
    match command {
        LinkCommands::Create {
            subdomain,
            domain,
            service,
        } => {
            let (link, domain) =
                store::create_link(&session.db, &domain.to_lowercase(), &subdomain, service)
                    .await?;

            println!("✅ Link created: {}", link.fqdn(&domain));
        }
        LinkCommands::List => {
            let links = Link::find()
                .find_also_related(Domain)
                .order_by_asc(link::Column::CreatedAt)
                .all(&session.db)
                .await?;

            for (link, domain) in links {
                let Some(domain) = domain else { continue };
                let port = |p: Option<u16>| p.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
                let service = link.service.as_deref().unwrap_or("-");
                println!(
                    "{}  service={}  forward_port={}  center_port={}",
                    link.fqdn(&domain),
                    service,
                    port(link.forward_port()),
                    port(link.center_port())
                );
            }
        }
        LinkCommands::Activate {
            fqdn,
            gateway,
            options,
            expose,
        } => handle_link_activate(session, &fqdn, &gateway, options, expose).await?,
        LinkCommands::Down { fqdn } => {
            session
                .tunnel_manager()?
                .stop_link(&fqdn)
                .await
                .map_err(launch_failure)?;

            println!("✅ {} is down", fqdn);
        }
        LinkCommands::Up {
            gateway_id,
            fqdn,
            options,
        } => {
            let provisioner = LinkProvisioner::new(session.tunnel_manager()?);
            let result = provisioner
                .provision(
                    &gateway_id,
                    &fqdn,
                    options.tcp_forwarding,
                    options.forward_port,
                    options.center_port,
                )
                .await
                .map_err(launch_failure)?;

            // Read back by the activating device; must stay the last stdout line
            println!("{}", result.to_wire());
        }
    }

    Ok(())
}

async fn handle_link_activate(
    session: &Session,
    fqdn: &str,
    gateway: &str,
    options: LinkOptions,
    expose: Option<String>,
) -> Result<()> {
    let provisioner = Arc::new(LinkProvisioner::new(session.tunnel_manager()?));
    let remote = Arc::new(SshExecutor::new(session.config.ssh_settings()));
    // No task channels: their transport lives in an embedding process
    let activator = LinkActivator::new(
        session.db.clone(),
        provisioner,
        remote,
        ChannelRegistry::new(),
        session.config.activation_settings(),
    );

    let result = activator
        .activate_fqdn(
            fqdn,
            gateway,
            ActivationOptions {
                tcp_forwarding: options.tcp_forwarding,
                forward_port: options.forward_port,
                center_port: options.center_port,
            },
        )
        .await
        .map_err(activation_failure)?;

    let expose = match expose {
        Some(expose) => expose,
        None => store::resolve_link(&session.db, fqdn)
            .await?
            .and_then(|(link, _)| link.service)
            .unwrap_or_else(|| "app:80".to_string()),
    };

    info!(fqdn = %fqdn, port = result.forward_port, "Link is up");

    let client = ClientLinkConfig::for_link(fqdn, &expose, &result, options.tcp_forwarding);
    println!("✅ {} is up", fqdn);
    println!("   Tunnel endpoint: {}", result.tunnel_address);
    println!("   Forward port:    {}", result.forward_port);
    if let Some(port) = result.center_port {
        println!("   TCP forwarding:  {}", port);
    }
    println!();
    println!("Client service:");
    print!(
        "{}",
        client
            .to_compose_snippet()
            .context("Failed to render client configuration")?
    );

    Ok(())
}

async fn handle_fixture_command(session: &Session, command: FixtureCommands) -> Result<()> {
    match command {
        FixtureCommands::Export { root, output } => {
            let root = match (root.gateway, root.device) {
                (Some(reference), _) => {
                    let gateway = store::find_gateway(&session.db, &reference)
                        .await?
                        .with_context(|| format!("Gateway not found: {}", reference))?;
                    ExportRoot::Gateway(gateway.id)
                }
                (None, Some(name)) => {
                    let device = store::current_device(&session.db, &name)
                        .await?
                        .with_context(|| format!("Device not found: {}", name))?;
                    ExportRoot::Device(device.id)
                }
                (None, None) => anyhow::bail!("Pass --gateway or --device"),
            };

            let envelope = fixture::export(&session.db, root).await?;
            let json = serde_json::to_string_pretty(&envelope)
                .context("Failed to serialize fixture envelope")?;

            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    eprintln!(
                        "✅ Exported {} record(s) to {:?} (transaction {})",
                        envelope.records.len(),
                        path,
                        envelope.transaction_id
                    );
                }
                None => println!("{}", json),
            }
        }
        FixtureCommands::Import { input } => {
            let json = read_input(&input)?;
            let envelope: FixtureEnvelope =
                serde_json::from_str(&json).context("Failed to parse fixture envelope")?;

            let report = fixture::import(&session.db, &envelope).await?;
            if report.replayed {
                println!(
                    "Transaction {} was already applied, nothing to do",
                    report.transaction_id
                );
            } else {
                println!(
                    "✅ Applied {} record(s), kept {} existing (transaction {})",
                    report.applied, report.skipped, report.transaction_id
                );
            }
        }
    }

    Ok(())
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read stdin")?;
        return Ok(buffer);
    }

    std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
}

fn port_in_use(port: u16) -> anyhow::Error {
    anyhow::anyhow!(
        "Port {port} is already allocated on this host.\n\
         Stop whatever is listening on it (`ss -lntup | grep :{port}`) or the container \
         publishing it (`docker ps --filter publish={port}`), then retry."
    )
}

fn launch_failure(error: LaunchError) -> anyhow::Error {
    match error {
        LaunchError::PortAlreadyAllocated(port) => port_in_use(port),
        other => anyhow::Error::new(other).context("Failed to bring the link up"),
    }
}

fn activation_failure(error: ActivationError) -> anyhow::Error {
    match error.conflicting_port() {
        Some(port) => port_in_use(port),
        None => anyhow::Error::new(error).context("Link activation failed"),
    }
}

fn gateway_failure(error: GatewayError) -> anyhow::Error {
    match error {
        GatewayError::PortAlreadyAllocated(port) => port_in_use(port),
        other => anyhow::Error::new(other),
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    // stdout carries command output, including the `link up` response
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
