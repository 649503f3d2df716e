//! CLI subcommands: init, validate, config, create-host, destroy-host, hosts,
//! completions.

use crate::backend::{backend_from_settings, Backend};
use crate::core::config::{self, ConfigSources, FileSource};
use crate::core::types::{HostRecord, HostRequest, ProvisionEvent, Settings};
use crate::core::{eventlog, logging, parser, state};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use owo_colors::{OwoColorize, Stream::Stdout};
use serde_yaml_ng::Value;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Console banner, one entry per line.
pub const BANNER: [&str; 3] = ["- - - - - - -", "S t r e t c h", "- - - - - - -"];

#[derive(Parser, Debug)]
#[command(
    name = "stretch",
    version,
    about = "Provision fleet hosts: create a server, install the cluster key, reconfigure and restart fleet"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// YAML config file (default: config.yml, skipped when missing)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Also append log records to this file
    #[arg(long, global = true)]
    pub log: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log at trace level
    #[arg(long, global = true)]
    pub debug: bool,

    /// Override a config key (dotted), e.g. --set backend.region=ORD
    #[arg(short, long = "set", value_name = "KEY=VALUE", global = true)]
    pub set: Vec<String>,

    /// Do not print the banner
    #[arg(long, global = true)]
    pub no_banner: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a template config.yml
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate the merged configuration
    Validate,

    /// Print the merged configuration (secrets redacted)
    Config,

    /// Provision and bootstrap a host for a service
    CreateHost {
        /// Service the host runs
        #[arg(long)]
        service: String,
    },

    /// Delete every server with this name
    DestroyHost {
        /// Host name as printed by create-host
        name: String,
    },

    /// List recorded hosts
    Hosts,

    /// Print shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Run a parsed command line.
pub fn run(cli: Cli) -> Result<(), String> {
    if let Commands::Completions { shell } = cli.command {
        return write_completions(shell, &mut std::io::stdout());
    }

    if !cli.global.no_banner && std::io::stdout().is_terminal() {
        print_banner();
    }

    if let Commands::Init { path } = &cli.command {
        return cmd_init(path);
    }

    let settings = config::load_settings(&sources_from(&cli.global)?)?;
    logging::init(&settings)?;
    let _span = logging::process_span().entered();
    tracing::debug!(
        "Loaded configuration (provider {}, state dir {})",
        settings.backend.provider,
        settings.state_dir.display()
    );

    dispatch(cli.command, &settings)
}

/// Dispatch a command against loaded settings.
pub fn dispatch(cmd: Commands, settings: &Settings) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate => cmd_validate(settings),
        Commands::Config => cmd_config(settings),
        Commands::CreateHost { service } => cmd_create_host(settings, &service),
        Commands::DestroyHost { name } => cmd_destroy_host(settings, &name),
        Commands::Hosts => cmd_hosts(&settings.state_dir),
        Commands::Completions { shell } => write_completions(shell, &mut std::io::stdout()),
    }
}

fn print_banner() {
    for line in BANNER {
        println!("{}", line.if_supports_color(Stdout, |t| t.cyan()));
    }
    println!();
}

/// Build config sources from the global flags. Dedicated flags win over
/// `--set` for the same key.
pub fn sources_from(global: &GlobalArgs) -> Result<ConfigSources<'_>, String> {
    let file = match &global.config {
        Some(path) => FileSource::Explicit(path.as_path()),
        None => FileSource::Default,
    };
    let mut sources = ConfigSources::from_process_env(file);
    for arg in &global.set {
        sources.overrides.push(config::parse_override(arg)?);
    }
    if global.debug {
        sources.overrides.push(("debug".to_string(), Value::Bool(true)));
    }
    if global.verbose {
        sources.overrides.push(("verbose".to_string(), Value::Bool(true)));
    }
    if let Some(log) = &global.log {
        sources
            .overrides
            .push(("log".to_string(), Value::String(log.display().to_string())));
    }
    Ok(sources)
}

const CONFIG_TEMPLATE: &str = r#"# stretch configuration
#
# Precedence: command line (--set, --verbose, --debug, --log) >
# environment (STRETCH_*, `__` for nesting) > this file > defaults.

# verbose: false
# debug: false
# log: stretch.log
state_dir: state
etcd_host: "172.17.42.1:4001"
# cluster_key_file: cluster.key

backend:
  provider: rackspace
  # username: my-user
  # api_key: set STRETCH_BACKEND__API_KEY instead of storing it here
  region: DFW
  flavor_name: "512MB Standard Instance"
  coreos_image_id: "430d35e0-1468-4007-b063-52ee1921b356"
  image_prefix: stretch
  save_built_images: true
  delete_unused_images: true
  host_hash_length: 16
  use_public_network: false
  # key_name: my-keypair
  ssh_user: core
  # ssh_key: ~/.ssh/id_ed25519
  build_timeout_secs: 900
  poll_interval_secs: 10
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join(config::DEFAULT_CONFIG_FILE);
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::create_dir_all(path)
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&config_path, CONFIG_TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized stretch config at {}", config_path.display());
    Ok(())
}

fn cmd_validate(settings: &Settings) -> Result<(), String> {
    ensure_valid(settings)?;
    println!(
        "OK: provider {}, region {}, flavor \"{}\", state dir {}",
        settings.backend.provider,
        settings.backend.effective_region(),
        settings.backend.flavor_name,
        settings.state_dir.display()
    );
    Ok(())
}

/// Print validation errors and fail if there are any.
fn ensure_valid(settings: &Settings) -> Result<(), String> {
    let errors = parser::validate_settings(settings);
    if errors.is_empty() {
        return Ok(());
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

fn cmd_config(settings: &Settings) -> Result<(), String> {
    print!("{}", render_config(settings)?);
    Ok(())
}

fn render_config(settings: &Settings) -> Result<String, String> {
    serde_yaml_ng::to_string(&settings.redacted()).map_err(|e| format!("serialize error: {}", e))
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Runtime::new().map_err(|e| format!("cannot start async runtime: {}", e))
}

fn cmd_create_host(settings: &Settings, service: &str) -> Result<(), String> {
    parser::validate_service_name(service, settings.backend.host_hash_length)?;
    ensure_valid(settings)?;
    let backend = backend_from_settings(settings).map_err(|e| e.to_string())?;
    let record = create_host_with(backend.as_ref(), settings, service)?;
    println!("Created host {} at {}", record.name, record.address);
    Ok(())
}

fn create_host_with(
    backend: &dyn Backend,
    settings: &Settings,
    service: &str,
) -> Result<HostRecord, String> {
    let state_dir = &settings.state_dir;
    eventlog::record(
        state_dir,
        ProvisionEvent::HostCreateStarted {
            service: service.to_string(),
            provider: backend.name().to_string(),
        },
    );

    let started = Instant::now();
    let request = HostRequest {
        service: service.to_string(),
    };
    let result = runtime()?.block_on(backend.create_host(&request));

    match result {
        Ok(record) => {
            state::record_host(state_dir, &record)?;
            eventlog::record(
                state_dir,
                ProvisionEvent::HostCreated {
                    host: record.name.clone(),
                    server_id: record.server_id.clone(),
                    address: record.address.clone(),
                    duration_seconds: started.elapsed().as_secs_f64(),
                },
            );
            tracing::info!("Host {} ready at {}", record.name, record.address);
            Ok(record)
        }
        Err(e) => {
            eventlog::record(
                state_dir,
                ProvisionEvent::HostCreateFailed {
                    service: service.to_string(),
                    error: e.to_string(),
                },
            );
            Err(e.to_string())
        }
    }
}

fn cmd_destroy_host(settings: &Settings, name: &str) -> Result<(), String> {
    ensure_valid(settings)?;
    let backend = backend_from_settings(settings).map_err(|e| e.to_string())?;
    let deleted = destroy_host_with(backend.as_ref(), settings, name)?;
    println!("Destroyed {}: {} server(s) deleted", name, deleted);
    Ok(())
}

fn destroy_host_with(backend: &dyn Backend, settings: &Settings, name: &str) -> Result<usize, String> {
    let deleted = runtime()?
        .block_on(backend.destroy_host(name))
        .map_err(|e| e.to_string())?;
    let forgotten = state::forget_host(&settings.state_dir, name)?;
    if deleted == 0 && forgotten.is_none() {
        tracing::warn!("No server or record named {}", name);
    }
    eventlog::record(
        &settings.state_dir,
        ProvisionEvent::HostDestroyed {
            host: name.to_string(),
            servers_deleted: deleted,
        },
    );
    Ok(deleted)
}

fn cmd_hosts(state_dir: &Path) -> Result<(), String> {
    let hosts = state::list_hosts(state_dir)?;
    if hosts.is_empty() {
        println!("No hosts recorded. Run `stretch create-host --service <name>` first.");
        return Ok(());
    }
    for host in &hosts {
        println!("{}", format_host_line(host));
    }
    println!();
    println!("{} host(s)", hosts.len());
    Ok(())
}

fn format_host_line(host: &HostRecord) -> String {
    format!(
        "{:<32} {:<16} {:<15} {} [{}]",
        host.name, host.service, host.address, host.created_at, host.server_id
    )
}

fn write_completions(shell: Shell, out: &mut dyn Write) -> Result<(), String> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "stretch", out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalBackend;
    use crate::core::types::Provider;

    fn local_settings(dir: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.state_dir = dir.join("state");
        settings.backend.provider = Provider::Local;
        settings
    }

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stretch",
            "create-host",
            "--service",
            "web",
            "-v",
            "--set",
            "backend.region=ORD",
            "--no-banner",
        ])
        .unwrap();
        assert!(cli.global.verbose);
        assert!(cli.global.no_banner);
        assert_eq!(cli.global.set, vec!["backend.region=ORD".to_string()]);
        match cli.command {
            Commands::CreateHost { service } => assert_eq!(service, "web"),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_command_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_banner_lines() {
        assert_eq!(BANNER[1], "S t r e t c h");
        assert_eq!(BANNER[0], BANNER[2]);
    }

    #[test]
    fn test_init_writes_loadable_template() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("project");
        cmd_init(&sub).unwrap();
        let path = sub.join("config.yml");
        assert!(path.exists());

        let sources = ConfigSources {
            file: FileSource::Explicit(&path),
            env: Vec::new(),
            overrides: Vec::new(),
        };
        let settings = config::load_settings(&sources).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.yml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_sources_from_flags() {
        let global = GlobalArgs {
            config: Some(PathBuf::from("custom.yml")),
            log: Some(PathBuf::from("out.log")),
            verbose: true,
            debug: false,
            set: vec!["backend.host_hash_length=8".to_string()],
            no_banner: false,
        };
        let sources = sources_from(&global).unwrap();
        assert!(matches!(sources.file, FileSource::Explicit(p) if p == Path::new("custom.yml")));
        assert!(sources
            .overrides
            .contains(&("verbose".to_string(), Value::Bool(true))));
        assert!(sources
            .overrides
            .contains(&("log".to_string(), Value::String("out.log".to_string()))));
        assert!(!sources.overrides.iter().any(|(k, _)| k == "debug"));
        assert_eq!(sources.overrides[0].0, "backend.host_hash_length");
    }

    #[test]
    fn test_sources_from_bad_set() {
        let global = GlobalArgs {
            set: vec!["no-equals".to_string()],
            ..GlobalArgs::default()
        };
        assert!(sources_from(&global).is_err());
    }

    #[test]
    fn test_validate_valid_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        cmd_validate(&local_settings(dir.path())).unwrap();

        let rackspace = Settings::default();
        let err = cmd_validate(&rackspace).unwrap_err();
        assert_eq!(err, "2 validation error(s)");
    }

    #[test]
    fn test_render_config_redacts_key() {
        let mut settings = Settings::default();
        settings.backend.api_key = Some("super-secret".to_string());
        let yaml = render_config(&settings).unwrap();
        assert!(yaml.contains("********"));
        assert!(!yaml.contains("super-secret"));
        let back: Settings = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back.backend.region, "DFW");
    }

    #[test]
    fn test_create_host_local_records_state_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let settings = local_settings(dir.path());
        let backend = LocalBackend::new(8);

        let record = create_host_with(&backend, &settings, "web").unwrap();

        let hosts = state::list_hosts(&settings.state_dir).unwrap();
        assert_eq!(hosts, vec![record.clone()]);
        let events = eventlog::read_events(&settings.state_dir).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0].event,
            ProvisionEvent::HostCreateStarted { service, provider }
                if service == "web" && provider == "local"
        ));
        assert!(matches!(
            &events[1].event,
            ProvisionEvent::HostCreated { host, address, .. }
                if host == &record.name && address == "127.0.0.1"
        ));
    }

    #[test]
    fn test_cmd_create_host_rejects_bad_service() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_create_host(&local_settings(dir.path()), "Web Server").unwrap_err();
        assert!(err.contains("invalid service name"));
        assert!(!settings_state_exists(dir.path()));
    }

    fn settings_state_exists(dir: &Path) -> bool {
        dir.join("state").exists()
    }

    #[test]
    fn test_cmd_create_and_destroy_host_local() {
        let dir = tempfile::tempdir().unwrap();
        let settings = local_settings(dir.path());
        cmd_create_host(&settings, "db").unwrap();
        let hosts = state::list_hosts(&settings.state_dir).unwrap();
        assert_eq!(hosts.len(), 1);

        cmd_destroy_host(&settings, &hosts[0].name).unwrap();
        assert!(state::list_hosts(&settings.state_dir).unwrap().is_empty());
        let events = eventlog::read_events(&settings.state_dir).unwrap();
        assert!(matches!(
            events.last().map(|e| &e.event),
            Some(ProvisionEvent::HostDestroyed { servers_deleted: 0, .. })
        ));
    }

    #[test]
    fn test_destroy_unknown_host_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = local_settings(dir.path());
        let deleted = destroy_host_with(&LocalBackend::new(8), &settings, "ghost-1").unwrap();
        assert_eq!(deleted, 0);
    }

    #[test]
    fn test_hosts_empty_and_populated() {
        let dir = tempfile::tempdir().unwrap();
        let settings = local_settings(dir.path());
        cmd_hosts(&settings.state_dir).unwrap();
        create_host_with(&LocalBackend::new(4), &settings, "web").unwrap();
        cmd_hosts(&settings.state_dir).unwrap();
    }

    #[test]
    fn test_format_host_line() {
        let host = HostRecord {
            name: "web-abcd".to_string(),
            service: "web".to_string(),
            server_id: "srv-1".to_string(),
            address: "10.0.0.5".to_string(),
            image_id: "img".to_string(),
            flavor: "512MB Standard Instance".to_string(),
            key_fingerprint: None,
            created_at: "2026-10-17T12:00:00Z".to_string(),
        };
        let line = format_host_line(&host);
        assert!(line.starts_with("web-abcd "));
        assert!(line.contains("10.0.0.5"));
        assert!(line.ends_with("[srv-1]"));
    }

    #[test]
    fn test_completions_bash() {
        let mut out = Vec::new();
        write_completions(Shell::Bash, &mut out).unwrap();
        let script = String::from_utf8(out).unwrap();
        assert!(script.contains("stretch"));
        assert!(script.contains("create-host"));
    }

    #[test]
    fn test_dispatch_hosts() {
        let dir = tempfile::tempdir().unwrap();
        dispatch(Commands::Hosts, &local_settings(dir.path())).unwrap();
    }
}
