//! k8s-ldap-auth - Kubernetes authentication webhook backed by LDAP
//!
//! Validates credentials against a directory service and answers with the
//! user's identity and group memberships.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use ldapauth_core::config::{
    resolve_bind_credentials, BIND_CREDENTIALS_FILE, DEFAULT_DIRECTORY_URL,
    DEFAULT_MEMBER_OF_PROPERTY, DEFAULT_PORT, DEFAULT_SEARCH_FILTER,
};
use ldapauth_core::{ConfigBuilder, SearchScope, ServerConfiguration};
use ldapauth_server::{initialize, JsonLinesSink, LogSink, NotConfigured, TracingSink};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "k8s-ldap-auth")]
#[command(version = ldapauth_core::VERSION)]
#[command(about = "Kubernetes authentication webhook backed by LDAP", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the authentication server
    #[command(visible_aliases = ["s", "serve"])]
    Server(ServerArgs),

    /// Show version information
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// The HOST the server will listen on, all interfaces when empty
    #[arg(long, env = "HOST", default_value = "", value_name = "HOST")]
    host: String,

    /// The PORT the server will listen to
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT, value_name = "PORT")]
    port: u16,

    /// The ldap HOST (and scheme) the server will authenticate against
    #[arg(long = "ldap-host", env = "LDAP_ADDR", default_value = DEFAULT_DIRECTORY_URL, value_name = "HOST")]
    ldap_host: String,

    /// The service account DN to do the ldap search
    #[arg(long, env = "LDAP_BINDDN", value_name = "DN")]
    bind_dn: String,

    /// The service account PASSWORD to do the ldap search, read from
    /// --bind-credentials-file when not given
    #[arg(long, env = "LDAP_BINDCREDENTIALS", hide_env_values = true, value_name = "PASSWORD")]
    bind_credentials: Option<String>,

    /// File holding the service account password
    #[arg(long, default_value = BIND_CREDENTIALS_FILE, value_name = "PATH")]
    bind_credentials_file: PathBuf,

    /// The DN where the ldap search will take place
    #[arg(long, env = "LDAP_USER_SEARCHBASE", default_value = "", value_name = "DN")]
    search_base: String,

    /// The FILTER to select users, %s is replaced by the user name
    #[arg(long, env = "LDAP_USER_SEARCHFILTER", default_value = DEFAULT_SEARCH_FILTER, value_name = "FILTER")]
    search_filter: String,

    /// The PROPERTY where group entitlements are located
    #[arg(long, env = "LDAP_USER_MEMBEROFPROPERTY", default_value = DEFAULT_MEMBER_OF_PROPERTY, value_name = "PROPERTY")]
    member_of_property: String,

    /// Repeatable. User PROPERTY to fetch. Everything beside 'uid', 'dn',
    /// 'cn' (mandatory fields) is stored as extra values
    #[arg(
        long,
        env = "LDAP_USER_SEARCHATTR",
        value_delimiter = ',',
        default_values = ["uid", "dn", "cn"],
        value_name = "PROPERTY"
    )]
    search_attributes: Vec<String>,

    /// The SCOPE of the search: base object 'base', single level 'single'
    /// or whole subtree 'sub'
    #[arg(long, env = "LDAP_USER_SEARCHSCOPE", default_value = "sub", value_parser = parse_scope, value_name = "SCOPE")]
    search_scope: SearchScope,

    /// Write access log records as JSON lines to this file instead of the
    /// application log
    #[arg(long, env = "ACCESS_LOG_FILE", value_name = "PATH")]
    access_log_file: Option<PathBuf>,
}

fn parse_scope(value: &str) -> Result<SearchScope, ldapauth_core::Error> {
    value.parse()
}

impl ServerArgs {
    fn configuration(&self) -> ldapauth_core::Result<ServerConfiguration> {
        let bind_credentials =
            resolve_bind_credentials(self.bind_credentials.clone(), &self.bind_credentials_file)?;

        ConfigBuilder {
            listen_host: self.host.clone(),
            listen_port: self.port,
            directory_url: self.ldap_host.clone(),
            bind_dn: self.bind_dn.clone(),
            bind_credentials,
            search_base: self.search_base.clone(),
            search_scope: self.search_scope,
            search_filter: self.search_filter.clone(),
            member_of_property: self.member_of_property.clone(),
            search_attributes: self.search_attributes.clone(),
        }
        .build()
    }

    fn access_log_sink(&self) -> anyhow::Result<Arc<dyn LogSink>> {
        match &self.access_log_file {
            Some(path) => {
                let sink = JsonLinesSink::append(path)
                    .with_context(|| format!("Failed to open access log {}", path.display()))?;
                Ok(Arc::new(sink))
            }
            None => Ok(Arc::new(TracingSink)),
        }
    }
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    match cli.command {
        Commands::Version => {
            println!("k8s-ldap-auth {}", ldapauth_core::VERSION);
        }
        Commands::Server(args) => {
            run_server(args).await?;
        }
    }

    Ok(())
}

async fn run_server(args: ServerArgs) -> anyhow::Result<()> {
    let config = args
        .configuration()
        .context("Refusing to start the authentication server")?;
    let sink = args.access_log_sink()?;

    info!("Starting k8s-ldap-auth server...");
    let addr = config.listen_address();
    let server = initialize(config, NotConfigured, sink);

    server
        .listen(&addr)
        .await
        .context("There was an error starting the server")
}
