mod cli;
mod render;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use socialhome_client::models::ContactKind;
use socialhome_client::{
    default_definitions, ClientConfig, Profile, SessionState, StreamParams, Synchronizer,
};

#[derive(Parser)]
#[command(author, version, about = "Terminal client for socialhome streams")]
struct Args {
    /// Instance URL, overrides the config file and SOCIALHOME_BASE_URL
    #[arg(long)]
    base_url: Option<String>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Treat the session as signed in as this profile uuid
    #[arg(long)]
    user: Option<String>,

    /// CSRF token sent with every request
    #[arg(long)]
    csrf_token: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive browser (default)
    Browse,
    /// Print a stream, optionally paging further back
    Stream {
        name: String,
        /// Route parameter as key=value, e.g. tag_name=rust
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Print a single content and its replies
    Content {
        id: u64,
        /// Load the whole conversation instead of the direct thread
        #[arg(long)]
        full: bool,
    },
    /// Print a profile and optionally one page of its contacts
    Profile {
        uuid: String,
        #[arg(long, value_enum)]
        contacts: Option<ContactsArg>,
    },
    /// Show the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ContactsArg {
    Followers,
    Following,
}

impl From<ContactsArg> for ContactKind {
    fn from(arg: ContactsArg) -> Self {
        match arg {
            ContactsArg::Followers => ContactKind::Followers,
            ContactsArg::Following => ContactKind::Following,
        }
    }
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let args = Args::parse();

    let mut config = ClientConfig::load()?;
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(timeout) = args.timeout {
        config.request_timeout_secs = timeout;
    }

    let session = match args.user {
        Some(uuid) => SessionState::authenticated(
            Profile {
                uuid,
                ..Default::default()
            },
            args.csrf_token,
        ),
        None => {
            let session = SessionState::anonymous();
            session.set_csrf_token(args.csrf_token);
            session
        }
    };

    let (sync, events) =
        Synchronizer::from_config(&config, Arc::new(session.clone()), default_definitions())
            .context("failed to set up the synchronizer")?;
    tracing::info!(base_url = %config.base_url, "socialhome client ready");

    match args.command.unwrap_or(Command::Browse) {
        Command::Browse => cli::run_cli(sync, events, session).await,
        Command::Stream {
            name,
            params,
            pages,
        } => {
            let params: StreamParams = params.into_iter().collect();
            let result = async {
                sync.enter_stream(&name, params).await?;
                for _ in 1..pages {
                    if sync.load_older(&name).await?.new_ids.is_empty() {
                        break;
                    }
                }
                Ok::<_, socialhome_client::SyncError>(())
            }
            .await;
            render::drain_events(&events);
            result.with_context(|| format!("failed to load stream '{name}'"))?;
            render::print_stream(&sync, &name);
            Ok(())
        }
        Command::Content { id, full } => {
            let result = sync.enter_stream("content", content_params(id)).await;
            render::drain_events(&events);
            result.with_context(|| format!("failed to load content {id}"))?;
            sync.fetch_replies(id, full).await.ok();
            render::drain_events(&events);
            render::print_thread(&sync, id);
            Ok(())
        }
        Command::Profile { uuid, contacts } => {
            let result = sync.fetch_profile(&uuid).await;
            render::drain_events(&events);
            let profile = result.with_context(|| format!("failed to load profile {uuid}"))?;
            render::print_profile(&profile);
            if let Some(kind) = contacts {
                let kind = ContactKind::from(kind);
                let result = sync.fetch_contacts(kind, &uuid).await;
                render::drain_events(&events);
                result.context("failed to load contacts")?;
                render::print_contacts(&sync, &uuid, kind);
            }
            Ok(())
        }
        Command::Config { save } => {
            println!("{}", render_config(&config)?);
            if save {
                let path = config.save()?;
                println!("Saved to {}", path.display());
            }
            Ok(())
        }
    }
}

fn content_params(id: u64) -> StreamParams {
    StreamParams::from([("id".to_string(), id.to_string())])
}

fn render_config(config: &ClientConfig) -> Result<String> {
    serde_json::to_string_pretty(config).context("failed to render config")
}
