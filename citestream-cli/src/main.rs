mod server;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use citestream_core::{
    Assistant, AssistantConfig, BridgeOutcome, ChatMessage, CitestreamError, HttpAssistant,
    MessageRole, ReplayAssistant, WriterSink, bridge, load_conversation, open_stream,
    render_annotated, render_conversation_html, upstream_history,
};
use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::server::AppState;

const DEFAULT_LOG_FILTER: &str = "citestream=info";

#[derive(Debug, Parser)]
#[command(
    name = "citestream",
    version,
    about = "Bridge assistant chat streams and render cited answers"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve POST /chat and GET /files/{file_id}/download
    Serve {
        #[command(flatten)]
        upstream: UpstreamArgs,

        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:3000")]
        bind: String,
    },
    /// Send one prompt and write the outbound frames to stdout
    Chat {
        #[command(flatten)]
        upstream: UpstreamArgs,

        /// The user message
        prompt: String,
    },
    /// Render a finished message, message list, or captured frame stream
    Render {
        /// JSON message, JSON array of messages, or `data:` frame transcript
        file: PathBuf,

        /// Print the content with citation markers instead of HTML
        #[arg(long)]
        raw: bool,
    },
}

#[derive(Debug, Args)]
struct UpstreamArgs {
    /// Assistant API host
    #[arg(long, env = "ASSISTANT_HOST")]
    host: Option<String>,

    /// Assistant API key
    #[arg(long, env = "ASSISTANT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Assistant name
    #[arg(long, env = "ASSISTANT_NAME")]
    assistant: Option<String>,

    /// Replay a recorded upstream response instead of calling the API
    #[arg(long)]
    replay: Option<PathBuf>,
}

impl UpstreamArgs {
    fn config(&self) -> AssistantConfig {
        // Precedence:
        // 1) command-line flag
        // 2) environment (see AssistantConfig::from_env)
        let mut config = AssistantConfig::from_env();
        if let Some(host) = self.host.as_ref().filter(|host| !host.trim().is_empty()) {
            config.host.clone_from(host);
        }
        if let Some(api_key) = self.api_key.as_ref().filter(|key| !key.trim().is_empty()) {
            config.api_key.clone_from(api_key);
        }
        if let Some(name) = self.assistant.as_ref().filter(|name| !name.trim().is_empty()) {
            config.assistant_name = Some(name.clone());
        }
        config
    }

    /// The upstream to query, plus the configuration error that blocks
    /// requests when no replay stands in for the API.
    fn assistant(&self) -> citestream_core::Result<(Arc<dyn Assistant>, Option<CitestreamError>)> {
        if let Some(path) = &self.replay {
            let replay: Arc<dyn Assistant> = Arc::new(ReplayAssistant::from_path(path)?);
            return Ok((replay, None));
        }

        let config = self.config();
        let config_error = config.require_assistant().err();
        let http: Arc<dyn Assistant> = Arc::new(HttpAssistant::new(config));
        Ok((http, config_error))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> citestream_core::Result<()> {
    match cli.command {
        Command::Serve { upstream, bind } => {
            let (assistant, config_error) = upstream.assistant()?;
            if let Some(err) = &config_error {
                warn!(error = %err, "chat requests will fail until configured");
            }
            let state = AppState::new(assistant, config_error.map(|err| err.raw_message()));
            server::serve(&bind, state).await
        }
        Command::Chat { upstream, prompt } => {
            let (assistant, config_error) = upstream.assistant()?;
            if let Some(err) = config_error {
                return Err(err);
            }

            let history = upstream_history(&[ChatMessage::new(MessageRole::User, prompt)]);
            let stream = open_stream(assistant.as_ref(), history).await;
            let report = bridge(stream, WriterSink::new(io::stdout())).await;
            match report.outcome {
                BridgeOutcome::Failed { message } => Err(CitestreamError::Stream(message)),
                BridgeOutcome::Completed | BridgeOutcome::Exhausted => Ok(()),
            }
        }
        Command::Render { file, raw } => {
            let messages = load_conversation(&file)?;
            if raw {
                for message in &messages {
                    println!("{}", render_annotated(message));
                }
            } else {
                let html = render_conversation_html(&messages);
                print!("{html}");
            }
            Ok(())
        }
    }
}
