//! Parley command line client

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use parley_context::{EstimateCounter, Message, ModelCatalog, StaticCatalog};
use parley_runtime::{
    CompletionError, CompletionOptions, CompletionOrchestrator, CompletionOutcome, ConfigError,
    Credential, Delivery, EventForwarder, EventKind, EventPayload, ForwardEvent, OpenAIBackend,
    ProviderError, RuntimeConfig,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "parley-cli",
    version,
    about = "Parley command line client",
    long_about = "Run one-off chat completions against an OpenAI-compatible API, trimming the prompt to the model's context window"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    #[command(about = "Run a single completion")]
    Complete(CompleteArgs),
    #[command(about = "List known models and their context sizes")]
    Models,
}

#[derive(Debug, Clone, Args)]
pub struct CompleteArgs {
    #[arg(
        short,
        long,
        env = "PARLEY_MODEL",
        default_value = "gpt-3.5-turbo",
        help = "Model identifier"
    )]
    pub model: String,
    #[arg(short, long, help = "Optional system prompt")]
    pub system: Option<String>,
    #[arg(long, help = "Print the reply as it streams")]
    pub stream: bool,
    #[arg(short, long, default_value_t = 0.0, help = "Sampling temperature")]
    pub temperature: f32,
    #[arg(long, help = "Maximum reply length in tokens")]
    pub max_tokens: Option<usize>,
    #[arg(long, help = "Prompt token budget; derived from the model when omitted")]
    pub budget: Option<usize>,
    #[arg(help = "User prompt")]
    pub prompt: String,
}

impl CompleteArgs {
    pub fn options(&self) -> CompletionOptions {
        CompletionOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_tokens,
            budget: self.budget,
            stream: self.stream,
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(self.prompt.clone()));
        messages
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("provider setup failed: {0}")]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

/// Result of a command: what goes to stdout and an optional usage line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub text: String,
    pub total_tokens: Option<usize>,
}

/// Writes streamed answer text straight to a sink, flushing per delta.
pub struct WriterForwarder<W> {
    sink: Mutex<W>,
    closed: AtomicBool,
}

impl<W: Write + Send> WriterForwarder<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    pub fn into_inner(self) -> W {
        self.sink
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl<W: Write + Send> EventForwarder for WriterForwarder<W> {
    async fn send(&self, event: ForwardEvent) -> Delivery {
        if self.is_closed() {
            return Delivery::Dropped;
        }
        let text = match (&event.kind, &event.payload) {
            (EventKind::Answer, EventPayload::Json(value)) => {
                value["choices"][0]["delta"]["content"].as_str().map(str::to_string)
            }
            _ => None,
        };
        let Some(text) = text else {
            return Delivery::Sent;
        };

        let mut sink = self
            .sink
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match sink.write_all(text.as_bytes()).and_then(|()| sink.flush()) {
            Ok(()) => Delivery::Sent,
            Err(err) => {
                debug!(error = %err, "output closed, stopping stream");
                self.closed.store(true, Ordering::SeqCst);
                Delivery::Dropped
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub async fn run(cli: Cli) -> Result<CommandOutput, CliError> {
    match cli.command {
        Commands::Models => Ok(CommandOutput {
            text: render_models(&StaticCatalog::default()),
            total_tokens: None,
        }),
        Commands::Complete(args) => {
            let config = RuntimeConfig::from_env()?;
            let credential = config
                .api_key
                .clone()
                .map(Credential::new)
                .ok_or(CliError::MissingApiKey)?;
            let backend = OpenAIBackend::new(&config)?;
            let orchestrator = CompletionOrchestrator::new(
                Arc::new(backend),
                Arc::new(EstimateCounter),
                Arc::new(StaticCatalog::default()),
                config,
            );

            let forwarder = WriterForwarder::new(std::io::stdout());
            let outcome = complete(&orchestrator, &credential, &args, &forwarder).await?;
            Ok(command_output(&args, outcome))
        }
    }
}

/// Run one completion; `forwarder` only sees events when `--stream` is set.
pub async fn complete(
    orchestrator: &CompletionOrchestrator,
    credential: &Credential,
    args: &CompleteArgs,
    forwarder: &dyn EventForwarder,
) -> Result<CompletionOutcome, CliError> {
    let outcome = orchestrator
        .execute(&args.options(), credential, &args.messages(), forwarder)
        .await?;
    Ok(outcome)
}

/// Streamed text is already on stdout; only the line break remains.
fn command_output(args: &CompleteArgs, outcome: CompletionOutcome) -> CommandOutput {
    CommandOutput {
        text: if args.stream {
            String::new()
        } else {
            outcome.response_text
        },
        total_tokens: Some(outcome.total_tokens),
    }
}

pub fn render_models(catalog: &dyn ModelCatalog) -> String {
    catalog
        .list()
        .iter()
        .map(|spec| format!("{:<20} {:>6}  {}", spec.model, spec.context_max_tokens, spec.name))
        .collect::<Vec<_>>()
        .join("\n")
}
