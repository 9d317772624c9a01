use std::io::Write;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use lmchat::client::{ChatSession, ResponseSource, TurnEvent};
use lmchat::config;
use lmchat::stream::thinking::split_thinking;
use lmchat::stream::{DeltaMode, StreamReassembler};

const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Logs go to stderr so streamed text on stdout stays clean
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "lmchat=info".into()),
    );
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let result = match args.command {
        cli::Commands::Ask { prompt, turn } => match open_session(&turn).await {
            Ok(mut session) => run_turn(&mut session, &prompt, turn.hide_thinking).await,
            Err(e) => Err(e),
        },
        cli::Commands::Chat { turn } => run_chat(&turn).await,
        cli::Commands::Models => list_models().await,
        cli::Commands::Decode { file, chunk_size } => decode_transcript(file, chunk_size).await,
    };

    if let Err(ref e) = result {
        tracing::error!("{:#}", e);
    }
    result
}

async fn open_session(turn: &cli::TurnArgs) -> anyhow::Result<ChatSession> {
    let cfg = config::load()?;
    let mut session = ChatSession::new(cfg).context("failed to create HTTP client")?;

    if let Some(model) = &turn.model {
        session.set_model(model.clone());
    }
    if let Some(max_tokens) = turn.max_tokens {
        session.set_max_tokens(max_tokens);
    }
    if let Some(system) = &turn.system {
        session.set_system_message(Some(system.clone()));
    }
    session.set_streaming(!turn.no_stream);

    let model = session.resolve_model().await;
    tracing::info!("using model {}", model);
    Ok(session)
}

async fn run_turn(session: &mut ChatSession, prompt: &str, hide_thinking: bool) -> anyhow::Result<()> {
    let mut renderer = Renderer::new(std::io::stdout(), hide_thinking);
    let outcome = session
        .send(prompt, |event| renderer.on_event(event))
        .await?;
    renderer.check()?;

    // Nothing was streamed in this case, print the whole message
    if outcome.source == ResponseSource::NonStreaming {
        renderer.print_message(&outcome.message.content);
        renderer.check()?;
    }
    if outcome.source == ResponseSource::StreamTruncated {
        eprintln!("\n[stream interrupted, answer may be incomplete]");
    }
    if outcome.dropped_frames > 0 {
        tracing::warn!("{} malformed frames were skipped", outcome.dropped_frames);
    }
    renderer.write("\n");
    renderer.check()?;
    Ok(())
}

async fn run_chat(turn: &cli::TurnArgs) -> anyhow::Result<()> {
    let mut session = open_session(turn).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/exit" {
            break;
        }

        if let Err(e) = run_turn(&mut session, line, turn.hide_thinking).await {
            let message = e
                .downcast_ref::<lmchat::ChatError>()
                .map(|ce| ce.user_message().to_string())
                .unwrap_or_else(|| "An error occurred while processing your message.".into());
            eprintln!("{}", message);
        }
    }
    Ok(())
}

async fn list_models() -> anyhow::Result<()> {
    let cfg = config::load()?;
    let session = ChatSession::new(cfg)?;
    let models = session.list_models().await?;

    if models.is_empty() {
        println!("No models found.");
        return Ok(());
    }
    println!("{:<40} NAME", "ID");
    for m in &models {
        println!("{:<40} {}", m.id, m.display_name());
    }
    Ok(())
}

async fn decode_transcript(file: Option<std::path::PathBuf>, chunk_size: usize) -> anyhow::Result<()> {
    let bytes = match file {
        Some(path) => tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin().read_to_end(&mut buf).await?;
            buf
        }
    };

    let mut reassembler = StreamReassembler::new();
    let mut chunks = Vec::new();
    for piece in bytes.chunks(chunk_size.max(1)) {
        chunks.extend(reassembler.feed(piece));
    }
    chunks.extend(reassembler.finish());

    for chunk in &chunks {
        println!("{:<15} {:?}", chunk.mode, chunk.text);
    }
    println!();
    println!("frames:   {}", reassembler.frame_count());
    println!("dropped:  {}", reassembler.dropped_frames());
    println!("thinking: {}", reassembler.in_thinking_mode());
    println!("text:     {:?}", reassembler.accumulated_text());
    Ok(())
}

/// Incremental terminal output for one turn.
struct Renderer<W: Write> {
    out: W,
    hide_thinking: bool,
    in_thinking: bool,
    /// First write failure; later writes are skipped.
    error: Option<std::io::Error>,
}

impl<W: Write> Renderer<W> {
    fn new(out: W, hide_thinking: bool) -> Self {
        Self {
            out,
            hide_thinking,
            in_thinking: false,
            error: None,
        }
    }

    fn on_event(&mut self, event: TurnEvent<'_>) {
        match event {
            TurnEvent::Delta { chunk, .. } => match chunk.mode {
                DeltaMode::ThinkingStart => {
                    self.in_thinking = true;
                    if !self.hide_thinking {
                        self.write(&format!("{DIM}[thinking]\n"));
                    }
                }
                DeltaMode::ThinkingEnd => {
                    self.in_thinking = false;
                    if !self.hide_thinking {
                        self.write(&format!("\n[/thinking]{RESET}\n"));
                    }
                }
                DeltaMode::ThinkingChunk if self.hide_thinking => {}
                DeltaMode::ThinkingChunk | DeltaMode::AnswerChunk => self.write(&chunk.text),
                DeltaMode::Empty => {
                    // Unterminated reasoning: restore terminal colors
                    if self.in_thinking && !self.hide_thinking {
                        self.write(RESET);
                    }
                }
            },
            TurnEvent::Fallback { message } => self.print_message(&message.content),
        }
    }

    fn print_message(&mut self, content: &str) {
        let view = split_thinking(content);
        if let (Some(thinking), false) = (&view.thinking, self.hide_thinking) {
            self.write(&format!("{DIM}[thinking]\n{thinking}\n[/thinking]{RESET}\n"));
        }
        self.write(&view.answer);
    }

    fn write(&mut self, text: &str) {
        if self.error.is_some() {
            return;
        }
        let result = self
            .out
            .write_all(text.as_bytes())
            .and_then(|_| self.out.flush());
        if let Err(e) = result {
            self.error = Some(e);
        }
    }

    /// Surface a failed write, e.g. a closed pipe.
    fn check(&mut self) -> std::io::Result<()> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
