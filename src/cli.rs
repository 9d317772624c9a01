use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Terminal chat client for OpenAI-compatible APIs
#[derive(Parser)]
#[command(name = "lmchat", version, about)]
pub struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a single prompt and stream the answer
    Ask {
        prompt: String,
        #[command(flatten)]
        turn: TurnArgs,
    },

    /// Interactive multi-turn chat on stdin (`/exit` or EOF to quit)
    Chat {
        #[command(flatten)]
        turn: TurnArgs,
    },

    /// List the models the server offers
    Models,

    /// Replay a captured SSE transcript through the decoder
    Decode {
        /// Transcript file; stdin when omitted
        file: Option<PathBuf>,
        /// Bytes fed per step, to exercise frame reassembly
        #[arg(long, default_value = "7")]
        chunk_size: usize,
    },
}

#[derive(Args, Clone)]
pub struct TurnArgs {
    /// Model id (defaults to LMCHAT_DEFAULT_MODEL)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Upper bound on generated tokens (clamped to 1..=32768)
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// System message prepended to every request
    #[arg(short, long)]
    pub system: Option<String>,

    /// Ask for a single JSON response instead of a stream
    #[arg(long)]
    pub no_stream: bool,

    /// Do not print the reasoning segment
    #[arg(long)]
    pub hide_thinking: bool,
}
