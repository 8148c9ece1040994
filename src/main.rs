//! Terminal frontend: line-oriented REPL over the master loop.
//!
//! Rendering is plain stdout; a richer viewport/markdown frontend plugs in
//! behind the same `Host` trait.

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use codeloop::{
    Config, Host, MasterLoop, PolicyStore, PromptResponse, RiskLevel, provider,
};
use std::io::Write;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

#[derive(Parser)]
#[command(name = "codeloop")]
#[command(version, about = "Terminal coding assistant for local LLMs", long_about = None)]
struct Cli {
    /// Model identifier (overrides the config file)
    #[arg(long)]
    model: Option<String>,

    /// Ollama base URL (overrides the config file)
    #[arg(long)]
    ollama_host: Option<String>,
}

/// Plain stdin/stdout host.
struct TerminalHost {
    lines: Lines<BufReader<Stdin>>,
}

impl TerminalHost {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    async fn read_line(&mut self, prompt: &str) -> Option<String> {
        print!("{}", prompt);
        let _ = std::io::stdout().flush();
        self.lines.next_line().await.ok().flatten()
    }
}

#[async_trait]
impl Host for TerminalHost {
    fn render_text(&mut self, delta: &str) {
        print!("{}", delta);
        let _ = std::io::stdout().flush();
    }

    fn notify(&mut self, line: &str) {
        println!("\n[{}]", line);
    }

    async fn permission_prompt(
        &mut self,
        tool_name: &str,
        arguments: &serde_json::Value,
        risk: RiskLevel,
    ) -> PromptResponse {
        println!("\ntool '{}' wants to run with:", tool_name);
        println!("  {}", arguments);
        if risk == RiskLevel::High {
            println!("  ⚠ this tool modifies files");
        }

        loop {
            let answer = self
                .read_line("  [y] once  [s] session  [r] remember  [n] deny > ")
                .await
                .unwrap_or_else(|| "n".to_string());
            match answer.trim() {
                "y" => return PromptResponse::AllowOnce,
                "s" => return PromptResponse::AllowSession,
                "r" => return PromptResponse::Remember,
                "n" | "" => return PromptResponse::Deny,
                _ => println!("  unrecognized; y/s/r/n"),
            }
        }
    }
}

/// `DEBUG_CONTEXT=1` and `DEBUG_EMBEDDINGS=1` widen the log filter for
/// their subsystems. Diagnostics only; behavior is unaffected.
fn init_logging() {
    let mut filter = String::from("warn");
    if std::env::var("DEBUG_CONTEXT").as_deref() == Ok("1") {
        filter.push_str(",context=debug");
    }
    if std::env::var("DEBUG_EMBEDDINGS").as_deref() == Ok("1") {
        filter.push_str(",embeddings=debug");
    }
    env_logger::Builder::new()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or(filter))
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load().context("loading config")?;
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(host) = &cli.ollama_host {
        config.ollama_host = host.clone();
    }
    config.validate().context("validating config")?;
    Ok(config)
}

async fn repl(mut agent: MasterLoop) -> anyhow::Result<()> {
    let cancel = agent.cancel_token();
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            cancel.cancel();
        }
    });

    agent.push_display_note("session started");

    let mut host = TerminalHost::new();
    loop {
        let Some(line) = host.read_line("\n› ").await else {
            return Ok(()); // EOF
        };
        let line = line.trim().to_string();
        if line == "exit" || line == "quit" {
            return Ok(());
        }

        agent.run_turn(&line, &mut host).await?;
        println!();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    // Initialization failures exit 1.
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("codeloop: {:#}", e);
            return ExitCode::from(1);
        }
    };
    let backend = match provider::build_provider(&config) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("codeloop: {}", e);
            return ExitCode::from(1);
        }
    };
    let workdir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("codeloop: cannot determine working directory: {}", e);
            return ExitCode::from(1);
        }
    };

    let policies = PolicyStore::load(&Config::policies_path());
    let agent = MasterLoop::new(config, backend, workdir, policies);

    // Unrecoverable runtime errors exit 2.
    match repl(agent).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("codeloop: {:#}", e);
            ExitCode::from(2)
        }
    }
}
