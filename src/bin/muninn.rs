//! Command-line front end for muninn
//!
//! Loads the configuration, then either checks it or answers one message
//! as if it had arrived in a chat, printing the reply to stdout.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use muninn::telemetry;
use muninn::{
    Assistant, CompletionClient, HandleOutcome, IncomingMessage, MentionHandler, ReplyKeyboard,
    ReplySink, Sender, Settings,
};

/// Muninn chat assistant
#[derive(Parser)]
#[command(name = "muninn")]
#[command(version = muninn::PKG_VERSION)]
#[command(about = "Telegram chat assistant backed by an LLM completions API")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "MUNINN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the configuration and exit
    Check,

    /// Answer a message as if the bot had been mentioned in a group
    Ask {
        /// Message text (or omit to read from stdin)
        text: Option<String>,
        /// Chat id to simulate
        #[arg(long, default_value_t = -4242, allow_negative_numbers = true)]
        chat_id: i64,
        /// Sender user id
        #[arg(long, default_value_t = 1)]
        user_id: i64,
        /// Bypass the response cache
        #[arg(long)]
        no_cache: bool,
    },
}

/// Prints replies to stdout.
struct StdoutSink;

#[async_trait]
impl ReplySink for StdoutSink {
    async fn send_reply(
        &self,
        _chat_id: i64,
        _reply_to: i64,
        text: &str,
        keyboard: Option<&ReplyKeyboard>,
    ) -> muninn::Result<()> {
        println!("{text}");
        if let Some(keyboard) = keyboard {
            println!();
            for row in &keyboard.keyboard {
                let labels: Vec<&str> = row.iter().map(|b| b.text.as_str()).collect();
                println!("  [ {} ]", labels.join(" | "));
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref())?;
    telemetry::init_logging(settings.logging.filter_directive());

    match args.command {
        Command::Check => {
            println!(
                "{} {} ok: model {}, target {}",
                settings.bot.name,
                settings.bot.version,
                settings.openrouter.model,
                settings.bot.target_bot_username
            );
        }
        Command::Ask {
            text,
            chat_id,
            user_id,
            no_cache,
        } => {
            let text = read_input(text)?;
            if no_cache {
                settings.openrouter.enable_caching = false;
            }

            let client = Arc::new(CompletionClient::new(settings.client_config()));
            client.start()?;

            let assistant = Assistant::from_settings(Arc::clone(&client), &settings)?;
            let handler = MentionHandler::new(assistant, &settings, Arc::new(StdoutSink));

            // Mention ourselves so the handler treats this as addressed to us.
            let message = IncomingMessage {
                message_id: 1,
                chat_id,
                from: Some(Sender {
                    id: user_id,
                    username: None,
                }),
                text: Some(format!("{} {text}", settings.bot.username)),
                date: Utc::now(),
                reply_to: None,
            };

            let outcome = handler.handle(&message).await;
            client.close().await;

            match outcome? {
                HandleOutcome::Failed(kind) => {
                    return Err(format!("request failed ({kind:?})").into());
                }
                HandleOutcome::Ignored(reason) => {
                    return Err(format!("message ignored ({reason:?})").into());
                }
                HandleOutcome::Replied { .. } | HandleOutcome::Command => {}
            }
        }
    }

    Ok(())
}

/// Use the argument if given, otherwise read stdin.
fn read_input(arg: Option<String>) -> io::Result<String> {
    if let Some(text) = arg {
        return Ok(text);
    }
    if io::stdin().is_terminal() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no message given and stdin is a terminal",
        ));
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf.trim().to_string())
}
