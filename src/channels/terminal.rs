use super::traits::Channel;
use crate::auto_reply::InboundMessage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Notify};

/// Session key for the single local user.
pub const TERMINAL_USER: &str = "terminal";

const SEPARATOR_WIDTH: usize = 40;

type Input = Box<dyn AsyncBufRead + Send + Unpin>;
type Output = Box<dyn Write + Send>;

/// Interactive chat on stdin/stdout.
///
/// Input is read one line at a time; the next prompt is shown only after the
/// previous line has been answered.
pub struct TerminalChannel {
    input: tokio::sync::Mutex<Option<Input>>,
    output: Mutex<Output>,
    turn_done: Notify,
}

impl TerminalChannel {
    pub fn new() -> Self {
        Self::with_io(
            Box::new(BufReader::new(tokio::io::stdin())),
            Box::new(std::io::stdout()),
        )
    }

    pub fn with_io(input: Input, output: Output) -> Self {
        Self {
            input: tokio::sync::Mutex::new(Some(input)),
            output: Mutex::new(output),
            turn_done: Notify::new(),
        }
    }

    fn write(&self, text: &str, newline: bool) -> anyhow::Result<()> {
        let mut out = self.output.lock();
        if newline {
            writeln!(out, "{text}")?;
        } else {
            write!(out, "{text}")?;
        }
        out.flush()?;
        Ok(())
    }

    /// Print the banner shown when a chat starts.
    pub fn print_banner(&self, bot_name: &str) -> anyhow::Result<()> {
        self.write(&format!("🤖 Terminal Chat with {bot_name}"), true)?;
        self.write(&"=".repeat(SEPARATOR_WIDTH), true)?;
        self.write("💡 Type /help for commands, /quit to exit", true)?;
        self.write(&"-".repeat(SEPARATOR_WIDTH), true)
    }
}

fn is_exit_command(line: &str) -> bool {
    matches!(
        line.to_ascii_lowercase().as_str(),
        "/quit" | "/exit" | "quit" | "exit"
    )
}

#[async_trait]
impl Channel for TerminalChannel {
    fn name(&self) -> &str {
        "terminal"
    }

    async fn send(&self, message: &str, _recipient: &str) -> anyhow::Result<()> {
        self.write(&format!("Bot: {message}"), true)?;
        self.write(&"-".repeat(SEPARATOR_WIDTH), true)
    }

    async fn send_typing(&self, _recipient: &str) -> anyhow::Result<()> {
        self.write("🤖 Thinking...", true)
    }

    async fn flush(&self, _recipient: &str) -> anyhow::Result<()> {
        self.turn_done.notify_one();
        Ok(())
    }

    async fn listen(&self, tx: mpsc::Sender<InboundMessage>) -> anyhow::Result<()> {
        let Some(input) = self.input.lock().await.take() else {
            anyhow::bail!("Terminal input is already being read");
        };
        let mut lines = input.lines();

        loop {
            self.write("You: ", false)?;
            let Some(line) = lines.next_line().await? else {
                self.write("", true)?;
                break;
            };

            let line = line.trim();
            if is_exit_command(line) {
                self.write("👋 Goodbye!", true)?;
                break;
            }
            if line.is_empty() {
                continue;
            }

            if tx
                .send(InboundMessage::text("terminal", TERMINAL_USER, line))
                .await
                .is_err()
            {
                break;
            }
            self.turn_done.notified().await;
        }

        Ok(())
    }
}
