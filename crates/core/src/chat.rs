use crate::error::RagError;
use crate::models::Answer;
use crate::orchestrator::RagCoordinator;
use crate::traits::{Embedder, Generator, VectorIndex};
use async_trait::async_trait;
use std::io::{self, BufRead};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::mpsc;
use tracing::warn;

const EXIT_COMMANDS: [&str; 2] = ["exit", "quit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    WaitingForInput,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Exit,
    Blank,
    Question(String),
}

impl ChatInput {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            ChatInput::Blank
        } else if EXIT_COMMANDS
            .iter()
            .any(|command| trimmed.eq_ignore_ascii_case(command))
        {
            ChatInput::Exit
        } else {
            ChatInput::Question(trimmed.to_string())
        }
    }
}

#[async_trait]
pub trait AnswerSource {
    async fn answer(&self, question: &str) -> Result<Answer, RagError>;
}

#[async_trait]
impl<E, I, G> AnswerSource for RagCoordinator<E, I, G>
where
    E: Embedder + Send + Sync,
    I: VectorIndex + Send + Sync,
    G: Generator + Send + Sync,
{
    async fn answer(&self, question: &str) -> Result<Answer, RagError> {
        self.ask(question).await
    }
}

/// Lines read on a dedicated OS thread and handed to async code through a channel.
///
/// A read that is still blocked when the reader is dropped stays on that thread, so shutting the
/// runtime down (Ctrl-C during a prompt) never waits for the user to press Enter.
pub struct ThreadedLineReader {
    lines: mpsc::UnboundedReceiver<io::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    position: usize,
}

impl ThreadedLineReader {
    pub fn spawn<R>(mut input: R) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (sender, lines) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("chat-input".to_string())
            .spawn(move || loop {
                let mut line = Vec::new();
                match input.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if sender.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        let _ = sender.send(Err(error));
                        break;
                    }
                }
            })?;

        Ok(Self {
            lines,
            buffer: Vec::new(),
            position: 0,
        })
    }

    pub fn stdin() -> io::Result<Self> {
        Self::spawn(io::BufReader::new(io::stdin()))
    }
}

impl AsyncBufRead for ThreadedLineReader {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.get_mut();
        if this.position >= this.buffer.len() {
            match ready!(this.lines.poll_recv(cx)) {
                Some(Ok(line)) => {
                    this.buffer = line;
                    this.position = 0;
                }
                Some(Err(error)) => return Poll::Ready(Err(error)),
                None => return Poll::Ready(Ok(&[])),
            }
        }
        Poll::Ready(Ok(&this.buffer[this.position..]))
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        let this = self.get_mut();
        this.position = (this.position + amt).min(this.buffer.len());
    }
}

impl AsyncRead for ThreadedLineReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let available = ready!(self.as_mut().poll_fill_buf(cx))?;
        let copied = available.len().min(buf.remaining());
        buf.put_slice(&available[..copied]);
        self.consume(copied);
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatSummary {
    pub answered: usize,
    pub failed: usize,
}

/// Line-oriented chat over any async reader/writer pair.
///
/// Failed turns are reported and the loop keeps going. Errors that would fail every later
/// turn as well (missing or rejected API key, unusable index) end the session and are returned
/// to the caller unprinted.
pub struct ChatSession<R, W> {
    input: R,
    output: W,
    bot_name: String,
    show_sources: bool,
    state: ChatState,
}

impl<R, W> ChatSession<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            bot_name: "Bot".to_string(),
            show_sources: false,
            state: ChatState::WaitingForInput,
        }
    }

    pub fn with_bot_name(mut self, name: impl Into<String>) -> Self {
        self.bot_name = name.into();
        self
    }

    pub fn with_sources(mut self, show_sources: bool) -> Self {
        self.show_sources = show_sources;
        self
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    pub fn into_output(self) -> W {
        self.output
    }

    pub async fn run<A>(&mut self, answers: &A) -> Result<ChatSummary, RagError>
    where
        A: AnswerSource + Sync,
    {
        let mut summary = ChatSummary::default();
        self.write(&format!(
            "{} ready. Ask anything (type 'exit' to quit)\n\n",
            self.bot_name
        ))
        .await?;

        while self.state == ChatState::WaitingForInput {
            self.write("You: ").await?;

            let mut line = String::new();
            if self.input.read_line(&mut line).await? == 0 {
                self.state = ChatState::Terminated;
                self.write("\n").await?;
                break;
            }

            let question = match ChatInput::parse(&line) {
                ChatInput::Exit => {
                    self.state = ChatState::Terminated;
                    break;
                }
                ChatInput::Blank => continue,
                ChatInput::Question(question) => question,
            };

            match answers.answer(&question).await {
                Ok(answer) => {
                    summary.answered += 1;
                    self.write_answer(&answer).await?;
                }
                Err(error) if error.is_fatal() => {
                    self.state = ChatState::Terminated;
                    self.write("\n").await?;
                    return Err(error);
                }
                Err(error) => {
                    summary.failed += 1;
                    warn!(error = %error, "chat turn failed");
                    self.write(&format!("\nerror: {error}\n\n")).await?;
                }
            }
        }

        self.write("Bye!\n").await?;
        Ok(summary)
    }

    async fn write_answer(&mut self, answer: &Answer) -> Result<(), RagError> {
        let mut rendered = format!("\n{}: {}\n", self.bot_name, answer.text);
        if self.show_sources {
            for hit in &answer.sources {
                rendered.push_str(&format!(
                    "  [{}] pages {}-{} distance={:.4}\n",
                    hit.rank, hit.chunk.page_start, hit.chunk.page_end, hit.distance
                ));
            }
        }
        rendered.push('\n');
        self.write(&rendered).await
    }

    async fn write(&mut self, text: &str) -> Result<(), RagError> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }
}
