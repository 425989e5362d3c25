// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! `tally chat` and `tally ask`: terminal client

use chrono::Utc;
use crossterm::{
    queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{self, Read, Write};
use uuid::Uuid;

use crate::chat::ChatRequest;
use crate::cli::args::{AskArgs, ChatArgs};
use crate::client::{ChatClient, ChatReply};
use crate::commands::client_for;
use crate::config::Settings;
use crate::error::{Result, TallyError};
use crate::stream::frame::{is_placeholder_summary, StreamFrame, ToolActivity, ToolTimeline};

/// Writes decoded frames to a terminal as they arrive
pub struct FramePrinter<W: Write> {
    out: W,
    at_line_start: bool,
}

impl<W: Write> FramePrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            at_line_start: true,
        }
    }

    pub fn frame(&mut self, frame: &StreamFrame) -> io::Result<()> {
        match frame {
            StreamFrame::ContentDelta(text) => {
                write!(self.out, "{}", text)?;
                if !text.is_empty() {
                    self.at_line_start = text.ends_with('\n');
                }
            }
            StreamFrame::ToolLifecycle {
                kind,
                state,
                summary,
            } => {
                let activity = ToolActivity {
                    kind: *kind,
                    state: *state,
                    summary: summary.clone().filter(|s| !is_placeholder_summary(s)),
                    started_at: Utc::now(),
                };
                if !self.at_line_start {
                    writeln!(self.out)?;
                }
                queue!(
                    self.out,
                    SetForegroundColor(Color::DarkGrey),
                    Print(format!("  {}\n", activity.describe())),
                    ResetColor
                )?;
                self.at_line_start = true;
            }
            // Recorded by the client; never shown.
            StreamFrame::ContinuationToken(_) => {}
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Step list printed after an answer
pub fn timeline_lines(timeline: &ToolTimeline) -> Vec<String> {
    timeline.records().iter().map(ToolActivity::describe).collect()
}

async fn send_turn(client: &ChatClient, request: &ChatRequest) -> Result<ChatReply> {
    let mut stdout = io::stdout();
    queue!(stdout, SetForegroundColor(Color::Cyan), Print("\ntally: "), ResetColor)?;
    stdout.flush()?;

    let mut printer = FramePrinter::new(io::stdout());
    let reply = client
        .send(request, |frame| {
            if let Err(e) = printer.frame(frame) {
                tracing::debug!(error = %e, "terminal write failed");
            }
        })
        .await?;
    println!();

    let steps = timeline_lines(&reply.timeline);
    if !steps.is_empty() {
        queue!(stdout, SetForegroundColor(Color::DarkGrey))?;
        println!("Steps:");
        for step in steps {
            println!("  - {}", step);
        }
        queue!(stdout, ResetColor)?;
    }
    if let Some(reason) = &reply.interrupted {
        queue!(
            stdout,
            SetForegroundColor(Color::Yellow),
            Print(format!("(answer interrupted: {})\n", reason)),
            ResetColor
        )?;
    }
    stdout.flush()?;
    Ok(reply)
}

fn read_user_input() -> Result<Option<String>> {
    let mut stdout = io::stdout();
    queue!(stdout, SetForegroundColor(Color::Green), Print("you: "), ResetColor)?;
    stdout.flush()?;

    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        return Ok(None);
    }
    Ok(Some(input.trim().to_string()))
}

/// Execute the ask command
pub async fn run_ask(args: AskArgs, settings: Settings) -> Result<()> {
    let prompt = if args.stdin {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        args.prompt.clone().unwrap_or_default()
    };
    if prompt.trim().is_empty() {
        return Err(TallyError::InvalidInput(
            "No prompt given. Pass one as an argument or use --stdin.".into(),
        ));
    }

    let client = client_for(&settings, &args.server);
    let mut request = ChatRequest::new(prompt)
        .with_conversation(args.conversation)
        .with_files(args.file.clone());
    if let Some(mode) = args.mode {
        request = request.with_mode(mode);
    }

    let reply = send_turn(&client, &request).await?;
    eprintln!("conversation: {}", reply.conversation_id);
    reply.ensure_complete()
}

/// Execute the interactive chat command
pub async fn run_chat(args: ChatArgs, settings: Settings) -> Result<()> {
    let client = client_for(&settings, &args.server);
    if !client.health().await.unwrap_or(false) {
        return Err(TallyError::Config(format!(
            "No Tally server at {}. Start one with `tally serve`.",
            client.base_url()
        )));
    }

    println!("Connected to {}. Type /new for a new conversation, /exit to quit.", client.base_url());

    let mut conversation: Option<Uuid> = args.conversation;
    let mut pending = args.prompt.clone();

    loop {
        let input = match pending.take() {
            Some(prompt) => prompt,
            None => match read_user_input()? {
                Some(line) => line,
                None => break,
            },
        };

        match input.as_str() {
            "" => continue,
            "/exit" | "/quit" | "exit" | "quit" => break,
            "/new" => {
                conversation = None;
                println!("Started a new conversation.");
                continue;
            }
            _ => {}
        }

        let mut request = ChatRequest::new(input).with_conversation(conversation);
        if let Some(mode) = args.mode {
            request = request.with_mode(mode);
        }
        match send_turn(&client, &request).await {
            Ok(reply) => conversation = Some(reply.conversation_id),
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(())
}
