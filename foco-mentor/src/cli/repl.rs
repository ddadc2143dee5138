//! Interactive terminal chat.

use std::io::Write;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::error::RecvError;

use crate::chat::{ChatEvent, ChatService, DeleteOutcome};
use crate::models::ChatSession;

use super::commands::{
    format_session_list, format_transcript, is_affirmative, resolve_session, DELETE_CONFIRMATION,
};

const HELP: &str = "\
Comandos:
  /new            nova conversa
  /list           lista as conversas
  /switch <n|id>  muda para outra conversa
  /delete <n|id>  exclui uma conversa
  /help           mostra esta ajuda
  /quit           sai

Termine uma linha com \\ para continuar na próxima.";

/// A parsed line of REPL input.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Empty,
    Message(String),
    New,
    List,
    Switch(String),
    Delete(String),
    Help,
    Quit,
    Unknown(String),
}

/// Parse one (already joined) line of input.
pub fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return Input::Message(line.trim_end().to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim().to_string()),
        None => (command, String::new()),
    };

    match name {
        "new" => Input::New,
        "list" | "ls" => Input::List,
        "switch" | "s" if !arg.is_empty() => Input::Switch(arg),
        "delete" | "rm" if !arg.is_empty() => Input::Delete(arg),
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        _ => Input::Unknown(trimmed.to_string()),
    }
}

/// Append `line` to `buffer`. Returns `false` while the line asks to continue.
pub fn push_line(buffer: &mut String, line: &str) -> bool {
    if let Some(head) = line.strip_suffix('\\') {
        buffer.push_str(head);
        buffer.push('\n');
        false
    } else {
        buffer.push_str(line);
        true
    }
}

struct Repl {
    service: ChatService,
    lines: Lines<BufReader<Stdin>>,
}

impl Repl {
    async fn next_line(&mut self) -> Result<Option<String>> {
        self.lines.next_line().await.context("Failed to read input")
    }

    /// Read a full entry, following trailing-backslash continuations.
    async fn read_entry(&mut self) -> Result<Option<String>> {
        prompt("> ")?;
        let mut buffer = String::new();
        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(None);
            };
            if push_line(&mut buffer, &line) {
                return Ok(Some(buffer));
            }
            prompt(". ")?;
        }
    }

    fn print_current(&self) {
        let snapshot = self.service.snapshot();
        if let Some(session) = snapshot.current_session() {
            print!("{}", format_transcript(session));
        }
    }

    fn find(&self, reference: &str) -> Option<ChatSession> {
        resolve_session(&self.service.snapshot().sessions, reference).cloned()
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        let mut events = self.service.subscribe();
        let Some(pending) = self.service.start_send(text) else {
            return Ok(());
        };

        let task = tokio::spawn({
            let service = self.service.clone();
            let pending = pending.clone();
            async move { service.complete_send(pending).await }
        });

        println!("\nMentor:");
        loop {
            match events.recv().await {
                Ok(ChatEvent::Chunk {
                    message_id, text, ..
                }) if message_id == pending.placeholder_id => {
                    print!("{text}");
                    std::io::stdout().flush()?;
                }
                Ok(ChatEvent::SendFinished { message_id, .. })
                    if message_id == pending.placeholder_id =>
                {
                    println!("\n");
                    break;
                }
                Ok(ChatEvent::SendFailed {
                    message_id, error, ..
                }) if message_id == pending.placeholder_id => {
                    println!();
                    eprintln!("{error}\n");
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }

        task.await.context("Reply task panicked")?;
        Ok(())
    }

    async fn delete(&mut self, reference: &str) -> Result<()> {
        let Some(target) = self.find(reference) else {
            eprintln!("Conversa não encontrada: {reference}");
            return Ok(());
        };

        prompt(&format!("{DELETE_CONFIRMATION} [s/N] "))?;
        let answer = self.next_line().await?.unwrap_or_default();
        let confirmed = is_affirmative(&answer);

        match self
            .service
            .delete_session(&target.id, &|_: &ChatSession| confirmed)
        {
            DeleteOutcome::Deleted {
                created_new: true, ..
            } => {
                println!("Excluída. Nova conversa iniciada.\n");
                self.print_current();
            }
            DeleteOutcome::Deleted { .. } => println!("Excluída.\n"),
            DeleteOutcome::Declined => {}
            DeleteOutcome::NotFound => eprintln!("Conversa não encontrada: {reference}"),
        }
        Ok(())
    }
}

fn prompt(text: &str) -> Result<()> {
    print!("{text}");
    std::io::stdout().flush()?;
    Ok(())
}

/// Run the chat loop on stdin/stdout until `/quit` or end of input.
pub async fn run(service: ChatService) -> Result<()> {
    service.initialize();

    let mut repl = Repl {
        service,
        lines: BufReader::new(tokio::io::stdin()).lines(),
    };
    repl.print_current();
    println!("(/help para ver os comandos)\n");

    while let Some(entry) = repl.read_entry().await? {
        match parse_input(&entry) {
            Input::Empty => {}
            Input::Message(text) => repl.send(&text).await?,
            Input::New => {
                repl.service.new_chat();
                repl.print_current();
            }
            Input::List => {
                let snapshot = repl.service.snapshot();
                print!(
                    "{}",
                    format_session_list(&snapshot.sessions, snapshot.current_session_id.as_deref())
                );
            }
            Input::Switch(reference) => match repl.find(&reference) {
                Some(target) => {
                    repl.service.select_session(&target.id);
                    repl.print_current();
                }
                None => eprintln!("Conversa não encontrada: {reference}"),
            },
            Input::Delete(reference) => repl.delete(&reference).await?,
            Input::Help => println!("{HELP}\n"),
            Input::Quit => break,
            Input::Unknown(command) => eprintln!("Comando desconhecido: {command}"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(
            parse_input("Como ler mais rápido?\n"),
            Input::Message("Como ler mais rápido?".to_string())
        );
        assert_eq!(parse_input("   "), Input::Empty);
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_input("/new"), Input::New);
        assert_eq!(parse_input(" /list "), Input::List);
        assert_eq!(parse_input("/switch 2"), Input::Switch("2".to_string()));
        assert_eq!(parse_input("/delete 0192ab"), Input::Delete("0192ab".to_string()));
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("/switch"), Input::Unknown("/switch".to_string()));
        assert_eq!(parse_input("/dance"), Input::Unknown("/dance".to_string()));
    }

    #[test]
    fn backslash_continues_the_entry() {
        let mut buffer = String::new();
        assert!(!push_line(&mut buffer, "primeira linha\\"));
        assert!(push_line(&mut buffer, "segunda"));
        assert_eq!(buffer, "primeira linha\nsegunda");
        assert_eq!(
            parse_input(&buffer),
            Input::Message("primeira linha\nsegunda".to_string())
        );
    }
}
