//! CLI command execution.

use std::io::Write;

use anyhow::{bail, Context, Result};
use chrono::Local;

use crate::chat::{DeleteOutcome, SendOutcome, SEND_ERROR_MESSAGE};
use crate::config::Settings;
use crate::logging::init_tracing;
use crate::models::{ChatSession, Role};
use crate::server;

use super::args::{Cli, Commands};
use super::repl;

/// Prompt shown before deleting a session.
pub const DELETE_CONFIRMATION: &str = "Tem certeza que deseja excluir esta conversa?";

/// Find a session by 1-based list position, exact id or unique id prefix.
pub fn resolve_session<'a>(sessions: &'a [ChatSession], reference: &str) -> Option<&'a ChatSession> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }

    if let Ok(n) = reference.parse::<usize>() {
        if (1..=sessions.len()).contains(&n) {
            return sessions.get(n - 1);
        }
    }

    if let Some(exact) = sessions.iter().find(|s| s.id == reference) {
        return Some(exact);
    }

    let mut matches = sessions.iter().filter(|s| s.id.starts_with(reference));
    match (matches.next(), matches.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

/// Label shown in front of a message.
pub const fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "Você",
        Role::Model => "Mentor",
    }
}

/// One line per session, newest first, marking the current one.
pub fn format_session_list(sessions: &[ChatSession], current: Option<&str>) -> String {
    if sessions.is_empty() {
        return "\"O conhecimento começa com uma pergunta.\"\n".to_string();
    }

    let mut out = String::new();
    for (i, session) in sessions.iter().enumerate() {
        let marker = if Some(session.id.as_str()) == current {
            "*"
        } else {
            " "
        };
        let created = session.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
        let short_id = &session.id[..8.min(session.id.len())];
        out.push_str(&format!(
            "{marker} {:>2}. {}  ({} msgs, {created}, {short_id})\n",
            i + 1,
            session.title,
            session.messages.len(),
        ));
    }
    out
}

/// Full transcript of a session.
pub fn format_transcript(session: &ChatSession) -> String {
    let mut out = format!("# {}\n\n", session.title);
    for msg in &session.messages {
        out.push_str(&format!("{}:\n{}\n\n", role_label(msg.role), msg.text));
    }
    out
}

/// Ask a yes/no question on stdin. Anything but s/sim/y/yes means no.
fn confirm_on_stdin(question: &str) -> Result<bool> {
    print!("{question} [s/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(is_affirmative(&answer))
}

/// Whether an answer to a confirmation prompt means yes.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(
        answer.trim().to_lowercase().as_str(),
        "s" | "sim" | "y" | "yes"
    )
}

// === Command Execution ===

pub async fn execute(cli: Cli) -> Result<()> {
    let command = cli.command.clone().unwrap_or(Commands::Chat);

    let default_level = match command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    init_tracing(default_level);

    let settings = Settings::from_cli(&cli)?;
    if let Some(dir) = &settings.data_dir {
        tracing::debug!(dir = %dir.display(), "Using data directory");
    }

    match command {
        Commands::Chat => repl::run(settings.chat_service()).await,

        Commands::Ask { text } => {
            let service = settings.chat_service();
            service.initialize();
            match service.send_message(&text).await {
                SendOutcome::Completed { reply } => {
                    println!("{reply}");
                    Ok(())
                }
                SendOutcome::Ignored => bail!("Nothing to send"),
                SendOutcome::Failed { .. } => {
                    let error = service.snapshot().error;
                    bail!("{}", error.as_deref().unwrap_or(SEND_ERROR_MESSAGE))
                }
            }
        }

        Commands::New => {
            let service = settings.chat_service();
            service.initialize();
            let id = service.new_chat();
            println!("Started new chat {id}");
            Ok(())
        }

        Commands::List => {
            let loaded = settings.session_store().load();
            print!(
                "{}",
                format_session_list(&loaded.sessions, loaded.current_session_id.as_deref())
            );
            Ok(())
        }

        Commands::Show { session } => {
            let loaded = settings.session_store().load();
            let found = match session.as_deref() {
                Some(reference) => resolve_session(&loaded.sessions, reference),
                None => loaded
                    .current_session_id
                    .as_deref()
                    .and_then(|id| loaded.sessions.iter().find(|s| s.id == id)),
            };
            let Some(found) = found else {
                bail!("No matching session");
            };
            print!("{}", format_transcript(found));
            Ok(())
        }

        Commands::Delete { session, yes } => {
            let service = settings.chat_service();
            service.initialize();
            let snapshot = service.snapshot();
            let Some(target) = resolve_session(&snapshot.sessions, &session) else {
                bail!("No matching session: {session}");
            };

            let confirmed = yes || confirm_on_stdin(DELETE_CONFIRMATION)?;
            match service.delete_session(&target.id, &|_: &ChatSession| confirmed) {
                DeleteOutcome::Deleted { created_new, .. } => {
                    println!("Deleted \"{}\"", target.title);
                    if created_new {
                        println!("Started a new chat");
                    }
                }
                DeleteOutcome::Declined => println!("Kept \"{}\"", target.title),
                DeleteOutcome::NotFound => bail!("Session disappeared: {session}"),
            }
            Ok(())
        }

        Commands::Serve { port, open } => {
            let service = settings.chat_service();
            service.initialize();
            server::start_server(service, port, open).await
        }
    }
}
