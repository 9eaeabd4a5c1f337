use std::io::{self, Write};

use anyhow::{anyhow, Context, Result};
use flume::Receiver;
use serde_json::json;
use socialhome_client::models::ContactKind;
use socialhome_client::{
    AuthContext, ContentId, LiveNotification, PublishRequest, SessionState, StreamParams,
    SyncEvent, Synchronizer,
};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::render;

/// Interactive stream browser.
pub async fn run_cli(
    sync: Synchronizer,
    events: Receiver<SyncEvent>,
    session: SessionState,
) -> Result<()> {
    let mut shell = CliSession {
        sync,
        events,
        session,
        current: None,
    };

    println!("socialhome client ready. Type 'help' for a list of commands.");

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);

    loop {
        let prompt = shell.current.as_deref().unwrap_or("socialhome");
        print!("{prompt}> ");
        io::stdout().flush()?;

        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            println!("Exiting");
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let tokens = match shell_words::split(trimmed) {
            Ok(tokens) if !tokens.is_empty() => tokens,
            Ok(_) => continue,
            Err(err) => {
                println!("Unable to parse command: {err}");
                continue;
            }
        };

        let action = shell.handle_command(&tokens).await;
        render::drain_events(&shell.events);
        match action {
            Ok(LoopAction::Continue) => {}
            Ok(LoopAction::Exit) => break,
            Err(err) => println!("Error: {err:#}"),
        }
    }
    Ok(())
}

struct CliSession {
    sync: Synchronizer,
    events: Receiver<SyncEvent>,
    session: SessionState,
    current: Option<String>,
}

enum LoopAction {
    Continue,
    Exit,
}

fn parse_id(raw: Option<&String>, usage: &str) -> Result<ContentId> {
    let raw = raw.ok_or_else(|| anyhow!("Usage: {usage}"))?;
    raw.parse()
        .with_context(|| format!("'{raw}' is not a content id"))
}

impl CliSession {
    async fn handle_command(&mut self, tokens: &[String]) -> Result<LoopAction> {
        let command = tokens[0].as_str();
        match command {
            "help" => self.print_help(),
            "streams" => self.list_streams(),
            "open" | "stream" => {
                let name = tokens
                    .get(1)
                    .ok_or_else(|| anyhow!("Usage: open <stream> [key=value ...]"))?;
                let params = tokens[2..]
                    .iter()
                    .map(|pair| {
                        pair.split_once('=')
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .ok_or_else(|| anyhow!("expected key=value, got '{pair}'"))
                    })
                    .collect::<Result<StreamParams>>()?;
                self.open(name, params).await?;
            }
            "show" => self.show()?,
            "more" | "older" => {
                let name = self.current_stream()?;
                let outcome = self.sync.load_older(&name).await?;
                println!("Loaded {} older item(s)", outcome.new_ids.len());
                render::print_stream(&self.sync, &name);
            }
            "new" => {
                let name = self.current_stream()?;
                let outcome = self.sync.catch_up_to_newest(&name).await?;
                println!("Loaded {} new item(s)", outcome.new_ids.len());
                render::print_stream(&self.sync, &name);
            }
            "check" => {
                let name = self.current_stream()?;
                match self.sync.get_unfetched_count(&name).await? {
                    Some(count) => println!("{count} new item(s) available"),
                    None => render::print_stream(&self.sync, &name),
                }
            }
            "notify" => {
                let name = self.current_stream()?;
                let id = parse_id(tokens.get(1), "notify <id> [parent_id]")?;
                let event = match tokens.get(2) {
                    Some(parent) => LiveNotification::reply(id, parse_id(Some(parent), "notify <id> [parent_id]")?),
                    None => LiveNotification::top_level(id),
                };
                let outcome = self.sync.record_live_notification(&name, event).await?;
                println!("{outcome:?}");
            }
            "content" | "view" => {
                let id = parse_id(tokens.get(1), "content <id>")?;
                let content = self.sync.get_content(id, None, false).await?;
                render::print_thread(&self.sync, content.id);
            }
            "replies" => {
                let id = parse_id(tokens.get(1), "replies <id> [all]")?;
                let full = tokens.get(2).is_some_and(|flag| flag == "all");
                let linked = self.sync.fetch_replies(id, full).await?;
                println!("{} new reply(ies)", linked.len());
                render::print_thread(&self.sync, id);
            }
            "toggle" => {
                let id = parse_id(tokens.get(1), "toggle <id>")?;
                let shown = self.sync.toggle_replies(id).await?;
                println!("Replies {}", if shown { "shown" } else { "hidden" });
            }
            "share" | "unshare" => {
                let name = self.current_stream()?;
                let id = parse_id(tokens.get(1), "share <id>")?;
                self.sync
                    .apply_share_toggle(&name, id, command == "share")
                    .await?;
                if let Some(content) = self.sync.content(id) {
                    render::print_content(&content, 0);
                }
            }
            "delete" => {
                let id = parse_id(tokens.get(1), "delete <id>")?;
                let removed = self.sync.delete_content(id).await?;
                println!("Removed {removed} item(s)");
            }
            "post" => {
                if tokens.len() < 2 {
                    println!("Usage: post \"message\"");
                    return Ok(LoopAction::Continue);
                }
                let mut request = PublishRequest::create(json!({
                    "text": tokens[1..].join(" "),
                    "visibility": "public",
                }));
                if let Some(name) = &self.current {
                    request = request.into_stream(name);
                }
                let content = self.sync.publish_content(request).await?;
                println!("Published #{}", content.id);
            }
            "reply" => {
                let parent = parse_id(tokens.get(1), "reply <id> \"message\"")?;
                if tokens.len() < 3 {
                    println!("Usage: reply <id> \"message\"");
                    return Ok(LoopAction::Continue);
                }
                let body = json!({ "text": tokens[2..].join(" ") });
                let content = self
                    .sync
                    .publish_content(PublishRequest::reply(parent, body))
                    .await?;
                println!("Replied with #{}", content.id);
            }
            "edit" => {
                let id = parse_id(tokens.get(1), "edit <id> \"message\"")?;
                if tokens.len() < 3 {
                    println!("Usage: edit <id> \"message\"");
                    return Ok(LoopAction::Continue);
                }
                let body = json!({ "text": tokens[2..].join(" ") });
                self.sync
                    .publish_content(PublishRequest::edit(id, body))
                    .await?;
                render::print_thread(&self.sync, id);
            }
            "profile" => {
                let uuid = tokens
                    .get(1)
                    .ok_or_else(|| anyhow!("Usage: profile <uuid>"))?;
                let profile = self.sync.fetch_profile(uuid).await?;
                render::print_profile(&profile);
            }
            "user" => {
                let username = tokens
                    .get(1)
                    .ok_or_else(|| anyhow!("Usage: user <username>"))?;
                let uuid = self.sync.fetch_user_profile(username).await?;
                if let Some(profile) = self.sync.profile(&uuid) {
                    render::print_profile(&profile);
                }
            }
            "refresh-profile" => {
                let uuid = tokens
                    .get(1)
                    .ok_or_else(|| anyhow!("Usage: refresh-profile <uuid>"))?;
                if self.sync.request_profile_update(uuid).await? {
                    println!("Update scheduled");
                } else {
                    println!("An update is already pending");
                }
            }
            "followers" | "following" => {
                let uuid = tokens
                    .get(1)
                    .ok_or_else(|| anyhow!("Usage: {command} <uuid>"))?;
                let kind = if command == "followers" {
                    ContactKind::Followers
                } else {
                    ContactKind::Following
                };
                self.sync.fetch_contacts(kind, uuid).await?;
                render::print_contacts(&self.sync, uuid, kind);
            }
            "follow" | "unfollow" => {
                let uuid = tokens
                    .get(1)
                    .ok_or_else(|| anyhow!("Usage: {command} <uuid>"))?;
                self.sync.follow_change(uuid, command == "follow").await?;
                println!("Done");
            }
            "reset" => {
                self.sync.reset_content(self.current.as_deref()).await?;
                if let Some(name) = &self.current {
                    render::print_stream(&self.sync, name);
                }
            }
            "whoami" => match self.session.current_user() {
                Some(user) => println!("Signed in as {}", user.display_name()),
                None if self.session.was_expired() => println!("Session expired"),
                None => println!("Anonymous"),
            },
            "quit" | "exit" => return Ok(LoopAction::Exit),
            "clear" => print!("\x1B[2J\x1B[1;1H"),
            other => {
                println!("Unknown command '{other}'. Type 'help' for a list of commands.");
            }
        }
        Ok(LoopAction::Continue)
    }

    fn current_stream(&self) -> Result<String> {
        self.current
            .clone()
            .ok_or_else(|| anyhow!("No stream open, use 'open <stream>' first"))
    }

    async fn open(&mut self, name: &str, params: StreamParams) -> Result<()> {
        self.sync
            .enter_stream(name, params)
            .await
            .with_context(|| format!("failed to open '{name}'"))?;
        self.current = Some(name.to_string());
        render::print_stream(&self.sync, name);
        Ok(())
    }

    fn show(&self) -> Result<()> {
        let name = self.current_stream()?;
        render::print_stream(&self.sync, &name);
        Ok(())
    }

    fn list_streams(&self) {
        let mut names: Vec<_> = socialhome_client::default_definitions()
            .into_iter()
            .map(|definition| definition.name)
            .collect();
        names.sort();
        for name in names {
            let marker = if self.current.as_deref() == Some(name.as_str()) {
                "*"
            } else {
                " "
            };
            let state = if !self.sync.is_stream_active(&name) {
                "inactive"
            } else if self.sync.is_available(&name) {
                "available"
            } else {
                "login required"
            };
            println!(" {marker} {name:<18} {state}");
        }
    }

    fn print_help(&self) {
        println!("Available commands:");
        println!("  streams                  List streams and their availability");
        println!("  open <name> [k=v ...]    Enter a stream, e.g. open tag tag_name=rust");
        println!("  show                     Print the open stream");
        println!("  more                     Load older items");
        println!("  check                    Ask the server for new items");
        println!("  new                      Load new items");
        println!("  notify <id> [parent]     Feed a live notification to the open stream");
        println!("  content <id>             Show a content and its loaded replies");
        println!("  replies <id> [all]       Fetch the thread (or whole conversation)");
        println!("  toggle <id>              Expand or collapse replies");
        println!("  share|unshare <id>       Share or unshare a content");
        println!("  delete <id>              Delete a content");
        println!("  post MSG                 Publish a new post");
        println!("  reply <id> MSG           Reply to a content");
        println!("  edit <id> MSG            Replace a content's text");
        println!("  profile <uuid>           Show a profile");
        println!("  user <username>          Look up a local user");
        println!("  refresh-profile <uuid>   Ask the server to refresh a remote profile");
        println!("  followers|following <uuid>  Page through contacts");
        println!("  follow|unfollow <uuid>   Change follow status");
        println!("  reset                    Clear all streams and reload the open one");
        println!("  whoami                   Show the session state");
        println!("  clear                    Clear the screen");
        println!("  exit                     Quit");
    }
}
