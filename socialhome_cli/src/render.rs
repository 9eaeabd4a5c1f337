use flume::Receiver;
use socialhome_client::models::ContactKind;
use socialhome_client::{Content, ContentId, Profile, Severity, SyncEvent, Synchronizer};

const PREVIEW_CHARS: usize = 120;

/// Prints pending notifications without blocking.
pub fn drain_events(events: &Receiver<SyncEvent>) {
    for event in events.try_iter() {
        match event {
            SyncEvent::Toast(toast) => {
                let label = match toast.severity {
                    Severity::Info => "info",
                    Severity::Success => "ok",
                    Severity::Warn => "warn",
                    Severity::Error => "error",
                };
                println!("[{label}] {}: {}", toast.summary, toast.detail);
            }
            SyncEvent::Loading(true) => println!("Loading..."),
            SyncEvent::Loading(false) => {}
            SyncEvent::SignedOut => println!("Session expired, you have been signed out."),
        }
    }
}

pub fn print_stream(sync: &Synchronizer, name: &str) {
    let Some(stream) = sync.stream(name) else {
        println!("Unknown stream '{name}'");
        return;
    };
    let title = stream.title.as_deref().unwrap_or(name);
    println!("== {title} ({:?}, {} items) ==", stream.status(), stream.index().len());
    let contents = sync.stream_contents(name);
    if contents.is_empty() {
        println!("  (empty)");
    }
    for content in &contents {
        print_content(content, 1);
    }
    let pending = stream.pending_count();
    if pending > 0 {
        println!("  {pending} new item(s) available, run 'new' to load them");
    }
    if stream.no_more_data {
        println!("  -- end of stream --");
    }
}

pub fn print_thread(sync: &Synchronizer, id: ContentId) {
    let Some(content) = sync.content(id) else {
        println!("Content {id} is not loaded");
        return;
    };
    let mut pending = vec![(content, 0usize)];
    while let Some((content, depth)) = pending.pop() {
        print_content(&content, depth);
        for reply_id in content.reply_ids.iter().rev() {
            if let Some(reply) = sync.content(*reply_id) {
                pending.push((reply, depth + 1));
            }
        }
    }
}

pub fn print_content(content: &Content, depth: usize) {
    let indent = "  ".repeat(depth);
    let mut header = format!("#{} {}", content.id, content.author.display_name());
    if let (true, Some(sharer)) = (content.is_share(), &content.through_author) {
        header.push_str(&format!(" (shared by {})", sharer.display_name()));
    }
    println!("{indent}{header}");
    println!("{indent}  {}", preview(content.text().unwrap_or("")));
    let mut counts = format!("replies {} | shares {}", content.reply_count, content.shares_count);
    if content.user_has_shared {
        counts.push_str(" | shared by you");
    }
    println!("{indent}  {counts}");
}

pub fn print_profile(profile: &Profile) {
    println!("{} <{}>", profile.display_name(), profile.uuid);
    if let Some(handle) = profile.handle.as_deref().or(profile.finger.as_deref()) {
        println!("  handle: {handle}");
    }
    println!(
        "  {}{}",
        if profile.is_local { "local" } else { "remote" },
        if profile.user_following { ", following" } else { "" }
    );
}

pub fn print_contacts(sync: &Synchronizer, uuid: &str, kind: ContactKind) {
    let Some(contacts) = sync
        .profile(uuid)
        .and_then(|profile| profile.contacts(kind).cloned())
    else {
        println!("No {} loaded", kind.as_str());
        return;
    };
    let total = contacts
        .count
        .map_or_else(|| "?".to_string(), |count| count.to_string());
    println!("{} ({} of {total}):", kind.as_str(), contacts.list.len());
    for contact in &contacts.list {
        match sync.profile(contact) {
            Some(profile) => println!("  {} <{}>", profile.display_name(), profile.uuid),
            None => println!("  {contact}"),
        }
    }
    if contacts.next.is_some() {
        println!("  more available");
    }
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}...")
}
