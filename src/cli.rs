//! Command-line interface

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::mail::DEFAULT_SEARCH_LIMIT;
use crate::models::{FlagChange, Message};
use crate::toggl::TimeEntry;

#[derive(Parser, Debug)]
#[command(name = "workbridge")]
#[command(version)]
#[command(about = "Mail, chat, time tracking and AI integrations from one CLI", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with the mail provider
    Auth {
        /// Run consent even if a usable credential is stored
        #[arg(long)]
        force: bool,
    },

    /// Delete the stored mail credential
    SignOut,

    /// Show the authenticated mail account
    Profile,

    /// Search mail with the provider's query syntax
    Search {
        query: String,

        /// Maximum number of messages
        #[arg(short = 'n', long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        max: usize,

        /// Include spam and trash
        #[arg(long)]
        include_trashed: bool,
    },

    /// List important messages
    Important {
        #[arg(short = 'n', long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        max: usize,

        #[arg(long)]
        include_trashed: bool,
    },

    /// List starred messages
    Starred {
        #[arg(short = 'n', long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        max: usize,

        #[arg(long)]
        include_trashed: bool,
    },

    /// List unread messages, optionally narrowed by an extra query
    Unread {
        query: Option<String>,

        #[arg(short = 'n', long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        max: usize,
    },

    /// Print one message in full
    Show { id: String },

    /// Send a message
    Send {
        #[arg(long, required = true)]
        to: Vec<String>,

        #[arg(long)]
        subject: String,

        #[arg(long)]
        body: String,

        #[arg(long)]
        cc: Vec<String>,

        #[arg(long)]
        bcc: Vec<String>,

        /// File to attach (repeatable)
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },

    /// Change read/starred state of a message
    Flag {
        id: String,

        #[arg(long, conflicts_with = "unread")]
        read: bool,

        #[arg(long)]
        unread: bool,

        #[arg(long, conflicts_with = "unstar")]
        star: bool,

        #[arg(long)]
        unstar: bool,
    },

    /// List mail labels
    Labels,

    /// Slack workspace commands
    Slack {
        #[command(subcommand)]
        command: SlackCommand,
    },

    /// Toggl Track commands
    Toggl {
        #[command(subcommand)]
        command: TogglCommand,
    },

    /// Send a prompt to a text generation provider
    Ask {
        #[arg(long, value_enum, default_value_t = Provider::Anthropic)]
        provider: Provider,

        prompt: String,

        #[arg(long)]
        system: Option<String>,

        #[arg(long, default_value_t = 1024)]
        max_tokens: u32,

        #[arg(long, default_value_t = 0.7)]
        temperature: f32,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum SlackCommand {
    /// List channels visible to the bot
    Channels,

    /// Show recent messages of a channel
    History {
        channel: String,

        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },

    /// Post a message
    Post { channel: String, text: String },

    /// Set the bot's status
    Status {
        text: String,

        #[arg(long)]
        emoji: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TogglCommand {
    /// Show the running time entry
    Current,

    /// List recent time entries
    Entries {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },

    /// Start a time entry
    Start {
        description: String,

        #[arg(long)]
        project: Option<u64>,

        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Stop a running time entry
    Stop { id: u64 },

    /// List workspace projects
    Projects,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    Gemini,
}

/// Translate the `flag` switches into a change; `None` for unset pairs
pub fn flag_change(read: bool, unread: bool, star: bool, unstar: bool) -> FlagChange {
    FlagChange {
        read: match (read, unread) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        },
        starred: match (star, unstar) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        },
    }
}

/// Truncate a string to max_len characters, adding "..." if truncated
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

/// One line per message: flags, date, sender, subject
pub fn message_line(message: &Message) -> String {
    let flags = format!(
        "{}{}{}",
        if message.unread { 'U' } else { ' ' },
        if message.starred { '*' } else { ' ' },
        if message.important { '!' } else { ' ' },
    );
    format!(
        "{} {} {:<30} {}  [{}]",
        flags,
        message.timestamp.format("%Y-%m-%d %H:%M"),
        truncate_string(&message.sender, 30),
        truncate_string(&message.subject, 60),
        message.id
    )
}

pub fn print_messages(messages: &[Message]) {
    if messages.is_empty() {
        println!("No messages found.");
        return;
    }
    for message in messages {
        println!("{}", message_line(message));
    }
    println!("\n{} message(s)", messages.len());
}

pub fn print_message(message: &Message) {
    println!("========================================");
    println!("From:    {}", message.sender);
    if !message.to.is_empty() {
        println!("To:      {}", message.to.join(", "));
    }
    if !message.cc.is_empty() {
        println!("Cc:      {}", message.cc.join(", "));
    }
    println!("Date:    {}", message.timestamp.to_rfc2822());
    println!("Subject: {}", message.subject);
    println!("Labels:  {}", message.labels.join(", "));
    println!("========================================");
    println!("{}", message.body);
}

pub fn time_entry_line(entry: &TimeEntry) -> String {
    let duration = if entry.is_running() {
        "running".to_string()
    } else {
        format!("{}h{:02}m", entry.duration / 3600, (entry.duration % 3600) / 60)
    };
    format!(
        "{:>12} {} {:>8}  {}",
        entry.id,
        entry.start.format("%Y-%m-%d %H:%M"),
        duration,
        entry.description.as_deref().unwrap_or("(no description)")
    )
}
