use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use productivity_integrations::cli::{self, Cli, Commands, Provider, SlackCommand, TogglCommand};
use productivity_integrations::config::{Config, LoggingConfig, Secrets};
use productivity_integrations::consent::LoopbackConsent;
use productivity_integrations::generation::{CompletionRequest, TextGenerator};
use productivity_integrations::mail::MailFacade;
use productivity_integrations::models::OutgoingMail;
use productivity_integrations::transport::{install_crypto_provider, HttpTransport, HyperTransport};
use productivity_integrations::{AnthropicFacade, GeminiFacade, SlackFacade, TogglFacade};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        eprintln!("\nFor help, run: workbridge --help");
        process::exit(1);
    }
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("productivity_integrations=debug,workbridge=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "productivity_integrations={0},workbridge={0},warn",
                logging.level
            ))
        })
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run() -> Result<()> {
    install_crypto_provider();

    let cli = Cli::parse();

    if let Commands::InitConfig { output, force } = &cli.command {
        init_tracing(&LoggingConfig::default(), cli.verbose);
        if output.exists() && !force {
            bail!(
                "Configuration file already exists at {:?}. Use --force to overwrite.",
                output
            );
        }
        Config::create_example(output).await?;
        println!("Created example configuration file at: {:?}", output);
        println!("\nSecrets are read from the environment:");
        println!("  - GMAIL_CLIENT_ID / GMAIL_CLIENT_SECRET (or the client secret JSON file)");
        println!("  - SLACK_BOT_TOKEN");
        println!("  - TOGGL_API_TOKEN, TOGGL_WORKSPACE_ID");
        println!("  - ANTHROPIC_API_KEY, GEMINI_API_KEY");
        return Ok(());
    }

    let config = Config::load(&cli.config)
        .await
        .with_context(|| format!("Cannot load configuration from {:?}", cli.config))?;
    init_tracing(&config.logging, cli.verbose);
    tracing::debug!("Configuration: {:?}", config);

    let secrets = Secrets::from_env()?;
    let transport: Arc<dyn HttpTransport> = Arc::new(HyperTransport::new(
        config.transport.connect_timeout(),
        config.transport.request_timeout(),
    )?);

    match cli.command {
        Commands::Slack { command } => {
            let slack = SlackFacade::from_config(
                &config.slack,
                secrets.slack_bot_token.as_deref(),
                transport,
            )?;
            run_slack(&slack, command).await
        }
        Commands::Toggl { command } => {
            let toggl = TogglFacade::from_config(
                &config.toggl,
                secrets.toggl_api_token.as_deref(),
                secrets.toggl_workspace_id,
                transport,
            )?;
            run_toggl(&toggl, command).await
        }
        Commands::Ask {
            provider,
            prompt,
            system,
            max_tokens,
            temperature,
        } => {
            let generator: Box<dyn TextGenerator> = match provider {
                Provider::Anthropic => Box::new(AnthropicFacade::from_config(
                    &config.anthropic,
                    secrets.anthropic_api_key.as_deref(),
                    transport,
                )?),
                Provider::Gemini => Box::new(GeminiFacade::from_config(
                    &config.gemini,
                    secrets.gemini_api_key.as_deref(),
                    transport,
                )?),
            };
            let mut request = CompletionRequest::new(prompt)
                .with_max_tokens(max_tokens)
                .with_temperature(temperature);
            if let Some(system) = system {
                request = request.with_system(system);
            }
            tracing::info!("Asking {}", generator.name());
            println!("{}", generator.generate(&request).await?);
            Ok(())
        }
        command => {
            let consent = LoopbackConsent::new(
                config.mail.redirect_port,
                Duration::from_secs(config.mail.consent_timeout_secs),
            );
            let mail = MailFacade::from_config(&config.mail, transport, Arc::new(consent)).await?;
            run_mail(&mail, command).await
        }
    }
}

async fn run_mail(mail: &MailFacade, command: Commands) -> Result<()> {
    match command {
        Commands::Auth { force } => {
            let profile = mail.authenticate(force).await?;
            println!("Successfully authenticated as {}", profile.address);
            println!("Messages: {}", profile.messages_total);
            println!("Threads: {}", profile.threads_total);
        }
        Commands::SignOut => {
            mail.sign_out().await?;
            println!("Stored credential removed.");
        }
        Commands::Profile => {
            let profile = mail.get_profile().await?;
            println!("Address:  {}", profile.address);
            println!("Messages: {}", profile.messages_total);
            println!("Threads:  {}", profile.threads_total);
        }
        Commands::Search {
            query,
            max,
            include_trashed,
        } => cli::print_messages(&mail.search(&query, max, include_trashed).await?),
        Commands::Important {
            max,
            include_trashed,
        } => cli::print_messages(&mail.important(max, include_trashed).await?),
        Commands::Starred {
            max,
            include_trashed,
        } => cli::print_messages(&mail.starred(max, include_trashed).await?),
        Commands::Unread { query, max } => {
            cli::print_messages(&mail.unread(query.as_deref(), max).await?)
        }
        Commands::Show { id } => cli::print_message(&mail.get_message(&id).await?),
        Commands::Send {
            to,
            subject,
            body,
            cc,
            bcc,
            attachments,
        } => {
            let outgoing = OutgoingMail {
                to,
                subject,
                body,
                cc,
                bcc,
                attachments,
            };
            let sent = mail.send(&outgoing).await?;
            println!("Sent message {}", sent.id);
        }
        Commands::Flag {
            id,
            read,
            unread,
            star,
            unstar,
        } => {
            let change = cli::flag_change(read, unread, star, unstar);
            if change.is_empty() {
                bail!("Nothing to change: pass --read, --unread, --star or --unstar");
            }
            if mail.mutate_flags(&id, change).await? {
                println!("Updated {}", id);
            } else {
                bail!("Message {} not found", id);
            }
        }
        Commands::Labels => {
            for label in mail.list_labels().await? {
                println!(
                    "{:<30} {:<8} {}",
                    cli::truncate_string(&label.name, 30),
                    label.kind.as_deref().unwrap_or("-"),
                    label.id
                );
            }
        }
        other => bail!("Command {:?} is not a mail command", other),
    }
    Ok(())
}

async fn run_slack(slack: &SlackFacade, command: SlackCommand) -> Result<()> {
    match command {
        SlackCommand::Channels => {
            for channel in slack.list_channels().await? {
                println!(
                    "{:<12} #{:<30} {}",
                    channel.id,
                    channel.name,
                    if channel.is_member { "member" } else { "" }
                );
            }
        }
        SlackCommand::History { channel, limit } => {
            for message in slack.channel_history(&channel, limit).await? {
                println!(
                    "{} {:<12} {}",
                    message.ts,
                    message.user.as_deref().unwrap_or("-"),
                    cli::truncate_string(&message.text, 100)
                );
            }
        }
        SlackCommand::Post { channel, text } => {
            let posted = slack.post_message(&channel, &text, None).await?;
            println!("Posted {} to {}", posted.ts, posted.channel);
        }
        SlackCommand::Status { text, emoji } => {
            slack.update_status(&text, emoji.as_deref()).await?;
            println!("Status updated");
        }
    }
    Ok(())
}

async fn run_toggl(toggl: &TogglFacade, command: TogglCommand) -> Result<()> {
    match command {
        TogglCommand::Current => match toggl.current_time_entry().await? {
            Some(entry) => println!("{}", cli::time_entry_line(&entry)),
            None => println!("No time entry is running."),
        },
        TogglCommand::Entries { days } => {
            let start = Utc::now() - ChronoDuration::days(days.max(1));
            for entry in toggl.time_entries(Some(start), None).await? {
                println!("{}", cli::time_entry_line(&entry));
            }
        }
        TogglCommand::Start {
            description,
            project,
            tags,
        } => {
            let entry = toggl.start_time_entry(&description, project, &tags).await?;
            println!("Started {}", cli::time_entry_line(&entry));
        }
        TogglCommand::Stop { id } => {
            let entry = toggl.stop_time_entry(id).await?;
            println!("Stopped {}", cli::time_entry_line(&entry));
        }
        TogglCommand::Projects => {
            for project in toggl.projects().await? {
                println!(
                    "{:>12} {}{}",
                    project.id,
                    project.name,
                    if project.active { "" } else { " (archived)" }
                );
            }
        }
    }
    Ok(())
}
