//! `nwatch` - CLI for neighborwatch
//!
//! This binary provides the command-line interface for reporting incidents,
//! reading the heatmap, chatting with your zone and raising panic alerts.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::mpsc;

use neighborwatch::chat::ChatMessage;
use neighborwatch::cli::{
    ChatCommand, Cli, Command, ConfigCommand, EmergencyCommand, HeatmapCommand, LinksCommand,
    OutputFormat, ReportCommand, ZoneCommand,
};
use neighborwatch::device::Notifier;
use neighborwatch::feed::{subscribe, ChatFeed, CommentsFeed, PanicWatcher, ReportsFeed};
use neighborwatch::heatmap::{max_weight, HeatBucket, HeatmapStyle};
use neighborwatch::links::{
    emergency_number, police_stations_url, tel_url, LinkOpener, PrintOpener, SystemOpener,
    EMERGENCY_NUMBERS, USEFUL_LINKS,
};
use neighborwatch::report::{Category, Comment, Report};
use neighborwatch::{
    flows, init_logging, Auth, Config, ConsoleNotifier, Coordinates, Error, FixedGeolocator,
    ReportDraft, Session, SharedStorage, SignUpForm, Storage,
};

/// Slides shown by `nwatch intro`.
const INTRO: [(&str, &str); 3] = [
    (
        "Crime map",
        "See nearby incidents as they are reported and stay informed about safety in your zone.",
    ),
    (
        "Panic button",
        "Send a quick alert with your exact location to your zone and emergency services.",
    ),
    (
        "Join your community",
        "Comment on and vote for reports near you. Together we can make a safer place for everyone.",
    ),
];

/// Everything a command needs, built once at startup.
struct App {
    config: Config,
    storage: SharedStorage,
    auth: Auth,
    session: Session,
    geolocator: FixedGeolocator,
    notifier: Arc<ConsoleNotifier>,
}

impl App {
    async fn open(config: Config, position: Option<(f64, f64)>) -> anyhow::Result<Self> {
        let path = config.database_path();
        let storage = Storage::open(&path)
            .with_context(|| format!("opening database {}", path.display()))?
            .into_shared();

        let auth = Auth::new(storage.clone());
        let session = auth.restore().await?;

        let mut geolocator = FixedGeolocator::from_config(&config.location);
        if let Some((latitude, longitude)) = position {
            geolocator = geolocator.with_position(Coordinates::new(latitude, longitude));
        }

        let token = storage.lock().await.device_token()?;
        let notifier = Arc::new(ConsoleNotifier::new(&config.notifications, token));

        Ok(Self {
            config,
            storage,
            auth,
            session,
            geolocator,
            notifier,
        })
    }

    fn zone(&self) -> String {
        self.session.zone(&self.config.session.default_zone)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    let position = cli.position_override();
    match cli.command {
        // Configuration commands must work even when the file is broken.
        Command::Config(cmd) => handle_config(cli.config, cmd),
        Command::Emergency(cmd) => handle_emergency(cmd),
        Command::Links(cmd) => handle_links(cmd),
        command => {
            let config = Config::load_from(cli.config).context("loading configuration")?;
            let app = App::open(config, position).await?;
            run(&app, command).await
        }
    }
}

async fn run(app: &App, command: Command) -> anyhow::Result<()> {
    if !matches!(command, Command::Intro) && app.storage.lock().await.is_first_run()? {
        eprintln!("Welcome! Run `nwatch intro` for a quick tour.\n");
    }

    match command {
        Command::Register(cmd) => {
            let form = SignUpForm {
                name: cmd.name,
                email: cmd.email,
                password: cmd.password,
                confirm_password: cmd.confirm_password,
            };
            let profile =
                flows::register(&app.auth, &app.geolocator, &form, !cmd.no_location).await?;
            println!("Account created for {} in zone \"{}\".", profile.email, profile.zone);
            println!("Sign in with `nwatch login`.");
        }
        Command::Login(cmd) => {
            let notifier: &dyn Notifier = app.notifier.as_ref();
            let profile = app.auth.sign_in(&cmd.email, &cmd.password, notifier).await?;
            println!("Signed in as {} ({}).", profile.display_name, profile.zone);
        }
        Command::Logout => {
            app.auth.sign_out().await?;
            println!("Signed out.");
        }
        Command::Profile(cmd) => {
            let user = app.session.require_user()?;
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(user)?);
            } else {
                println!("Name:   {}", user.display_name);
                println!("Email:  {}", user.email);
                println!("Zone:   {}", user.zone);
                if let Some(home) = user.home {
                    println!("Home:   {home}");
                }
                println!("Since:  {}", user.created_at.format("%Y-%m-%d"));
            }
        }
        Command::Zone(ZoneCommand::Set { zone }) => {
            let profile = app.auth.set_zone(&zone).await?;
            println!("Zone set to \"{}\".", profile.zone);
        }
        Command::Report(cmd) => handle_report(app, cmd).await?,
        Command::Heatmap(cmd) => handle_heatmap(app, &cmd).await?,
        Command::Chat(cmd) => handle_chat(app, cmd).await?,
        Command::Panic(cmd) => {
            let zone = app.zone();
            if !cmd.yes && !confirm(&format!("Send a panic alert to \"{zone}\"?"))? {
                return Err(Error::Cancelled.into());
            }
            let message =
                flows::send_panic(&app.storage, &app.geolocator, &app.session, &zone).await?;
            println!("Panic alert sent to \"{zone}\".\n\n{}", message.text);
            if let Some(coords) = message.location {
                println!("\nNearest police stations: {}", police_stations_url(coords));
            }
        }
        Command::Intro => {
            for (i, (title, text)) in INTRO.iter().enumerate() {
                println!("{}/{}  {title}\n      {text}\n", i + 1, INTRO.len());
            }
            app.storage.lock().await.mark_intro_seen()?;
        }
        Command::Status(cmd) => handle_status(app, cmd.json).await?,
        Command::Config(cmd) => handle_config(None, cmd)?,
        Command::Emergency(cmd) => handle_emergency(cmd)?,
        Command::Links(cmd) => handle_links(cmd)?,
    }

    Ok(())
}

async fn handle_report(app: &App, cmd: ReportCommand) -> anyhow::Result<()> {
    match cmd {
        ReportCommand::Submit {
            category,
            description,
            name,
            yes,
        } => {
            let mut draft = ReportDraft::new(category.into(), description);
            if let Some(name) = name {
                draft = draft.with_reporter(name);
            }
            draft.validate()?;
            if !yes && !confirm(&format!("Submit this {} report?", draft.category))? {
                return Err(Error::Cancelled.into());
            }
            let report = flows::submit_report(&app.storage, &app.geolocator, &draft).await?;
            println!("Report #{} submitted. Thank you for looking out.", report.id);
        }
        ReportCommand::List {
            category,
            limit,
            format,
        } => {
            let reports = app
                .storage
                .lock()
                .await
                .recent_reports(category.map(Category::from), limit)?;
            print_reports(&reports, format)?;
        }
        ReportCommand::Show { id } => {
            let storage = app.storage.lock().await;
            let report = storage.report(id)?.ok_or_else(|| Error::not_found("report", id))?;
            let comments = storage.comments(id)?;
            drop(storage);
            print_report(&report);
            if let Some(user) = app.session.current() {
                if let Some(vote) = report.vote_of(&user.uid) {
                    println!("Your vote:   {vote}");
                }
            }
            println!("\nComments ({}):", comments.len());
            for comment in &comments {
                print_comment(comment);
            }
        }
        ReportCommand::Vote { id, kind } => {
            let report = flows::vote(&app.storage, &app.session, id, kind.into()).await?;
            println!(
                "Report #{}: {} confirm / {} deny",
                report.id,
                report.confirm_count(),
                report.deny_count()
            );
        }
        ReportCommand::Comment { id, text } => {
            let comment = flows::comment(&app.storage, &app.session, id, &text).await?;
            println!("Comment #{} added.", comment.id);
        }
        ReportCommand::Comments { id, watch } => {
            if app.storage.lock().await.report(id)?.is_none() {
                return Err(Error::not_found("report", id).into());
            }
            if watch {
                let (_subscription, rx) = subscribe(
                    CommentsFeed::new(app.storage.clone(), id),
                    app.config.poll_interval(),
                );
                follow(rx, |comment| {
                    print_comment(&comment);
                    Ok(())
                })
                .await?;
            } else {
                for comment in app.storage.lock().await.comments(id)? {
                    print_comment(&comment);
                }
            }
        }
    }
    Ok(())
}

async fn handle_heatmap(app: &App, cmd: &HeatmapCommand) -> anyhow::Result<()> {
    let category = cmd.category.map(Category::from);
    let precision = cmd.precision.unwrap_or(app.config.heatmap.precision);
    let style = app.config.heatmap_style();

    if cmd.watch {
        let (_subscription, rx) = subscribe(
            ReportsFeed::new(app.storage.clone(), category),
            app.config.poll_interval(),
        );
        follow(rx, |changed| {
            let buckets = flows::heat_buckets(&changed.reports, None, precision);
            println!("-- revision {} --", changed.revision);
            print_heatmap(&buckets, &style, cmd.format)
        })
        .await?;
    } else {
        let reports = app.storage.lock().await.reports()?;
        let buckets = flows::heat_buckets(&reports, category, precision);
        print_heatmap(&buckets, &style, cmd.format)?;
    }
    Ok(())
}

async fn handle_chat(app: &App, cmd: ChatCommand) -> anyhow::Result<()> {
    let zone = app.zone();
    match cmd {
        ChatCommand::Send { text } => {
            let message = flows::send_chat(&app.storage, &app.session, &zone, &text).await?;
            print_message(&message);
        }
        ChatCommand::History { limit } => {
            let mut messages = app.storage.lock().await.messages(&zone, limit)?;
            messages.reverse();
            for message in &messages {
                print_message(message);
            }
        }
        ChatCommand::Watch => {
            app.session.require_user()?;
            println!("Watching \"{zone}\" (Ctrl-C to stop)\n");

            let notifier: Arc<dyn Notifier> = app.notifier.clone();
            let mut watcher = PanicWatcher::for_zone(&app.storage, &zone, notifier).await?;
            let (_subscription, mut rx) = subscribe(
                ChatFeed::new(app.storage.clone(), zone.as_str()),
                app.config.poll_interval(),
            );

            let shutdown = tokio::signal::ctrl_c();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    message = rx.recv() => {
                        let Some(message) = message else { break };
                        print_message(&message);
                        watcher.handle(&message).await?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn handle_emergency(cmd: EmergencyCommand) -> anyhow::Result<()> {
    match cmd {
        EmergencyCommand::List => {
            for entry in &EMERGENCY_NUMBERS {
                println!("{:<6} {:<22} {}", entry.number, entry.name, entry.description);
            }
        }
        EmergencyCommand::Call { number, print } => {
            match emergency_number(&number) {
                Some(entry) => println!("Calling {} ({})", entry.name, entry.number),
                None => tracing::warn!(number = %number, "Not a listed emergency number"),
            }
            opener(print).open(&tel_url(&number))?;
        }
    }
    Ok(())
}

fn handle_links(cmd: LinksCommand) -> anyhow::Result<()> {
    match cmd {
        LinksCommand::List => {
            for (i, link) in USEFUL_LINKS.iter().enumerate() {
                println!("{}. {}\n   {}\n   {}", i + 1, link.name, link.description, link.url);
            }
        }
        LinksCommand::Open { index, print } => {
            let link = index
                .checked_sub(1)
                .and_then(|i| USEFUL_LINKS.get(i))
                .ok_or_else(|| Error::not_found("link", index))?;
            opener(print).open(link.url)?;
        }
    }
    Ok(())
}

async fn handle_status(app: &App, json: bool) -> anyhow::Result<()> {
    let storage = app.storage.lock().await;
    let stats = storage.stats()?;
    let revision = storage.reports_revision()?;
    drop(storage);

    let user = app.session.current();
    if json {
        let status = serde_json::json!({
            "signed_in": user.is_some(),
            "user": user.map(|u| &u.email),
            "zone": app.zone(),
            "database_path": app.config.database_path(),
            "reports_revision": revision,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("nwatch status");
        println!("-------------");
        match user {
            Some(u) => println!("Signed in:     {} <{}>", u.display_name, u.email),
            None => println!("Signed in:     no"),
        }
        println!("Zone:          {}", app.zone());
        println!("Database:      {}", app.config.database_path().display());
        println!("Size:          {} bytes", stats.db_size_bytes);
        println!();
        println!("Users:         {}", stats.users);
        println!("Reports:       {} (revision {revision})", stats.reports);
        println!("Votes:         {}", stats.votes);
        println!("Comments:      {}", stats.comments);
        println!("Messages:      {}", stats.messages);
        if let Some(newest) = stats.newest_report {
            println!("Last report:   {}", newest.format("%Y-%m-%d %H:%M UTC"));
        }
    }
    Ok(())
}

fn handle_config(path: Option<std::path::PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Heatmap]");
                println!("  Precision:          {}", config.heatmap.precision);
                println!("  Radius:             {}", config.heatmap.radius);
                println!("  Opacity:            {}", config.heatmap.opacity);
                println!();
                println!("[Session]");
                println!("  Default zone:       {}", config.session.default_zone);
                println!();
                println!("[Location]");
                println!("  Permission:         {}", config.location.permission);
                println!("  Position:           {}", config.position());
                println!();
                println!("[Notifications]");
                println!("  Permission:         {}", config.notifications.permission);
                println!("  Enabled:            {}", config.notifications.enabled);
                println!();
                println!("[Feed]");
                println!("  Poll interval (ms): {}", config.feed.poll_interval_ms);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.or(path).unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}

/// Print feed events until the feed ends or the user presses Ctrl-C.
async fn follow<E>(
    mut rx: mpsc::Receiver<E>,
    mut on_event: impl FnMut(E) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            event = rx.recv() => match event {
                Some(event) => on_event(event)?,
                None => return Ok(()),
            },
        }
    }
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn opener(print: bool) -> Box<dyn LinkOpener> {
    if print {
        Box::new(PrintOpener)
    } else {
        Box::new(SystemOpener)
    }
}

fn print_reports(reports: &[Report], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(reports)?),
        OutputFormat::Table => {
            println!(
                "{:>5}  {:<11} {:<17} {:>4} {:>4}  {}",
                "ID", "CATEGORY", "WHEN", "YES", "NO", "DESCRIPTION"
            );
            for r in reports {
                println!(
                    "{:>5}  {:<11} {:<17} {:>4} {:>4}  {}",
                    r.id,
                    r.category.as_str(),
                    r.created_at.format("%Y-%m-%d %H:%M"),
                    r.confirm_count(),
                    r.deny_count(),
                    r.description.as_deref().unwrap_or("")
                );
            }
        }
        OutputFormat::Plain => {
            for r in reports {
                println!(
                    "#{} {} {}",
                    r.id,
                    r.category,
                    r.description.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

fn print_report(report: &Report) {
    println!("Report #{}", report.id);
    println!("Category:    {}", report.category);
    println!("Reported by: {}", report.reporter_name.as_deref().unwrap_or("Anonymous"));
    println!("When:        {}", report.created_at.format("%Y-%m-%d %H:%M UTC"));
    if let Some(coords) = report.coords {
        println!("Where:       {coords}  {}", coords.maps_url());
    }
    if let Some(description) = &report.description {
        println!("\n{description}\n");
    }
    println!(
        "Votes:       {} confirm / {} deny",
        report.confirm_count(),
        report.deny_count()
    );
}

fn print_comment(comment: &Comment) {
    println!(
        "[{}] {}: {}",
        comment.created_at.format("%Y-%m-%d %H:%M"),
        comment.author,
        comment.text
    );
}

fn print_message(message: &ChatMessage) {
    let marker = if message.is_panic() { "🚨 " } else { "" };
    println!(
        "[{}] {marker}{}: {}",
        message.created_at.format("%H:%M"),
        message.sender.name,
        message.text
    );
}

fn print_heatmap(
    buckets: &[HeatBucket],
    style: &HeatmapStyle,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let max = max_weight(buckets);
    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({ "style": style, "buckets": buckets });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Table => {
            println!(
                "{:>12} {:>13} {:>6} {:>9}  {}",
                "LATITUDE", "LONGITUDE", "WEIGHT", "INTENSITY", "COLOR"
            );
            for bucket in buckets {
                let intensity = HeatmapStyle::intensity(bucket, max);
                println!(
                    "{:>12} {:>13} {:>6} {:>9.2}  {}",
                    bucket.latitude,
                    bucket.longitude,
                    bucket.weight,
                    intensity,
                    style.color_for(intensity).unwrap_or("-"),
                );
            }
        }
        OutputFormat::Plain => {
            for bucket in buckets {
                println!("{},{} {}", bucket.latitude, bucket.longitude, bucket.weight);
            }
        }
    }
    Ok(())
}
