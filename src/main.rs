mod cache;
mod config;
mod constants;
mod credentials;
mod mail;
mod mutation;
mod oauth2;
mod retry;
mod search;
mod sync;
mod view;

use anyhow::{Context, Result};
use std::env;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cache::Cache;
use crate::config::Config;
use crate::credentials::{AccountCredentials, CredentialStore};
use crate::mail::imap::ImapConnector;
use crate::mail::session::{MailboxSession, SessionFactory};
use crate::mail::types::ComposeEmail;
use crate::mutation::{Mutation, MutationOp, Mutations};
use crate::search::SearchRequest;
use crate::sync::Synchronizer;
use crate::view::{LogSink, StdoutSink, ViewRefresher, ViewState, format_row};

fn setup_logging() {
    use std::fs::OpenOptions;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gmirror=debug"));

    // Try to create a log file in the config directory
    let log_file = Config::config_dir()
        .ok()
        .map(|dir| dir.join("gmirror.log"))
        .and_then(|path| {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
                .ok()
        });

    if let Some(file) = log_file {
        // Log to file
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
            .init();
    } else {
        // Fallback to stderr if file logging fails
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_usage() {
    eprintln!(
        r#"gmirror - Local mirror of a Gmail label

Usage: gmirror [command]

Commands:
    (none), run                 Sync the configured label until Ctrl-C
    page [label] [page]         Print one page of threads from the cache
    labels [--cached]           List labels on the server (or in the cache)
    search <query> [--all]      Gmail search in the label (or All Mail)
    mark <op> <uid>...          read, unread, star, unstar, archive, trash, restore
    send <to> <subject>         Send a message; body is read from stdin
    password                    Store the account password
    help                        Show this help message

Configuration file: ~/.config/gmirror/config.toml
"#
    );
}

fn load_config() -> Result<Config> {
    let config = Config::load()?;
    config.ensure_dirs()?;
    Ok(config)
}

fn connector(config: &Config) -> ImapConnector<AccountCredentials> {
    ImapConnector::new(config.account.clone(), Arc::new(AccountCredentials))
}

async fn run_sync(config: Config) -> Result<()> {
    let cache = Arc::new(Cache::open(&Config::db_path()?).await?);
    let running = Arc::new(AtomicBool::new(true));

    let (refresher, _view, window_rx) = ViewRefresher::new(
        cache.clone(),
        ViewState::new(&config.sync.label, config.view.page_size),
        LogSink::new(&config.view.date_format),
        config.view.refresh_interval(),
    );
    let (synchronizer, status) = Synchronizer::new(
        connector(&config),
        cache.clone(),
        config.sync.clone(),
        window_rx,
        running.clone(),
    );

    let view_task = refresher.spawn(running.clone());
    let sync_task = synchronizer.spawn();

    println!(
        "Syncing {} for {}. Press Ctrl-C to stop.",
        config.sync.label, config.account.email
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!("Stopping...");
    running.store(false, Ordering::SeqCst);

    view_task.await.ok();
    // An IDLE in progress finishes within its timeout
    let grace = config.sync.idle_timeout() + Duration::from_secs(5);
    if tokio::time::timeout(grace, sync_task).await.is_err() {
        tracing::warn!("Synchronizer did not stop within {:?}", grace);
    }

    let status = status.borrow().clone();
    if let Some(error) = &status.last_error {
        println!("Reconnected {} time(s); last error: {}", status.reconnects, error);
    }
    Ok(())
}

async fn run_page(config: Config, label: Option<&str>, page: Option<&str>) -> Result<()> {
    let page = match page {
        Some(p) => p
            .parse::<usize>()
            .ok()
            .filter(|p| *p > 0)
            .with_context(|| format!("Invalid page number '{}'", p))?,
        None => 1,
    };
    let label = label.unwrap_or(&config.sync.label);

    let cache = Arc::new(Cache::open(&Config::db_path()?).await?);
    let mut state = ViewState::new(label, config.view.page_size);
    state.page = page - 1;

    let (mut refresher, _view, _window) = ViewRefresher::new(
        cache,
        state,
        StdoutSink::new(&config.view.date_format),
        config.view.refresh_interval(),
    );
    refresher.refresh().await?;
    Ok(())
}

async fn run_labels(config: Config, cached: bool) -> Result<()> {
    if cached {
        let cache = Cache::open(&Config::db_path()?).await?;
        for label in cache.list_labels().await? {
            println!("{}", label);
        }
        return Ok(());
    }

    let mut session = connector(&config).connect().await?;
    let labels = session.list_labels().await;
    session.logout().await.ok();

    for label in labels? {
        println!("{}", label);
    }
    Ok(())
}

async fn run_search(config: Config, args: &[String]) -> Result<()> {
    let all_mailboxes = args.iter().any(|a| a == "--all");
    let query: Vec<&str> = args
        .iter()
        .filter(|a| *a != "--all")
        .map(String::as_str)
        .collect();
    if query.is_empty() {
        anyhow::bail!("Usage: gmirror search <query> [--all]");
    }

    let request = SearchRequest {
        query: query.join(" "),
        label: config.sync.label.clone(),
        all_mailboxes,
    };
    let results = search::run_search(&connector(&config), &request).await?;

    if results.is_empty() {
        println!("No messages match '{}'", request.query);
    }
    for summary in &results {
        println!("{}", format_row(summary, &config.view.date_format));
    }
    Ok(())
}

async fn run_mutation(config: Config, mutation: Mutation) -> Result<()> {
    let (mutations, mut results) = Mutations::new(
        Arc::new(connector(&config)),
        config.account.clone(),
        Arc::new(AccountCredentials),
    );
    mutations.spawn(mutation);

    let outcome = results
        .recv()
        .await
        .context("Mutation worker exited without a result")?;
    outcome.result?;
    println!("{}: done", outcome.description);
    Ok(())
}

fn parse_mark(config: &Config, args: &[String]) -> Result<Mutation> {
    let (op, uids) = args
        .split_first()
        .context("Usage: gmirror mark <op> <uid>...")?;
    let op: MutationOp = op.parse()?;
    let uids = uids
        .iter()
        .map(|u| {
            u.parse::<u32>()
                .with_context(|| format!("Invalid UID '{}'", u))
        })
        .collect::<Result<Vec<_>>>()?;
    if uids.is_empty() {
        anyhow::bail!("No UIDs given");
    }

    Ok(Mutation::Remote {
        op,
        label: config.sync.label.clone(),
        uids,
    })
}

fn parse_send(args: &[String]) -> Result<Mutation> {
    let [to, subject] = args else {
        anyhow::bail!("Usage: gmirror send <to> <subject>");
    };

    let mut body = String::new();
    std::io::stdin()
        .read_to_string(&mut body)
        .context("Failed to read message body")?;

    Ok(Mutation::Send(ComposeEmail {
        to: to.split(',').map(|s| s.trim().to_string()).collect(),
        subject: subject.clone(),
        body,
    }))
}

fn run_password() -> Result<()> {
    use std::io::{self, Write};

    let config = load_config()?;
    print!("Password for {}: ", config.account.email);
    io::stdout().flush()?;
    let password = rpassword_read()?;
    println!();

    if password.is_empty() {
        anyhow::bail!("Empty password");
    }
    CredentialStore::new(&config.account.email).set_password(&password)?;
    println!("Password stored.");
    Ok(())
}

fn rpassword_read() -> Result<String> {
    use std::io;

    // Disable echo
    let _guard = DisableEcho::new()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;
    Ok(password.trim().to_string())
}

struct DisableEcho {
    #[cfg(unix)]
    original: libc::termios,
}

impl DisableEcho {
    #[cfg(unix)]
    fn new() -> Result<Self> {
        use std::mem::MaybeUninit;
        use std::os::unix::io::AsRawFd;

        let fd = std::io::stdin().as_raw_fd();
        let mut termios = MaybeUninit::<libc::termios>::uninit();

        unsafe {
            if libc::tcgetattr(fd, termios.as_mut_ptr()) != 0 {
                anyhow::bail!("Failed to get terminal attributes");
            }
            let original = termios.assume_init();
            let mut new = original;
            new.c_lflag &= !libc::ECHO;
            if libc::tcsetattr(fd, libc::TCSANOW, &new) != 0 {
                anyhow::bail!("Failed to set terminal attributes");
            }
            Ok(Self { original })
        }
    }

    #[cfg(not(unix))]
    fn new() -> Result<Self> {
        Ok(Self {})
    }
}

#[cfg(unix)]
impl Drop for DisableEcho {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;
        let fd = std::io::stdin().as_raw_fd();
        unsafe {
            libc::tcsetattr(fd, libc::TCSANOW, &self.original);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let rest = args.get(2..).unwrap_or_default();

    match args.get(1).map(|s| s.as_str()) {
        Some("help") | Some("--help") | Some("-h") => {
            print_usage();
            Ok(())
        }
        Some("password") => run_password(),
        None | Some("run") => {
            setup_logging();
            run_sync(load_config()?).await
        }
        Some("page") => {
            setup_logging();
            run_page(
                load_config()?,
                rest.first().map(String::as_str),
                rest.get(1).map(String::as_str),
            )
            .await
        }
        Some("labels") => {
            setup_logging();
            run_labels(load_config()?, rest.iter().any(|a| a == "--cached")).await
        }
        Some("search") => {
            setup_logging();
            run_search(load_config()?, rest).await
        }
        Some("mark") => {
            setup_logging();
            let config = load_config()?;
            let mutation = parse_mark(&config, rest)?;
            run_mutation(config, mutation).await
        }
        Some("send") => {
            setup_logging();
            let config = load_config()?;
            let mutation = parse_send(rest)?;
            run_mutation(config, mutation).await
        }
        Some(cmd) => {
            eprintln!("Unknown command: {}", cmd);
            print_usage();
            std::process::exit(1);
        }
    }
}
