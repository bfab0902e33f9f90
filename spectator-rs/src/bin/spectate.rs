use anyhow::Context;
use clap::Parser;
use spectator::config::{BASE_URL_VAR, STATE_DIR_VAR, WS_URL_VAR};
use spectator::{ConnectionStatus, SpectatorClient, SpectatorConfig, SpectatorSnapshot};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Watch a live debate and take part as a spectator.
///
/// Commands on stdin: `vote <poll> <option>`, `ask <text>`, `react <code>`, `reconnect`, `leave`.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Id of the debate to watch
    #[arg(value_parser = clap::builder::NonEmptyStringValueParser::new())]
    debate_id: String,

    /// HTTP origin of the debate server (overrides SPECTATOR_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Realtime origin (overrides SPECTATOR_WS_URL)
    #[arg(long)]
    ws_url: Option<String>,

    /// Directory for the persisted spectator id (overrides SPECTATOR_STATE_DIR)
    #[arg(long)]
    state_dir: Option<String>,

    /// Pseudonymous identity announced when joining
    #[arg(long)]
    spectator_hash: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    spectator::init_logging();
    let args = Args::parse();

    let config = SpectatorConfig::from_env(|var| match var {
        WS_URL_VAR => args.ws_url.clone(),
        BASE_URL_VAR => args.base_url.clone(),
        STATE_DIR_VAR => args.state_dir.clone(),
        _ => None,
    })
    .context("Invalid spectator configuration")?;

    let client = SpectatorClient::start(&config);
    client.set_spectator_hash(args.spectator_hash.clone());
    client.acquire(args.debate_id.clone());

    let mut state = client.watch();
    let printer = tokio::spawn(async move {
        let mut last_status = None;
        while state.changed().await.is_ok() {
            let snapshot = state.borrow_and_update().clone();
            if last_status != Some(snapshot.status) {
                println!("[{}]", snapshot.status_text());
                if let Some(error) = &snapshot.last_error {
                    if snapshot.status != ConnectionStatus::Connected {
                        println!("  error: {error}");
                    }
                }
                last_status = Some(snapshot.status);
            }
            if snapshot.status == ConnectionStatus::Connected {
                print_summary(&snapshot);
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match command {
            "" => {}
            "vote" => match rest.split_once(' ') {
                Some((poll_id, option)) => client.vote(poll_id, option.trim()),
                None => eprintln!("usage: vote <poll> <option>"),
            },
            "ask" if !rest.is_empty() => client.ask(rest),
            "react" if !rest.is_empty() => client.react(rest),
            "reconnect" => client.reconnect(),
            "leave" => break,
            other => eprintln!("unknown command `{other}`"),
        }
    }

    client.shutdown().await;
    printer.abort();
    Ok(())
}

fn print_summary(snapshot: &SpectatorSnapshot) {
    let feed = &snapshot.feed;
    println!(
        "  {} watching, {} question(s), {} reaction(s)",
        feed.presence,
        feed.questions.len(),
        feed.reactions.len()
    );
    for poll in feed.polls.values() {
        let counts: Vec<String> = poll
            .options
            .iter()
            .map(|option| format!("{option}: {}", poll.count(option)))
            .collect();
        let title = if poll.question.is_empty() {
            poll.poll_id.as_str()
        } else {
            poll.question.as_str()
        };
        println!("  poll {title} ({}) {}", poll.voters, counts.join(", "));
    }
    if let Some(question) = feed.questions.last() {
        println!("  latest question: {}", question.text);
    }
    if let Some(reaction) = feed.reactions.last() {
        println!("  latest reaction: {}", reaction.reaction);
    }
}
