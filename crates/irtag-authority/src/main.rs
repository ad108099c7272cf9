use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use irtag_authority::config::AuthorityConfig;
use irtag_authority::console::{self, HELP, OperatorCommand};
use irtag_authority::node::{self, AuthorityHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("IR tag scoring authority starting");

    let config = AuthorityConfig::load().context("loading configuration")?;
    let handle = node::spawn(config)
        .await
        .context("starting authority node")?;

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !run_command(&handle, &line).await? {
                            break;
                        }
                    },
                    // stdin closed: keep serving until ctrl-c
                    None => {
                        tokio::signal::ctrl_c().await?;
                        break;
                    },
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Run one console line. Returns `false` when the operator quits.
async fn run_command(handle: &AuthorityHandle, line: &str) -> anyhow::Result<bool> {
    let cmd = match console::parse(line) {
        Ok(Some(cmd)) => cmd,
        Ok(None) => return Ok(true),
        Err(e) => {
            println!("{e}");
            return Ok(true);
        },
    };
    match cmd {
        OperatorCommand::Start {
            participants,
            duration_ms,
        } => match handle.start_match(participants, duration_ms).await? {
            Ok(id) => println!("match {id} started"),
            Err(e) => println!("cannot start: {e}"),
        },
        OperatorCommand::Stop => {
            if !handle.stop_match().await? {
                println!("no active match");
            }
        },
        OperatorCommand::ReadyCheck => {
            if let Err(e) = handle.ready_check().await? {
                println!("cannot run ready check: {e}");
            }
        },
        OperatorCommand::Reset => handle.reset_match()?,
        OperatorCommand::Award {
            participant,
            category,
            delta,
            note,
        } => match handle.award(participant, category, delta, note).await? {
            Ok(()) => println!("awarded {delta} ({category}) to {participant}"),
            Err(e) => println!("award rejected: {e}"),
        },
        OperatorCommand::Remove(id) => {
            if handle.remove(id).await? {
                println!("removed {id}");
            } else {
                println!("no participant {id}");
            }
        },
        OperatorCommand::Status => print_status(handle).await?,
        OperatorCommand::Export => match handle.export().await? {
            Ok((report, location)) => {
                println!("{}", report.render_text());
                println!("report written to {location}");
            },
            Err(e) => println!("export failed: {e}"),
        },
        OperatorCommand::Help => println!("{HELP}"),
        OperatorCommand::Quit => return Ok(false),
    }
    Ok(true)
}

async fn print_status(handle: &AuthorityHandle) -> anyhow::Result<()> {
    let status = handle.status().await?;
    let snap = &status.snapshot;
    match &snap.match_name {
        Some(name) => println!(
            "{:?} {name}  remaining {}s  grace {}s  hits {}",
            snap.phase,
            snap.remaining_ms / 1000,
            snap.grace_remaining_ms / 1000,
            snap.hits
        ),
        None => println!("{:?}  no match", snap.phase),
    }
    println!(
        "{:<4} {:<16} {:<16} {:>7} {:>4} {:>4}  STATE",
        "ID", "TEAM", "ROBOT", "POINTS", "K", "D"
    );
    for p in &snap.participants {
        let state = match (p.online, p.disabled, p.ready) {
            (false, _, _) => "offline",
            (true, true, _) => "disabled",
            (true, false, true) => "ready",
            (true, false, false) => "online",
        };
        println!(
            "{:<4} {:<16} {:<16} {:>7} {:>4} {:>4}  {state}",
            p.id, p.name, p.robot_name, p.score, p.kills, p.deaths
        );
    }
    println!(
        "datagrams: {} in, {} rejected, {} out, {} failed",
        status.stats.received, status.stats.rejected, status.stats.sent, status.stats.send_failures
    );
    Ok(())
}
