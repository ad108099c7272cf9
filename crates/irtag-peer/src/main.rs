use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use irtag_peer::config::PeerConfig;
use irtag_peer::console::{self, HELP, RobotCommand};
use irtag_peer::node::{self, PeerHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = PeerConfig::load().context("loading configuration")?;
    tracing::info!(id = config.identity.id, name = %config.identity.name, "IR tag robot starting");
    let handle = node::spawn(config).await.context("starting robot node")?;

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

async fn run_command(handle: &PeerHandle, line: &str) -> anyhow::Result<bool> {
    let cmd = match console::parse(line) {
        Ok(Some(cmd)) => cmd,
        Ok(None) => return Ok(true),
        Err(e) => {
            println!("{e}");
            return Ok(true);
        },
    };
    match cmd {
        RobotCommand::Fire => match handle.fire().await? {
            Ok(bursts) => {
                let train: Vec<String> = bursts.iter().map(u32::to_string).collect();
                println!("fire: {}", train.join(","));
            },
            Err(e) => println!("cannot fire: {e}"),
        },
        RobotCommand::Move => match handle.check_move().await? {
            Ok(()) => println!("drive enabled"),
            Err(e) => println!("drive locked: {e}"),
        },
        RobotCommand::Ready(ready) => handle.set_ready(ready)?,
        RobotCommand::Receive(bursts) => {
            if handle.receive_frame(bursts).await? {
                println!("hit reported");
            } else {
                println!("frame ignored");
            }
        },
        RobotCommand::Bursts(bursts) => {
            let count = bursts.len();
            for duration_us in bursts {
                handle.receive_burst(duration_us)?;
            }
            println!("fed {count} bursts");
        },
        RobotCommand::Status => {
            let status = handle.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        },
        RobotCommand::Help => println!("{HELP}"),
        RobotCommand::Quit => return Ok(false),
    }
    Ok(true)
}
