//! Authenticated moderation example: bans a user and reports the outcome.
//!
//! Run with `TMI_USERNAME`/`TMI_OAUTH_TOKEN` set:
//! `cargo run --example moderation -- <channel> <user> <reason>`

use tmi_rs::config::Identity;
use tmi_rs::{ClientConfig, ClientHandle};

#[tokio::main]
async fn main() -> tmi_rs::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let channel = args.next().expect("usage: moderation <channel> <user> [reason]");
    let user = args.next().expect("usage: moderation <channel> <user> [reason]");
    let reason = args.next();

    let identity = Identity {
        username: std::env::var("TMI_USERNAME").ok(),
        password: std::env::var("TMI_OAUTH_TOKEN").ok(),
        client_id: None,
    };

    let config = ClientConfig::new()
        .with_identity(identity)
        .with_channels([channel.clone()]);

    let client = ClientHandle::connect(config).await?;
    client.wait_for("connected", std::time::Duration::from_secs(10)).await;

    match client.commands().ban(&channel, &user, reason.as_deref()).await {
        Ok(()) => println!("banned {user} in {channel}"),
        Err(err) => eprintln!("ban failed: {err}"),
    }

    client.disconnect().await?;
    Ok(())
}
