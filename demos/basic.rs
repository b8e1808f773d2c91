//! Connects anonymously, joins a channel, and prints chat as it arrives.
//!
//! Mirrors the reference repo's `main.rs` role (a thin harness exercising
//! `client.rs`) without the ratatui TUI — run with:
//! `cargo run --example basic -- <channel>`

use tmi_rs::{ClientConfig, ClientHandle};

#[tokio::main]
async fn main() -> tmi_rs::Result<()> {
    tracing_subscriber::fmt::init();

    let channel = std::env::args().nth(1).unwrap_or_else(|| "forsen".to_string());
    let config = ClientConfig::new().with_channels([channel.clone()]);

    let client = ClientHandle::connect(config).await?;

    client
        .on("connected", |_payload| {
            println!("connected");
        })
        .await;

    client
        .on("chat", |payload| {
            let Some(msg) = &payload.message else { return };
            let nick = msg.prefix_nick().unwrap_or("?");
            let text = msg.trailing().unwrap_or_default();
            println!("#{}: {nick}: {text}", msg.channel().unwrap_or_default().trim_start_matches('#'));
        })
        .await;

    client
        .on("disconnected", |payload| {
            println!("disconnected: {:?}", payload.text);
        })
        .await;

    tokio::signal::ctrl_c().await.ok();
    client.disconnect().await?;
    Ok(())
}
