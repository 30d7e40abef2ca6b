//! Stop generating example
//!
//! Starts a long answer on a background task and aborts it after a few
//! seconds, the way a "stop" button would. The partial text survives.
//!
//! Note: start the relay first (`cargo run --example cors_relay`) or point
//! `STREAMCHAT_PROXY_URL` at any OpenAI-compatible chat-completions endpoint.

use futures::StreamExt;
use std::io::Write;
use std::time::Duration;
use streamchat::{ChatClient, ChatCompletionMessage, ClientOptions, Error, get_proxy_url};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let client = ChatClient::new(ClientOptions::builder().proxy_url(get_proxy_url(None)).build()?)?;
    let messages = vec![ChatCompletionMessage::user(
        "Write a detailed 1000-word essay about the history of the printing press",
    )];

    let (handle, mut deltas) = client.spawn_stream(messages, None);
    let current = handle.session_id();
    println!("Started {current}; stopping in 3 seconds...\n");

    let stop = handle.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        stop.cancel();
    });

    while let Some(item) = deltas.next().await {
        match item {
            // Only render fragments of the session we are showing.
            Ok(delta) if delta.session == current => {
                print!("{}", delta.text);
                let _ = std::io::stdout().flush();
            }
            Ok(_) => {}
            Err(err) => eprintln!("\n[{current}] {err}"),
        }
    }

    match handle.finish().await {
        Ok(text) => println!("\n\nFinished before the stop: {} characters", text.chars().count()),
        Err(Error::Aborted { partial }) => {
            println!("\n\nStopped. Kept {} characters of partial text", partial.chars().count())
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}
