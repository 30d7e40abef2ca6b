//! Stream reply example
//!
//! Streams one answer token by token, falling back to the non-streaming path
//! if the stream fails.
//!
//! Note: start the relay first (`cargo run --example cors_relay`) or point
//! `STREAMCHAT_PROXY_URL` at any OpenAI-compatible chat-completions endpoint.

use std::io::Write;
use streamchat::{ChatClient, ChatCompletionMessage, ClientOptions, StreamCallbacks, get_proxy_url};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let options = ClientOptions::builder()
        .proxy_url(get_proxy_url(None))
        .build()?;
    println!("Using {} with model {}\n", options.proxy_url, options.model);

    let client = ChatClient::new(options)?;
    let messages = vec![
        ChatCompletionMessage::system("You are a helpful assistant. Be brief."),
        ChatCompletionMessage::user("What's the capital of France?"),
    ];

    let callbacks = StreamCallbacks::new()
        .on_delta(|delta| {
            print!("{}", delta.text);
            let _ = std::io::stdout().flush();
        })
        .on_error(|session, err| eprintln!("\n[{session}] {err}"));

    print!("Response: ");
    let text = client
        .reply_with_fallback(&messages, None, &CancellationToken::new(), callbacks)
        .await?;

    println!("\n\n{} characters received", text.chars().count());
    Ok(())
}
