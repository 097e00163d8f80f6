use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use x402_agent::{
    config::AgentConfig,
    models::{ModelMessage, RequestOptions},
    X402Agent,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from_env()?;
    let agent = X402Agent::from_config(&config)?;

    println!("x402 Test Agent");
    println!("===============");
    println!("Server: {}", config.base_url);
    println!("Wallet: {}", agent.address());
    println!("Network: {}", config.network);
    println!();

    println!("Step 1: Builder message...");
    match agent.call_builder_endpoint(&config.base_url).await {
        Ok(envelope) => agent.log_response(&envelope, Some("Builder")),
        Err(e) => println!("   [FAILED] {}", e),
    }
    println!();

    println!("Step 2: Paid chat...");
    let messages = vec![
        ModelMessage::system("You are a concise assistant."),
        ModelMessage::user("What does HTTP 402 mean?"),
    ];
    match agent.call_chat_endpoint(&config.base_url, messages).await {
        Ok(envelope) => {
            let reply = envelope
                .data
                .parsed()
                .and_then(|chat| chat.messages.last())
                .and_then(|m| m.text());
            if let Some(reply) = reply {
                println!("   Assistant: {}", reply);
            }
            agent.log_response(&envelope, Some("Chat"));
        }
        Err(e) => println!("   [FAILED] {}", e),
    }
    println!();

    println!("Step 3: Store download...");
    match agent.call_store_endpoint(&config.base_url).await {
        Ok(envelope) => {
            println!(
                "   [OK] {} ({} bytes)",
                envelope.data.file_name.as_deref().unwrap_or("unnamed"),
                envelope.data.bytes.len()
            );
            agent.log_response(&envelope, Some("Store"));
        }
        Err(e) => println!("   [FAILED] {}", e),
    }
    println!();

    // Unpaid health check: shows the envelope shape when no payment happens.
    let url = format!("{}/", config.base_url.trim_end_matches('/'));
    match agent.call_endpoint(&url, RequestOptions::get().text_response()).await {
        Ok(envelope) => println!(
            "Home page: {} {} (paid: {})",
            envelope.status,
            envelope.status_text,
            envelope.payment.is_present()
        ),
        Err(e) => println!("[FAILED] {}", e),
    }

    Ok(())
}
