//! `lantern chat`: interactive or single-message chat mode.

use lantern_config::AppConfig;
use lantern_core::channel::Channel;
use lantern_core::event::{DomainEvent, QuotaScope};
use std::io::Write;

use crate::channel::{Session, TerminalChannel};
use crate::runtime::Runtime;

pub async fn run(session: Session, message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let persona = config.persona.name.clone();
    let runtime = Runtime::new(config)?;
    let pipeline = runtime.pipeline().await?;
    let channel = TerminalChannel::new(session.clone(), persona.clone());

    // Surface quota exhaustion to the person typing
    let mut events = runtime.event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let DomainEvent::QuotaExhausted { scope, .. } = event.as_ref() {
                match scope {
                    QuotaScope::Day => eprintln!("  (daily crawl quota used up)"),
                    QuotaScope::Request => eprintln!("  (crawl stopped at the per-request limit)"),
                }
            }
        }
    });

    if let Some(msg) = message {
        let event = session.event(&msg);
        if let Some(reply) = pipeline.handle(&event).await {
            println!("{reply}");
        }
        return Ok(());
    }

    println!();
    println!("  {persona}: interactive mode");
    println!("  Model:   {}", runtime.config.provider.model);
    println!("  Memory:  {}", runtime.config.memory.backend);
    if let Some(group) = &session.group {
        println!("  Group:   {group} (start a line with '@' to address {persona})");
    }
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut rx = channel.start().await?;
    print!("  You > ");
    std::io::stdout().flush()?;

    while let Some(event) = rx.recv().await {
        if let Some(reply) = pipeline.handle(&event).await {
            channel.send(&event.channel_id, &reply, Some(&event.message_id)).await?;
        }
        print!("  You > ");
        std::io::stdout().flush()?;
    }

    channel.stop().await?;
    println!();
    Ok(())
}
