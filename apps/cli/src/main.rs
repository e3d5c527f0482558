use std::{sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use client_core::{RequestCoordinator, RequestStatus, WsEventChannel};
use shared::{domain::RequestId, protocol::MusicianRequest};
use tracing::debug;
use uuid::Uuid;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: String,
    #[arg(long)]
    instrument: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    budget: Option<f64>,
    /// Give up and cancel the search after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let channel = WsEventChannel::connect(&args.server_url).await?;
    let coordinator = RequestCoordinator::new(channel);
    coordinator.activate();

    let request = MusicianRequest {
        id: RequestId::new(Uuid::new_v4().to_string()),
        instrument: args.instrument,
        event_description: args.description,
        budget: args.budget,
        location: None,
        event_date: None,
        requested_by: None,
    };
    println!(
        "Searching for a {} player (request {})",
        request.instrument, request.id
    );

    let mut updates = coordinator.subscribe_updates();
    coordinator.submit(&request);

    if let Some(secs) = args.timeout_secs {
        let deadline = Arc::clone(&coordinator);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            debug!("search deadline reached");
            deadline.cancel();
        });
    }

    while let Ok(state) = updates.recv().await {
        match state.status {
            RequestStatus::Searching => println!("Searching..."),
            RequestStatus::Found => {
                if let Some(musician) = &state.musician {
                    print!("Found {} ({})", musician.name, musician.instrument);
                    match musician.rating {
                        Some(rating) => println!(", rated {rating:.1}"),
                        None => println!(),
                    }
                }
                break;
            }
            RequestStatus::NotFound => {
                match state.error.as_deref() {
                    Some(reason) => println!("No musician: {reason}"),
                    None => println!("No musician available right now."),
                }
                break;
            }
            RequestStatus::Cancelled => {
                println!("Search cancelled.");
                break;
            }
            RequestStatus::Error => {
                println!(
                    "Search failed: {}",
                    state.error.as_deref().unwrap_or("unknown error")
                );
                break;
            }
            RequestStatus::Idle => {}
        }
    }

    coordinator.dispose();
    Ok(())
}
