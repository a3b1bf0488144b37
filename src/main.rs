use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use elevator_core::{Config, Controller, EventBus};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let local = tokio::task::LocalSet::new();
    local.run_until(run()).await;
}

async fn run() {
    let config = Config::default();
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        return;
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel::<String>();
    let bus = EventBus::new();
    let mut controller = Controller::new(config, events_tx, bus);
    controller.start();

    tokio::task::spawn_local(print_events(events_rx));

    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        controller.handle_line(&line).await;
    }

    controller.stop().await;
}

async fn print_events(mut events_rx: mpsc::UnboundedReceiver<String>) {
    while let Some(event) = events_rx.recv().await {
        println!("{event}");
    }
}
