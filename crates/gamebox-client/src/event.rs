use std::time::Duration;

use crossterm::event::{Event, EventStream, KeyEvent, KeyEventKind};
use futures::StreamExt;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    /// Periodic redraw, also covers terminal resizes.
    Tick,
}

/// Forward key presses and ticks until the app stops listening.
pub async fn event_loop(event_tx: mpsc::Sender<AppEvent>) {
    let mut key_stream = EventStream::new();
    let mut tick_interval = tokio::time::interval(Duration::from_millis(250));

    loop {
        let event = tokio::select! {
            maybe = key_stream.next() => match maybe {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => AppEvent::Key(key),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!("Failed to read terminal events: {}", e);
                    break;
                }
                None => break,
            },
            _ = tick_interval.tick() => AppEvent::Tick,
        };

        if event_tx.send(event).await.is_err() {
            break;
        }
    }
}
