use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyEvent};
use tokio::sync::mpsc;

use dsm_core::models::{Drift, ServiceStatus};
use dsm_core::services::service_manager::InstallRequest;

/// Events flowing into the main loop.
#[derive(Debug)]
pub enum AppEvent {
    /// A key press from the user.
    Key(KeyEvent),
    /// Periodic tick for refreshing live service status.
    Tick,
    /// A fresh service list, after a workflow changed it.
    Services(Vec<ServiceStatus>),
    /// An async operation produced an error to display.
    Error(String),
    /// An async operation completed successfully with a message.
    Info(String),
    /// The requested external port was taken; reopen the install dialog.
    PortConflict { message: String, suggestion: u16 },
    /// A service with this name exists; ask before replacing it.
    ReinstallPrompt {
        name: String,
        request: InstallRequest,
    },
    /// Consistency check finished.
    CheckDone(Vec<Drift>),
}

const INPUT_POLL: Duration = Duration::from_millis(50);

/// Shared switch that stops the input task from touching the terminal, e.g.
/// while tmux owns the tty during an attach.
#[derive(Debug, Clone, Default)]
pub struct InputGate {
    paused: Arc<AtomicBool>,
}

impl InputGate {
    /// Pause input and wait out any poll already in flight.
    pub async fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tokio::time::sleep(INPUT_POLL * 2).await;
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Spawn the crossterm input polling task. Nothing is read while `gate` is
/// paused.
pub fn spawn_input_task(
    tx: mpsc::UnboundedSender<AppEvent>,
    gate: InputGate,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if gate.is_paused() {
                tokio::time::sleep(INPUT_POLL).await;
                continue;
            }
            // Poll crossterm events with 50ms timeout (non-blocking feel)
            let has_event =
                tokio::task::spawn_blocking(|| event::poll(INPUT_POLL).unwrap_or(false))
                    .await
                    .unwrap_or(false);

            if has_event && !gate.is_paused() {
                if let Ok(Event::Key(key)) = tokio::task::spawn_blocking(event::read)
                    .await
                    .unwrap_or(Err(std::io::Error::other("spawn_blocking failed")))
                {
                    if tx.send(AppEvent::Key(key)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Spawn the periodic tick task.
pub fn spawn_tick_task(tx: mpsc::UnboundedSender<AppEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(2));
        loop {
            interval.tick().await;
            if tx.send(AppEvent::Tick).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gate_is_shared_between_clones() {
        let gate = InputGate::default();
        let task_side = gate.clone();
        assert!(!task_side.is_paused());

        gate.pause().await;
        assert!(task_side.is_paused());

        gate.resume();
        assert!(!task_side.is_paused());
    }

    #[tokio::test]
    async fn pause_outlasts_an_in_flight_poll() {
        let gate = InputGate::default();
        let started = std::time::Instant::now();
        gate.pause().await;
        assert!(started.elapsed() >= INPUT_POLL);
    }
}
