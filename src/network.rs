use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender};

use crate::events::{Event, EventSink};
use crate::pipeline::Pipeline;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

enum Command {
    Shutdown,
}

/// Returns the new state when connectivity flips, `None` when it's unchanged — kept separate
/// from the polling loop so the edge-detection logic is testable without a real HTTP probe.
fn transition(was_online: bool, now_online: bool) -> Option<bool> {
    if was_online == now_online {
        None
    } else {
        Some(now_online)
    }
}

/// Polls the remote API's reachability every 5 seconds and reflects the online/offline edge
/// through the event stream, pausing the Pipeline the moment it goes offline and resuming it
/// the moment it comes back.
pub struct NetworkMonitor {
    online: Arc<AtomicBool>,
    command_tx: Sender<Command>,
    handle: Option<thread::JoinHandle<()>>,
}

impl NetworkMonitor {
    pub fn start(health_url: String, pipeline: Arc<Pipeline>, events: EventSink) -> Self {
        let online = Arc::new(AtomicBool::new(true));
        let (command_tx, command_rx) = bounded(1);
        let thread_online = online.clone();
        let handle = thread::Builder::new()
            .name("network-monitor".into())
            .spawn(move || run(&health_url, &thread_online, &pipeline, &events, &command_rx))
            .expect("failed to spawn network monitor thread");
        Self {
            online,
            command_tx,
            handle: Some(handle),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        let _ = self.command_tx.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn probe(client: &reqwest::blocking::Client, health_url: &str) -> bool {
    client
        .head(health_url)
        .send()
        .map(|response| response.status().is_success() || response.status().is_redirection())
        .unwrap_or(false)
}

fn run(
    health_url: &str,
    online: &AtomicBool,
    pipeline: &Pipeline,
    events: &EventSink,
    command_rx: &Receiver<Command>,
) {
    let client = reqwest::blocking::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .expect("failed to build network monitor HTTP client");

    loop {
        select! {
            recv(command_rx) -> _ => return,
            default(POLL_INTERVAL) => {}
        }

        let now_online = probe(&client, health_url);
        let was_online = online.swap(now_online, Ordering::SeqCst);
        if let Some(new_state) = transition(was_online, now_online) {
            tracing::info!(online = new_state, "network connectivity changed");
            events.emit(Event::NetworkStatusChanged { online: new_state });
            if new_state {
                pipeline.resume();
            } else {
                pipeline.pause();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_reports_none_when_unchanged() {
        assert_eq!(transition(true, true), None);
        assert_eq!(transition(false, false), None);
    }

    #[test]
    fn test_transition_reports_new_state_on_change() {
        assert_eq!(transition(true, false), Some(false));
        assert_eq!(transition(false, true), Some(true));
    }
}
