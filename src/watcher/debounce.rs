use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender};

enum Command {
    Touch(String),
    Shutdown,
}

/// Debounce-by-key: rapid events sharing a key collapse into a single callback
/// firing `window` after the *last* touch for that key. Used for the 100 ms per-album debounce
/// in the Watcher — every file event for an album resets that album's timer rather
/// than firing once per event.
pub struct Debouncer {
    tx: Sender<Command>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(window: Duration, on_fire: impl Fn(&str) + Send + 'static) -> Self {
        let (tx, rx) = bounded::<Command>(1024);
        let handle = thread::Builder::new()
            .name("debouncer".into())
            .spawn(move || run(rx, window, Arc::new(on_fire)))
            .expect("failed to spawn debouncer thread");
        Self {
            tx,
            handle: Some(handle),
        }
    }

    pub fn touch(&self, key: impl Into<String>) {
        let _ = self.tx.send(Command::Touch(key.into()));
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(rx: Receiver<Command>, window: Duration, on_fire: Arc<dyn Fn(&str) + Send + Sync>) {
    let mut pending: HashMap<String, Instant> = HashMap::new();
    let tick = Duration::from_millis(20).min(window);
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(Command::Touch(key)) => {
                    pending.insert(key, Instant::now());
                }
                Ok(Command::Shutdown) | Err(_) => return,
            },
            default(tick) => {}
        }
        let ready: Vec<String> = pending
            .iter()
            .filter(|(_, touched_at)| touched_at.elapsed() >= window)
            .map(|(key, _)| key.clone())
            .collect();
        for key in ready {
            pending.remove(&key);
            on_fire(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_rapid_touches_fire_once() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired_clone = fired.clone();
        let debouncer = Debouncer::new(Duration::from_millis(50), move |key| {
            fired_clone.lock().unwrap().push(key.to_string());
        });
        for _ in 0..5 {
            debouncer.touch("album-1");
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(200));
        let result = fired.lock().unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0], "album-1");
    }

    #[test]
    fn test_distinct_keys_fire_independently() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired_clone = fired.clone();
        let debouncer = Debouncer::new(Duration::from_millis(30), move |key| {
            fired_clone.lock().unwrap().push(key.to_string());
        });
        debouncer.touch("a");
        debouncer.touch("b");
        thread::sleep(Duration::from_millis(150));
        let mut result = fired.lock().unwrap().clone();
        result.sort();
        assert_eq!(result, vec!["a".to_string(), "b".to_string()]);
    }
}
