//! Keep-alive for clients waiting on the intermediate relay server.
//!
//! While a long signature runs, a background thread stores the wait marker
//! under the transaction id every tick, so the waiting client does not give
//! up. The final result is sent under the same lock the ticks use; once it
//! is sent no marker can follow it.

use crate::error::{Error, Result};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

/// Marker telling the client to keep waiting.
pub const WAIT_MARKER: &str = "#WAIT";

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

const PROTOCOL_VERSION: &str = "1_0";

/// Stores data on the relay under a transaction.
pub trait SendsToRelay: Send + Sync {
    fn send(&self, data: &str) -> Result<()>;
}

/// Relay storage service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRelay {
    storage_url: String,
    transaction_id: String,
    timeout: Duration,
}

impl HttpRelay {
    pub fn new(storage_url: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self {
            storage_url: storage_url.into(),
            transaction_id: transaction_id.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Form fields of a store request.
    fn form<'a>(&'a self, data: &'a str) -> [(&'static str, &'a str); 4] {
        [
            ("op", "put"),
            ("v", PROTOCOL_VERSION),
            ("id", self.transaction_id.as_str()),
            ("dat", data),
        ]
    }
}

impl SendsToRelay for HttpRelay {
    fn send(&self, data: &str) -> Result<()> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Relay(format!("cannot build HTTP client: {}", e)))?;
        let response = client
            .post(&self.storage_url)
            .form(&self.form(data))
            .send()
            .map_err(|e| Error::Relay(format!("{}: {}", self.storage_url, e)))?;
        if !response.status().is_success() {
            return Err(Error::Relay(format!("{} answered {}", self.storage_url, response.status())));
        }
        Ok(())
    }
}

struct Shared {
    /// Cancelled flag; also held for every send
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.cancelled.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Background thread sending [`WAIT_MARKER`] until cancelled.
pub struct ActiveWaiting {
    shared: Arc<Shared>,
    pinger: Arc<dyn SendsToRelay>,
    handle: Option<JoinHandle<()>>,
}

impl ActiveWaiting {
    /// Start sending the wait marker every `interval`.
    pub fn spawn(pinger: Arc<dyn SendsToRelay>, interval: Duration) -> Result<Self> {
        let shared = Arc::new(Shared {
            cancelled: Mutex::new(false),
            wake: Condvar::new(),
        });
        let handle = {
            let shared = Arc::clone(&shared);
            let pinger = Arc::clone(&pinger);
            std::thread::Builder::new()
                .name("relay-wait".to_string())
                .spawn(move || run(&shared, pinger.as_ref(), interval))?
        };
        log::debug!("Active waiting started, interval {:?}", interval);
        Ok(Self {
            shared,
            pinger,
            handle: Some(handle),
        })
    }

    pub fn spawn_default(pinger: Arc<dyn SendsToRelay>) -> Result<Self> {
        Self::spawn(pinger, DEFAULT_INTERVAL)
    }

    /// Stop waiting and store `result`, with no marker sent after it.
    pub fn finish(mut self, result: &str) -> Result<()> {
        let sent = {
            let mut cancelled = self.shared.lock();
            *cancelled = true;
            self.shared.wake.notify_all();
            self.pinger.send(result)
        };
        self.join();
        sent
    }

    /// Stop waiting without sending anything.
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        *self.shared.lock() = true;
        self.shared.wake.notify_all();
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Active waiting thread panicked");
            }
        }
    }
}

impl Drop for ActiveWaiting {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn run(shared: &Shared, pinger: &dyn SendsToRelay, interval: Duration) {
    let mut cancelled = shared.lock();
    loop {
        cancelled = match shared.wake.wait_timeout_while(cancelled, interval, |c| !*c) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
        if *cancelled {
            log::debug!("Active waiting cancelled");
            return;
        }
        if let Err(e) = pinger.send(WAIT_MARKER) {
            log::warn!("Could not send the wait marker: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl SendsToRelay for Recorder {
        fn send(&self, data: &str) -> Result<()> {
            self.sent.lock().unwrap().push(data.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_ticks_then_result() {
        let recorder = Arc::new(Recorder::default());
        let waiting = ActiveWaiting::spawn(recorder.clone(), Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        waiting.finish("OK").unwrap();

        let sent = recorder.sent();
        assert!(sent.len() >= 2, "{:?}", sent);
        assert_eq!(sent.last().map(String::as_str), Some("OK"));
        assert!(sent[..sent.len() - 1].iter().all(|m| m == WAIT_MARKER));

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(recorder.sent().len(), sent.len());
    }

    #[test]
    fn test_cancel_wakes_immediately() {
        let recorder = Arc::new(Recorder::default());
        let waiting = ActiveWaiting::spawn(recorder.clone(), Duration::from_secs(3600)).unwrap();
        let start = Instant::now();
        waiting.cancel();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(recorder.sent().is_empty());
    }

    #[test]
    fn test_drop_stops_the_thread() {
        let recorder = Arc::new(Recorder::default());
        drop(ActiveWaiting::spawn(recorder.clone(), Duration::from_millis(5)).unwrap());
        let count = recorder.sent().len();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(recorder.sent().len(), count);
    }

    #[test]
    fn test_failed_ping_keeps_waiting() {
        struct Flaky(Mutex<usize>);
        impl SendsToRelay for Flaky {
            fn send(&self, _: &str) -> Result<()> {
                *self.0.lock().unwrap() += 1;
                Err(Error::Relay("unreachable".into()))
            }
        }
        let flaky = Arc::new(Flaky(Mutex::new(0)));
        let waiting = ActiveWaiting::spawn(flaky.clone(), Duration::from_millis(5)).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert!(matches!(waiting.finish("done"), Err(Error::Relay(_))));
        assert!(*flaky.0.lock().unwrap() >= 3);
    }

    #[test]
    fn test_store_request_form() {
        let relay = HttpRelay::new("https://relay.example.com/StorageService", "a1b2").with_timeout(Duration::from_secs(5));
        assert_eq!(relay.timeout, Duration::from_secs(5));
        assert_eq!(
            relay.form(WAIT_MARKER),
            [("op", "put"), ("v", "1_0"), ("id", "a1b2"), ("dat", "#WAIT")]
        );
    }
}
