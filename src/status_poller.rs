//! Periodic fetch of mission/display state. Independent of audio.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tokio::sync::watch;

pub struct StatusPoller {
    client: Client,
    url: String,
    interval: Duration,
    tx: watch::Sender<Option<Value>>,
}

impl StatusPoller {
    /// The receiver yields the latest state; `None` until the first
    /// successful poll. A request that takes longer than one interval is
    /// abandoned so a hung endpoint cannot stall the ticker.
    pub fn new(
        url: impl Into<String>,
        interval: Duration,
    ) -> anyhow::Result<(Self, watch::Receiver<Option<Value>>)> {
        let client = Client::builder().timeout(interval).build()?;
        let (tx, rx) = watch::channel(None);
        let poller = Self {
            client,
            url: url.into(),
            interval,
            tx,
        };
        Ok((poller, rx))
    }

    pub async fn poll_once(&self) -> anyhow::Result<Value> {
        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("status endpoint returned {}", resp.status());
        }
        Ok(resp.json::<Value>().await?)
    }

    /// Poll until every receiver is gone. Failures are logged and the next
    /// tick tries again; receivers are only woken when the state changes.
    pub async fn run(self) {
        log::info!("Polling {} every {:?}", self.url, self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.tx.is_closed() {
                break;
            }
            match self.poll_once().await {
                Ok(state) => {
                    self.tx.send_if_modified(|current| {
                        if current.as_ref() == Some(&state) {
                            false
                        } else {
                            *current = Some(state);
                            true
                        }
                    });
                }
                Err(e) => log::warn!("Status poll failed: {}", e),
            }
        }
        log::debug!("Status poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP responder: the n-th request gets `bodies[min(n, last)]`.
    async fn serve(bodies: Vec<&'static str>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/state", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let body = bodies[n.min(bodies.len() - 1)];
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (url, hits)
    }

    #[tokio::test]
    async fn poll_once_decodes_json() {
        let (url, _) = serve(vec![r#"{"mission":"survey","step":2}"#]).await;
        let (poller, _rx) = StatusPoller::new(url, Duration::from_millis(50)).unwrap();
        let state = poller.poll_once().await.unwrap();
        assert_eq!(state["mission"], "survey");
        assert_eq!(state["step"], 2);
    }

    #[tokio::test]
    async fn run_publishes_changes() {
        let (url, hits) = serve(vec![r#"{"step":1}"#, r#"{"step":1}"#, r#"{"step":2}"#]).await;
        let (poller, mut rx) = StatusPoller::new(url, Duration::from_millis(20)).unwrap();
        tokio::spawn(poller.run());

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap()["step"], 1);

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap()["step"], 2);
        assert!(hits.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/state", listener.local_addr().unwrap());
        drop(listener);
        let (poller, rx) = StatusPoller::new(url, Duration::from_millis(20)).unwrap();
        assert!(poller.poll_once().await.is_err());
        assert!(rx.borrow().is_none());
    }

    #[tokio::test]
    async fn hung_endpoint_times_out_within_one_interval() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/state", listener.local_addr().unwrap());
        // accept and never answer
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        let (poller, _rx) = StatusPoller::new(url, Duration::from_millis(100)).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), poller.poll_once())
            .await
            .expect("poll hung past its timeout");
        assert!(result.is_err());
    }
}
