#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use safebrowsing2::{Config, HttpResponse, Result, Transport};

/// Transport fake: routes matched by URL substring, every request recorded.
/// Routes are not consumed, so replaying an update hits the same script.
pub struct ScriptedTransport {
    routes: Vec<(String, u16, Vec<u8>)>,
    pub requests: Mutex<Vec<(&'static str, String, Vec<u8>)>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn route(mut self, pattern: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.routes.push((pattern.to_string(), status, body.into()));
        self
    }

    /// Delay every response, to widen race windows in re-entrancy tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request_body(&self) -> Vec<u8> {
        self.requests
            .lock()
            .unwrap()
            .last()
            .map(|(_, _, body)| body.clone())
            .expect("no requests recorded")
    }

    async fn respond(&self, method: &'static str, url: &str, body: Vec<u8>) -> Result<HttpResponse> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.requests
            .lock()
            .unwrap()
            .push((method, url.to_string(), body));
        for (pattern, status, response) in &self.routes {
            if url.contains(pattern.as_str()) {
                return Ok(HttpResponse {
                    status: *status,
                    body: response.clone(),
                });
            }
        }
        Ok(HttpResponse {
            status: 404,
            body: Vec::new(),
        })
    }
}

impl Transport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.respond("GET", url, Vec::new()).await
    }

    async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse> {
        self.respond("POST", url, body).await
    }
}

/// A config pointing at a scripted server, with a fresh data file per test.
pub fn test_config(name: &str) -> Config {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = Config::default();
    config.server = "https://sb.example.test/".to_string();
    config.key = "testkey".to_string();
    config.data_filepath = temp_path(name);
    let _ = std::fs::remove_file(&config.data_filepath);
    config
}

pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sb2-test-{}-{}.json", std::process::id(), name))
}
