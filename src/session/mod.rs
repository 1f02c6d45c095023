//! Authenticated browser sessions against a switch web UI
//!
//! Extractors only ever see the [`SwitchSession`] trait; everything that
//! talks to the automation engine lives in [`chrome`]. A session is opened
//! for one extraction call, never shared, and closed on every exit path.

pub mod chrome;

pub use chrome::ChromeLauncher;

use crate::error::{CollectorError, Result};
use crate::models::SwitchTarget;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};

static PREFIX_IN_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(csb[0-9a-fA-F]+)/").expect("valid regex"));

/// Per-login namespace segment of the switch's internal page URLs
///
/// SG200 firmware serves device pages under `/csbXXXXXX/` where the suffix
/// changes per boot and per login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePrefix(String);

impl InstancePrefix {
    /// First prefix found in any of the given URLs
    pub fn find<'a>(urls: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        urls.into_iter().find_map(|url| {
            PREFIX_IN_URL
                .captures(url)
                .and_then(|c| c.get(1))
                .map(|m| InstancePrefix(m.as_str().to_string()))
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstancePrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the browser showed after the login form was submitted
#[derive(Debug, Default, Deserialize)]
pub struct LoginProbe {
    /// Top-level URL followed by every reachable frame URL
    pub urls: Vec<String>,
    /// A password input is still present somewhere in the frameset
    pub password_field: bool,
    /// Message of the last JavaScript dialog the page raised after submit
    #[serde(skip)]
    pub dialog: Option<String>,
}

impl LoginProbe {
    pub fn prefix(&self) -> Option<InstancePrefix> {
        InstancePrefix::find(self.urls.iter().map(String::as_str))
    }

    /// The switch answered with a dialog and left the login form up
    pub fn rejected(&self) -> bool {
        self.dialog.is_some() && self.password_field && self.prefix().is_none()
    }

    /// Final verdict once the settle time is over
    ///
    /// The UI answers 200 whether or not the password was right, so the
    /// decision is structural: a namespaced frame URL means we are in, a
    /// login form that is still there (or an error dialog) means we were
    /// turned away.
    pub fn outcome(&self) -> Result<InstancePrefix> {
        if let Some(prefix) = self.prefix() {
            return Ok(prefix);
        }
        if let Some(message) = &self.dialog {
            return Err(CollectorError::Auth(format!(
                "switch rejected the login: {message}"
            )));
        }
        if self.password_field {
            return Err(CollectorError::Auth(
                "switch kept showing the login form".to_string(),
            ));
        }
        Err(CollectorError::Parse(
            "could not find the csb instance prefix after login".to_string(),
        ))
    }
}

/// Poll `probe` until the login settles or `within` runs out
///
/// A probe that errors (the frameset is still navigating and has no script
/// context yet) counts as "not settled"; the last error is returned only
/// once the deadline has passed.
pub async fn wait_for_login<F, Fut>(
    within: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<InstancePrefix>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<LoginProbe>>,
{
    let deadline = Instant::now() + within;
    loop {
        match probe().await {
            Ok(p) if p.prefix().is_some() || p.rejected() || Instant::now() >= deadline => {
                return p.outcome();
            }
            Ok(_) => {}
            Err(e) if Instant::now() >= deadline => return Err(e),
            Err(e) => tracing::debug!("Login not settled yet: {}", e),
        }
        sleep(interval).await;
    }
}

/// One authenticated session, bound to one target
#[async_trait]
pub trait SwitchSession: Send {
    fn target(&self) -> &SwitchTarget;

    fn prefix(&self) -> &InstancePrefix;

    /// Navigate to `path` under the instance prefix and return the page HTML
    async fn load_page(&mut self, path: &str) -> Result<String>;

    /// HTML of the current top-level document and of every loaded frame
    async fn frame_documents(&mut self) -> Result<Vec<String>>;

    /// Fetch `path` under the instance prefix with the session's cookies,
    /// without navigating. `Ok(None)` when the switch refuses it.
    async fn fetch_resource(&mut self, path: &str) -> Result<Option<String>>;

    /// Release everything the session holds. Safe to call more than once.
    async fn close(&mut self);
}

/// Creates sessions; the only place that decides how a login happens
#[async_trait]
pub trait SessionOpener: Send + Sync {
    /// Open and log in. Fails with `Auth` for rejected credentials and
    /// `Transport` for unreachable hosts; nothing is left running on failure.
    async fn open(&self, target: &SwitchTarget) -> Result<Box<dyn SwitchSession>>;
}

/// Bounds concurrent sessions per switch IP
///
/// Small-business switches often cannot serve two authenticated UI sessions
/// at once, so requests for the same switch queue behind each other. Hosts
/// with nothing in flight are forgotten on the next acquire, so the map only
/// holds busy hosts.
pub struct HostLimiter {
    per_host: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HostLimiter {
    pub fn new(per_host: usize) -> Self {
        Self {
            per_host: per_host.max(1),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, host: &str) -> Result<OwnedSemaphorePermit> {
        let semaphore = {
            let mut hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
            // Only the map holds an idle host's semaphore; permits and
            // waiters each hold another reference
            hosts.retain(|_, s| Arc::strong_count(s) > 1);
            hosts
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
                .clone()
        };

        semaphore
            .acquire_owned()
            .await
            .map_err(|_| CollectorError::Browser("session limiter closed".to_string()))
    }

    #[cfg(test)]
    fn tracked_hosts(&self) -> usize {
        self.hosts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
pub mod fake {
    //! In-memory sessions serving canned pages

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LoginBehaviour {
        Accept,
        RejectCredentials,
        Unreachable,
    }

    /// Canned switch UI keyed by path under the prefix
    #[derive(Debug, Clone)]
    pub struct FakeSwitch {
        pub login: LoginBehaviour,
        pub pages: HashMap<String, String>,
        pub resources: HashMap<String, String>,
        /// Documents visible right after login, before any navigation
        pub landing: Vec<String>,
    }

    impl FakeSwitch {
        pub fn new() -> Self {
            Self {
                login: LoginBehaviour::Accept,
                pages: HashMap::new(),
                resources: HashMap::new(),
                landing: Vec::new(),
            }
        }

        pub fn page(mut self, path: &str, html: &str) -> Self {
            self.pages.insert(path.to_string(), html.to_string());
            self
        }

        pub fn resource(mut self, path: &str, body: &str) -> Self {
            self.resources.insert(path.to_string(), body.to_string());
            self
        }

        pub fn login(mut self, login: LoginBehaviour) -> Self {
            self.login = login;
            self
        }
    }

    #[derive(Default)]
    pub struct Counters {
        pub opened: AtomicUsize,
        pub closed: AtomicUsize,
        pub loads: AtomicUsize,
    }

    impl Counters {
        pub fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        pub fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    pub struct FakeSession {
        target: SwitchTarget,
        prefix: InstancePrefix,
        switch: FakeSwitch,
        counters: Arc<Counters>,
        current: Option<String>,
        closed: bool,
    }

    impl FakeSession {
        /// A logged-in session outside of any opener
        pub fn new(switch: FakeSwitch) -> Self {
            Self {
                target: SwitchTarget {
                    ip: "192.168.0.221".to_string(),
                    username: "cisco".to_string(),
                    password: "cisco".to_string(),
                },
                prefix: InstancePrefix("csb2d0a1b9c".to_string()),
                switch,
                counters: Arc::new(Counters::default()),
                current: None,
                closed: false,
            }
        }
    }

    #[async_trait]
    impl SwitchSession for FakeSession {
        fn target(&self) -> &SwitchTarget {
            &self.target
        }

        fn prefix(&self) -> &InstancePrefix {
            &self.prefix
        }

        async fn load_page(&mut self, path: &str) -> Result<String> {
            self.counters.loads.fetch_add(1, Ordering::SeqCst);
            let html = self.switch.pages.get(path).cloned().unwrap_or_else(|| {
                "<html><body><h1>404 Not Found</h1></body></html>".to_string()
            });
            self.current = Some(html.clone());
            Ok(html)
        }

        async fn frame_documents(&mut self) -> Result<Vec<String>> {
            let mut docs = self.switch.landing.clone();
            docs.extend(self.current.clone());
            Ok(docs)
        }

        async fn fetch_resource(&mut self, path: &str) -> Result<Option<String>> {
            Ok(self.switch.resources.get(path).cloned())
        }

        async fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.counters.closed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    pub struct FakeOpener {
        switch: FakeSwitch,
        pub counters: Arc<Counters>,
    }

    impl FakeOpener {
        pub fn new(switch: FakeSwitch) -> Self {
            Self {
                switch,
                counters: Arc::new(Counters::default()),
            }
        }
    }

    #[async_trait]
    impl SessionOpener for FakeOpener {
        async fn open(&self, target: &SwitchTarget) -> Result<Box<dyn SwitchSession>> {
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            match self.switch.login {
                LoginBehaviour::Accept => {
                    let mut session = FakeSession::new(self.switch.clone());
                    session.target = target.clone();
                    session.counters = self.counters.clone();
                    Ok(Box::new(session))
                }
                LoginBehaviour::RejectCredentials => {
                    self.counters.closed.fetch_add(1, Ordering::SeqCst);
                    Err(CollectorError::Auth("switch kept showing the login form".into()))
                }
                LoginBehaviour::Unreachable => {
                    self.counters.closed.fetch_add(1, Ordering::SeqCst);
                    Err(CollectorError::Transport(format!("{} is unreachable", target.ip)))
                }
            }
        }
    }
}
