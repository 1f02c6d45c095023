//! Headless Chrome implementation of [`SwitchSession`]
//!
//! Every session launches its own browser process with a throwaway profile
//! directory, so no cookies or cache leak between requests. The process is
//! shut down by [`SwitchSession::close`]; if the owning future is dropped
//! first (client disconnect, cancellation), `Drop` kills it instead.
//!
//! JavaScript dialogs block the page's script thread, so every one is
//! dismissed as soon as it opens and its message kept for the login verdict.

use super::{wait_for_login, InstancePrefix, LoginProbe, SessionOpener, SwitchSession};
use crate::config::BrowserConfig;
use crate::error::{CollectorError, Result};
use crate::models::SwitchTarget;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const PROBE_INTERVAL: Duration = Duration::from_millis(500);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Collects `docs`: the top-level window and every same-origin frame below it
const WALK_FRAMES: &str = r#"
    const docs = [];
    const walk = (win) => {
        let doc;
        try { doc = win.document; } catch (e) { return; }
        docs.push({ url: win.location.href, doc });
        for (let i = 0; i < win.frames.length; i++) walk(win.frames[i]);
    };
    walk(window);
"#;

const PROBE_LOGIN: &str = r#"
    return JSON.stringify({
        urls: docs.map(d => d.url),
        password_field: docs.some(d => d.doc.querySelector("input[type='password']") !== null),
    });
"#;

const FRAME_HTML: &str = r#"
    return JSON.stringify(docs.map(d =>
        d.doc.documentElement ? d.doc.documentElement.outerHTML : ""));
"#;

/// Opens Chrome-backed sessions
pub struct ChromeLauncher {
    cfg: BrowserConfig,
}

impl ChromeLauncher {
    pub fn new(cfg: BrowserConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl SessionOpener for ChromeLauncher {
    async fn open(&self, target: &SwitchTarget) -> Result<Box<dyn SwitchSession>> {
        let mut browser = ChromeBrowser::launch(&self.cfg).await?;

        match login(&browser, target, &self.cfg).await {
            Ok(prefix) => {
                tracing::debug!("[{}] Logged in, instance prefix {}", target.ip, prefix);
                Ok(Box::new(ChromeSession {
                    browser,
                    target: target.clone(),
                    prefix,
                }))
            }
            Err(e) => {
                browser.shutdown().await;
                Err(e)
            }
        }
    }
}

/// Load the UI root, fill the login form wherever it lives, and wait for the
/// frameset to show the instance prefix
async fn login(
    browser: &ChromeBrowser,
    target: &SwitchTarget,
    cfg: &BrowserConfig,
) -> Result<InstancePrefix> {
    browser.navigate(&format!("http://{}/", target.ip)).await?;
    if let Some(message) = browser.take_dialog() {
        tracing::debug!("[{}] Dialog before login: {}", target.ip, message);
    }

    let submitted: String = browser.run_in_frames(&login_script(target)?).await?;
    match submitted.as_str() {
        "submitted" => sleep(cfg.login_settle()).await,
        "no-login-form" => tracing::debug!("[{}] No login form, assuming logged in", target.ip),
        "no-user-field" => {
            return Err(CollectorError::Parse(
                "login form has a password field but no username field".to_string(),
            ))
        }
        other => {
            return Err(CollectorError::Browser(format!(
                "unexpected login script result: {other}"
            )))
        }
    }

    wait_for_login(cfg.navigation_timeout(), PROBE_INTERVAL, || async move {
        let mut probe: LoginProbe = browser.run_in_frames_json(PROBE_LOGIN).await?;
        probe.dialog = browser.take_dialog();
        Ok::<_, CollectorError>(probe)
    })
    .await
}

/// Script that fills and submits the first login form found in any frame
///
/// Credentials are embedded as JSON string literals.
fn login_script(target: &SwitchTarget) -> Result<String> {
    let user = serde_json::to_string(&target.username)
        .map_err(|e| CollectorError::Browser(e.to_string()))?;
    let pass = serde_json::to_string(&target.password)
        .map_err(|e| CollectorError::Browser(e.to_string()))?;

    Ok(format!(
        r#"
        const set = (el, value) => {{
            el.focus();
            el.value = value;
            el.dispatchEvent(new Event("input", {{ bubbles: true }}));
            el.dispatchEvent(new Event("change", {{ bubbles: true }}));
        }};
        for (const {{ doc }} of docs) {{
            const pw = doc.querySelector("input[type='password']");
            if (!pw) continue;
            const user = doc.querySelector("input[type='text'], input[type='email']")
                || doc.querySelector("input:not([type='password']):not([type='hidden'])");
            if (!user) return "no-user-field";
            set(user, {user});
            set(pw, {pass});
            const btn = doc.querySelector("input[type='submit'], button, input[type='button']");
            if (btn) btn.click();
            else if (pw.form) pw.form.submit();
            return "submitted";
        }}
        return "no-login-form";
        "#
    ))
}

fn fetch_script(url: &str) -> Result<String> {
    let url = serde_json::to_string(url).map_err(|e| CollectorError::Browser(e.to_string()))?;
    Ok(format!(
        r#"(() => {{
            try {{
                const xhr = new XMLHttpRequest();
                xhr.open("GET", {url}, false);
                xhr.send(null);
                return JSON.stringify({{ status: xhr.status, body: xhr.responseText }});
            }} catch (e) {{
                return JSON.stringify({{ status: 0, body: String(e) }});
            }}
        }})()"#
    ))
}

#[derive(Deserialize)]
struct FetchResult {
    status: u16,
    body: String,
}

/// A logged-in Chrome session
pub struct ChromeSession {
    browser: ChromeBrowser,
    target: SwitchTarget,
    prefix: InstancePrefix,
}

impl ChromeSession {
    fn url(&self, path: &str) -> String {
        format!(
            "http://{}/{}/{}",
            self.target.ip,
            self.prefix.as_str(),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl SwitchSession for ChromeSession {
    fn target(&self) -> &SwitchTarget {
        &self.target
    }

    fn prefix(&self) -> &InstancePrefix {
        &self.prefix
    }

    async fn load_page(&mut self, path: &str) -> Result<String> {
        let url = self.url(path);
        self.browser.navigate(&url).await?;
        self.browser.content().await
    }

    async fn frame_documents(&mut self) -> Result<Vec<String>> {
        self.browser.run_in_frames_json(FRAME_HTML).await
    }

    async fn fetch_resource(&mut self, path: &str) -> Result<Option<String>> {
        let url = self.url(path);
        let raw: String = self.browser.evaluate(&fetch_script(&url)?).await?;
        let result: FetchResult = serde_json::from_str(&raw)
            .map_err(|e| CollectorError::Browser(format!("unexpected fetch result: {e}")))?;

        if (200..300).contains(&result.status) {
            Ok(Some(result.body))
        } else {
            tracing::debug!("[{}] {} answered status {}", self.target.ip, url, result.status);
            Ok(None)
        }
    }

    async fn close(&mut self) {
        self.browser.shutdown().await;
    }
}

/// Owns the browser process, its event loop task, one page, and the profile dir
struct ChromeBrowser {
    browser: Option<Browser>,
    page: Option<Page>,
    handler: JoinHandle<()>,
    dialogs: Option<JoinHandle<()>>,
    last_dialog: Arc<Mutex<Option<String>>>,
    timeout: Duration,
    _profile: TempDir,
}

impl ChromeBrowser {
    async fn launch(cfg: &BrowserConfig) -> Result<Self> {
        let profile = tempfile::Builder::new()
            .prefix("sg200-collector-")
            .tempdir()
            .map_err(|e| CollectorError::Browser(format!("failed to create profile dir: {e}")))?;

        let mut builder = chromiumoxide::BrowserConfig::builder()
            .user_data_dir(profile.path())
            .request_timeout(cfg.navigation_timeout())
            .arg("--ignore-certificate-errors")
            .arg("--disable-extensions")
            .arg("--no-first-run");
        if !cfg.headless {
            builder = builder.with_head();
        }
        if cfg.no_sandbox {
            builder = builder.no_sandbox();
        }
        if !cfg.chrome_path.is_empty() {
            builder = builder.chrome_executable(&cfg.chrome_path);
        }
        let config = builder.build().map_err(CollectorError::Browser)?;

        let (browser, mut events) = Browser::launch(config)
            .await
            .map_err(|e| CollectorError::Browser(format!("failed to launch browser: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    tracing::trace!("Browser event error: {}", e);
                }
            }
        });

        let page = timeout(cfg.navigation_timeout(), browser.new_page("about:blank")).await;
        let mut this = Self {
            browser: Some(browser),
            page: None,
            handler,
            dialogs: None,
            last_dialog: Arc::new(Mutex::new(None)),
            timeout: cfg.navigation_timeout(),
            _profile: profile,
        };

        match page {
            Ok(Ok(page)) => match dismiss_dialogs(&page, this.last_dialog.clone()).await {
                Ok(task) => {
                    this.dialogs = Some(task);
                    this.page = Some(page);
                }
                Err(e) => {
                    this.shutdown().await;
                    return Err(e);
                }
            },
            Ok(Err(e)) => {
                this.shutdown().await;
                return Err(e.into());
            }
            Err(_) => {
                this.shutdown().await;
                return Err(CollectorError::Browser("timed out opening a page".to_string()));
            }
        }

        Ok(this)
    }

    /// Message of the most recent dialog since the last call
    fn take_dialog(&self) -> Option<String> {
        self.last_dialog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| CollectorError::Browser("session already closed".to_string()))
    }

    /// Navigate and wait for the load event, bounded by the navigation timeout
    async fn navigate(&self, url: &str) -> Result<()> {
        let page = self.page()?;
        match timeout(self.timeout, page.goto(url)).await {
            Err(_) => {
                return Err(CollectorError::Transport(format!(
                    "navigation to {url} timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
            Ok(Err(e)) => {
                return Err(CollectorError::Transport(format!(
                    "navigation to {url} failed: {e}"
                )))
            }
            Ok(Ok(_)) => {}
        }

        // Chrome renders its own error page for unreachable hosts
        let location: String = self.evaluate("location.href").await?;
        if location.starts_with("chrome-error://") {
            return Err(CollectorError::Transport(format!("{url} is unreachable")));
        }
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        let page = self.page()?;
        match timeout(self.timeout, page.content()).await {
            Ok(html) => Ok(html?),
            Err(_) => Err(CollectorError::Transport(
                "timed out reading page content".to_string(),
            )),
        }
    }

    /// Evaluate an expression that yields a string
    async fn evaluate(&self, expression: &str) -> Result<String> {
        let page = self.page()?;
        let params = EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(CollectorError::Browser)?;

        let result = match timeout(self.timeout, page.evaluate_expression(params)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CollectorError::Transport(
                    "timed out waiting for the page script".to_string(),
                ))
            }
        };

        result
            .into_value::<String>()
            .map_err(|e| CollectorError::Browser(format!("unexpected script result: {e}")))
    }

    /// Run `body` with `docs` bound to every reachable frame document
    async fn run_in_frames(&self, body: &str) -> Result<String> {
        self.evaluate(&format!("(() => {{ {WALK_FRAMES} {body} }})()"))
            .await
    }

    async fn run_in_frames_json<T: DeserializeOwned>(&self, body: &str) -> Result<T> {
        let raw = self.run_in_frames(body).await?;
        serde_json::from_str(&raw)
            .map_err(|e| CollectorError::Browser(format!("unexpected script result: {e}")))
    }

    /// Close the browser and wait for the process to exit
    async fn shutdown(&mut self) {
        self.page = None;
        if let Some(mut browser) = self.browser.take() {
            if timeout(SHUTDOWN_GRACE, browser.close()).await.is_err() {
                tracing::debug!("Browser did not acknowledge close, killing it");
            }
            match timeout(SHUTDOWN_GRACE, browser.wait()).await {
                Ok(Ok(_)) => {}
                _ => {
                    if let Some(Err(e)) = browser.kill().await {
                        tracing::warn!("Failed to kill browser process: {}", e);
                    }
                }
            }
        }
        if let Some(dialogs) = self.dialogs.take() {
            dialogs.abort();
        }
        self.handler.abort();
    }
}

impl Drop for ChromeBrowser {
    fn drop(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            tracing::debug!("Browser session dropped without close, killing it");
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                rt.spawn(async move {
                    let _ = browser.kill().await;
                    let _ = browser.wait().await;
                });
            }
        }
        if let Some(dialogs) = self.dialogs.take() {
            dialogs.abort();
        }
        self.handler.abort();
    }
}

/// Dismiss every dialog the page opens and remember the last message
async fn dismiss_dialogs(
    page: &Page,
    last_dialog: Arc<Mutex<Option<String>>>,
) -> Result<JoinHandle<()>> {
    let mut dialogs = page
        .event_listener::<EventJavascriptDialogOpening>()
        .await?;
    let page = page.clone();

    Ok(tokio::spawn(async move {
        while let Some(dialog) = dialogs.next().await {
            tracing::debug!("Dismissing {:?} dialog: {}", dialog.r#type, dialog.message);
            let message = dialog.message.clone();
            *last_dialog.lock().unwrap_or_else(|e| e.into_inner()) = Some(message);
            if let Err(e) = page.execute(HandleJavaScriptDialogParams::new(false)).await {
                tracing::debug!("Failed to dismiss dialog: {}", e);
            }
        }
    }))
}
