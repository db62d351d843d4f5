use crate::scrapers::traits::{PageSession, SessionFactory};
use crate::scrapers::types::ElementMatch;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const OUTER_HTML: &str = "document.documentElement.outerHTML";
const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight); true";

/// Chrome launch settings
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: String,
    /// Upper bound for every single CDP call
    pub call_timeout: Duration,
}

/// One headless Chrome process; each session gets its own tab.
pub struct ChromeBrowser {
    browser: Browser,
    options: BrowserOptions,
}

impl ChromeBrowser {
    pub fn launch(options: BrowserOptions) -> Result<Self> {
        info!(headless = options.headless, "Launching headless Chrome...");

        let launch = LaunchOptions::default_builder()
            .headless(options.headless)
            .window_size(Some((options.window_width, options.window_height)))
            .idle_browser_timeout(Duration::from_secs(600))
            .build()
            .context("Failed to build launch options")?;

        let browser = Browser::new(launch).context("Failed to launch Chrome browser")?;
        Ok(Self { browser, options })
    }
}

#[async_trait]
impl SessionFactory for ChromeBrowser {
    async fn open(&self) -> Result<Box<dyn PageSession>> {
        let browser = self.browser.clone();
        let options = self.options.clone();
        let tab = tokio::task::spawn_blocking(move || -> Result<Arc<Tab>> {
            let tab = browser.new_tab().context("Failed to open browser tab")?;
            tab.set_default_timeout(options.call_timeout);
            tab.set_user_agent(&options.user_agent, None, None)
                .context("Failed to set user agent")?;
            Ok(tab)
        })
        .await
        .context("Browser task panicked")??;
        debug!("Opened browser tab");
        Ok(Box::new(ChromeSession { tab, closed: false }))
    }
}

/// A single Chrome tab driven through blocking CDP calls on the blocking pool
pub struct ChromeSession {
    tab: Arc<Tab>,
    closed: bool,
}

impl ChromeSession {
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tab) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .context("Browser task panicked")?
    }

    async fn evaluate_string(&self, js: &'static str) -> Result<String> {
        self.blocking(move |tab| {
            let result = tab.evaluate(js, false)?;
            result
                .value
                .as_ref()
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| anyhow!("Page returned no HTML"))
        })
        .await
    }
}

#[async_trait]
impl PageSession for ChromeSession {
    async fn render(&mut self, url: &str) -> Result<String> {
        let target = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&target)?.wait_until_navigated()?;
            Ok(())
        })
        .await
        .with_context(|| format!("Navigation to {url} failed"))?;
        self.evaluate_string(OUTER_HTML).await
    }

    async fn snapshot(&mut self) -> Result<String> {
        self.evaluate_string(OUTER_HTML).await
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool> {
        let selector = selector.to_string();
        self.blocking(move |tab| Ok(tab.wait_for_element_with_custom_timeout(&selector, timeout).is_ok()))
            .await
    }

    async fn scroll_to_bottom(&mut self) -> Result<()> {
        self.blocking(|tab| {
            tab.evaluate(SCROLL_TO_BOTTOM, false)?;
            Ok(())
        })
        .await
    }

    async fn click(&mut self, target: &ElementMatch) -> Result<bool> {
        let script = click_script(target)?;
        self.blocking(move |tab| {
            let result = tab.evaluate(&script, false)?;
            Ok(result.value.as_ref().and_then(|v| v.as_bool()).unwrap_or(false))
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.blocking(|tab| {
            tab.close(false)?;
            Ok(())
        })
        .await
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Browser tab dropped without close, closing in background");
            let tab = Arc::clone(&self.tab);
            std::thread::spawn(move || {
                let _ = tab.close(false);
            });
        }
    }
}

/// JavaScript that clicks the first element satisfying `target` and reports
/// whether it did.
fn click_script(target: &ElementMatch) -> Result<String> {
    let spec = serde_json::to_string(target).context("Failed to encode click target")?;
    Ok(format!(
        r#"(() => {{
  const spec = {spec};
  const candidates = [];
  for (const sel of spec.selectors) {{
    try {{ document.querySelectorAll(sel).forEach(el => candidates.push(el)); }} catch (e) {{}}
  }}
  for (const tag of spec.tags) {{
    document.querySelectorAll(tag).forEach(el => candidates.push(el));
  }}
  const height = document.body ? document.body.scrollHeight : 0;
  const seen = new Set();
  for (const el of candidates) {{
    if (seen.has(el)) continue;
    seen.add(el);
    const text = (el.innerText || el.textContent || '').trim().toLowerCase();
    if (!spec.allow_links && el.tagName === 'A') {{
      const href = (el.getAttribute('href') || '').trim();
      if (href && href !== '#' && !href.startsWith('javascript')) continue;
    }}
    if (spec.exclude.some(p => text.includes(p))) continue;
    if (spec.phrases.length) {{
      if (!text || text.length > spec.max_text_len) continue;
      if (!spec.phrases.some(p => text.includes(p))) continue;
    }}
    if (spec.max_vertical_fraction !== null && height > 0) {{
      const top = el.getBoundingClientRect().top + window.scrollY;
      if (top > height * spec.max_vertical_fraction) continue;
    }}
    try {{
      el.scrollIntoView({{block: 'center'}});
      el.click();
      return true;
    }} catch (e) {{}}
  }}
  return false;
}})()"#
    ))
}
