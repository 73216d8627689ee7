use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use once_cell::sync::Lazy;
use reqwest::{header, Client, Method, RequestBuilder, StatusCode, Url};
use tokio::sync::Semaphore;

use crate::{
    config,
    error::{Error, Result},
    logging,
    util::text::{self, TextEncoding},
};

/// 常見瀏覽器 User-Agent，MOPS 會擋掉非瀏覽器的請求
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A semaphore for limiting concurrent requests.
///
/// The initial number of permits is set to eight times the number of available CPU cores.
static SEMAPHORE: Lazy<Semaphore> = Lazy::new(|| {
    let cpus = num_cpus::get();
    Semaphore::new(cpus * 8)
});

/// 對單一主機限速的 HTTP 抓取器。
///
/// 同一主機的請求之間保持最小間隔（預設 1 秒），
/// 並行的呼叫者以「預約時槽」的方式排隊：
/// 先在鎖內登記自己的起跑時間，再在鎖外睡到該時間，
/// 讓等待不持有鎖，也保證視窗內的請求數量有上界。
///
/// 這一層不做重試；重試策略由服務層決定。
pub struct HttpFetcher {
    client: Client,
    referer: String,
    min_interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HttpFetcher {
    pub fn new(settings: &config::App) -> Result<Self> {
        let client = Client::builder()
            .brotli(true)
            .deflate(true)
            .gzip(true)
            .connect_timeout(Duration::from_secs(3))
            .cookie_store(true)
            .tcp_keepalive(Duration::from_secs(60))
            .pool_max_idle_per_host(32)
            .no_proxy()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(settings.http.timeout_secs))
            .build()
            .map_err(|why| Error::TransientFetch(format!("Failed to create client: {:?}", why)))?;

        Ok(HttpFetcher {
            client,
            referer: settings.mops.base_url.clone(),
            min_interval: Duration::from_millis(settings.http.rate_limit_ms),
            next_slot: Mutex::new(HashMap::new()),
        })
    }

    /// 以自訂間隔建立抓取器，測試用。
    #[cfg(test)]
    pub fn with_interval(settings: &config::App, min_interval: Duration) -> Result<Self> {
        let mut fetcher = Self::new(settings)?;
        fetcher.min_interval = min_interval;
        Ok(fetcher)
    }

    /// HTTP GET，回傳原始位元組。
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.send(Method::GET, url, |rb| rb).await
    }

    /// HTTP GET，依編碼提示解碼內文。
    pub async fn get_text(&self, url: &str, encoding: TextEncoding) -> Result<String> {
        let body = self.get_bytes(url).await?;
        Ok(text::decode_with_fallback(&body, encoding))
    }

    /// HTTP POST（表單），依編碼提示解碼內文。MOPS 的 AJAX 端點都走這條路。
    pub async fn post_form_text(
        &self,
        url: &str,
        params: &HashMap<&str, String>,
        encoding: TextEncoding,
    ) -> Result<String> {
        let body = self.send(Method::POST, url, |rb| rb.form(params)).await?;
        Ok(text::decode_with_fallback(&body, encoding))
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<Vec<u8>> {
        let host = host_of(url)?;
        self.throttle(&host).await;

        let rb = body(self
            .client
            .request(method.clone(), url)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::REFERER, self.referer.as_str()));

        let permit = SEMAPHORE.acquire().await;
        let started_at = Instant::now();
        let response = rb.send().await;
        let elapsed = started_at.elapsed().as_millis();
        drop(permit);

        match response {
            Ok(response) => {
                let status = response.status();
                logging::info_file_async(format!("{method}:{url} {status} {elapsed} ms"));
                self.map_status(status, url)?;

                response
                    .bytes()
                    .await
                    .map(|bytes| bytes.to_vec())
                    .map_err(|why| {
                        Error::TransientFetch(format!("Failed to read body of {}: {:?}", url, why))
                    })
            }
            Err(why) => {
                logging::error_file_async(format!(
                    "{method}:{url} failed because {why}. {elapsed} ms"
                ));
                Err(Error::TransientFetch(format!("{}: {}", url, why)))
            }
        }
    }

    fn map_status(&self, status: StatusCode, url: &str) -> Result<()> {
        if status.is_success() {
            return Ok(());
        }

        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(url.to_string()));
        }

        if status.is_client_error() {
            return Err(Error::Client {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Err(Error::TransientFetch(format!("{}: HTTP {}", url, status)))
    }

    /// 取得同主機的下一個可用時槽並睡到該時間。鎖內只做登記，不等待。
    async fn throttle(&self, host: &str) {
        let wait = {
            let mut slots = self.next_slot.lock().expect("rate-limit clock poisoned");
            let now = Instant::now();
            let slot = match slots.get(host) {
                Some(reserved) if *reserved > now => *reserved,
                _ => now,
            };
            slots.insert(host.to_string(), slot + self.min_interval);
            slot.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

fn host_of(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|why| Error::Client {
            status: 0,
            url: format!("{} ({})", url, why),
        })?;

    Ok(parsed.host_str().unwrap_or_default().to_string())
}
