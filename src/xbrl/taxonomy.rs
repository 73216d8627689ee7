//! Taxonomy 解析與本地快取。
//!
//! Instance 文件以 schemaRef 指向 MOPS 上的 taxonomy 檔。
//! 這裡把遠端引用改寫到本地快取目錄，缺檔時經由 C2 下載一次；
//! 同一 URL 的並行請求共用一次下載（per-URL 鎖）。
//! 任何一步失敗都不中斷解析，回傳到目前為止累積的 linkbase 集合。

use std::{path::PathBuf, sync::Arc};

use hashbrown::HashMap;
use once_cell::sync::Lazy;
use quick_xml::{events::Event, Reader};
use regex::Regex;
use reqwest::Url;
use tokio::sync::Mutex;

use crate::{
    config,
    error::{Error, Result},
    logging,
    util::http::HttpFetcher,
    xbrl::{linkbase, CalculationLinkbase, LabelSet, PresentationLinkbase},
};

static SCHEMA_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href="([^"]+\.xsd)""#).expect("schema ref pattern"));

/// 從 instance 內文找出 schemaRef 指到的 .xsd 引用
pub fn schema_refs(content: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(content);
    let mut refs: Vec<String> = SCHEMA_REF
        .captures_iter(&text)
        .map(|captures| captures[1].to_string())
        .collect();
    refs.sort();
    refs.dedup();
    refs
}

/// 解析出的最佳努力 linkbase 集合
#[derive(Debug, Default)]
pub struct TaxonomyLinkbases {
    pub calculation: CalculationLinkbase,
    pub presentation: PresentationLinkbase,
    pub labels: LabelSet,
}

pub struct TaxonomyResolver {
    fetcher: Arc<HttpFetcher>,
    base_url: String,
    cache_dir: PathBuf,
    /// URL → 本地路徑的記憶體索引
    index: Mutex<HashMap<String, PathBuf>>,
    /// 同一 URL 共用一次下載
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TaxonomyResolver {
    pub fn new(fetcher: Arc<HttpFetcher>, settings: &config::App) -> Self {
        TaxonomyResolver {
            fetcher,
            base_url: settings.mops.base_url.clone(),
            cache_dir: PathBuf::from(&settings.mops.taxonomy_dir),
            index: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// 依 schema 引用組出 linkbase 集合。
    ///
    /// 逐一處理每個 schema：取得本地複本 → 讀出 linkbaseRef →
    /// 下載並解析各 linkbase 檔。個別失敗記警告後跳過。
    pub async fn resolve_linkbases(&self, refs: &[String]) -> TaxonomyLinkbases {
        let mut resolved = TaxonomyLinkbases::default();

        for schema_ref in refs {
            let schema_url = match self.absolute_url(schema_ref, None) {
                Ok(url) => url,
                Err(why) => {
                    logging::warn_file_async(format!(
                        "Skipping unresolvable schema ref {}: {}",
                        schema_ref, why
                    ));
                    continue;
                }
            };

            let schema_bytes = match self.ensure_file(&schema_url).await {
                Ok(bytes) => bytes,
                Err(why) => {
                    logging::warn_file_async(format!(
                        "Taxonomy schema {} unavailable: {}",
                        schema_url, why
                    ));
                    continue;
                }
            };

            for href in linkbase_refs(&schema_bytes) {
                let linkbase_url = match self.absolute_url(&href, Some(&schema_url)) {
                    Ok(url) => url,
                    Err(why) => {
                        logging::warn_file_async(format!(
                            "Skipping unresolvable linkbase ref {}: {}",
                            href, why
                        ));
                        continue;
                    }
                };

                let content = match self.ensure_file(&linkbase_url).await {
                    Ok(bytes) => bytes,
                    Err(why) => {
                        logging::warn_file_async(format!(
                            "Taxonomy linkbase {} unavailable: {}",
                            linkbase_url, why
                        ));
                        continue;
                    }
                };

                let lower = linkbase_url.to_lowercase();
                let parsed: Result<()> = if lower.ends_with("_cal.xml") {
                    linkbase::parse_calculation(&content)
                        .map(|linkbase| resolved.calculation.merge(linkbase))
                } else if lower.ends_with("_pre.xml") {
                    linkbase::parse_presentation(&content)
                        .map(|linkbase| resolved.presentation.merge(linkbase))
                } else if lower.ends_with("_lab.xml") {
                    linkbase::parse_labels(&content).map(|labels| resolved.labels.merge(labels))
                } else {
                    Ok(())
                };

                if let Err(why) = parsed {
                    logging::warn_file_async(format!(
                        "Failed to parse taxonomy linkbase {}: {}",
                        linkbase_url, why
                    ));
                }
            }
        }

        resolved
    }

    /// 取得 URL 的本地複本；缺檔時下載一次並寫入快取目錄。
    async fn ensure_file(&self, url: &str) -> Result<Vec<u8>> {
        let lock = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(url.to_string()).or_default())
        };
        let _guard = lock.lock().await;

        if let Some(path) = self.index.lock().await.get(url) {
            if let Ok(bytes) = tokio::fs::read(path).await {
                return Ok(bytes);
            }
        }

        let path = self.local_path(url)?;
        if let Ok(bytes) = tokio::fs::read(&path).await {
            self.index.lock().await.insert(url.to_string(), path);
            return Ok(bytes);
        }

        let bytes = self
            .fetcher
            .get_bytes(url)
            .await
            .map_err(|why| Error::Taxonomy(format!("{}: {}", url, why)))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|why| Error::Taxonomy(format!("create {}: {}", parent.display(), why)))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|why| Error::Taxonomy(format!("write {}: {}", path.display(), why)))?;

        self.index.lock().await.insert(url.to_string(), path);
        Ok(bytes)
    }

    /// 以 URL 的 path 當作快取目錄內的相對路徑
    fn local_path(&self, url: &str) -> Result<PathBuf> {
        let parsed =
            Url::parse(url).map_err(|why| Error::Taxonomy(format!("{}: {}", url, why)))?;

        let mut path = self.cache_dir.clone();
        for segment in parsed.path_segments().into_iter().flatten() {
            if segment.is_empty() || segment == ".." {
                continue;
            }
            path.push(segment);
        }

        Ok(path)
    }

    /// 相對引用解析：優先以所屬 schema 的位置為基準，
    /// 否則落到 MOPS 的 taxonomy 根目錄。
    fn absolute_url(&self, reference: &str, base: Option<&str>) -> Result<String> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Ok(reference.to_string());
        }

        if let Some(base) = base {
            let parsed =
                Url::parse(base).map_err(|why| Error::Taxonomy(format!("{}: {}", base, why)))?;
            let joined = parsed
                .join(reference)
                .map_err(|why| Error::Taxonomy(format!("{}: {}", reference, why)))?;
            return Ok(joined.to_string());
        }

        Ok(format!(
            "{}/nas/taxonomy/{}",
            self.base_url.trim_end_matches('/'),
            reference.trim_start_matches('/')
        ))
    }
}

/// 從 schema 檔讀出 linkbaseRef 的 href 清單
fn linkbase_refs(schema: &[u8]) -> Vec<String> {
    let mut refs = Vec::new();
    let mut reader = Reader::from_reader(schema);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let name = e.name();
                let local = name.as_ref();
                let is_linkbase_ref = local
                    .iter()
                    .rposition(|b| *b == b':')
                    .map(|position| &local[position + 1..])
                    .unwrap_or(local)
                    == b"linkbaseRef";

                if is_linkbase_ref {
                    for attribute in e.attributes().flatten() {
                        let key = attribute.key.as_ref();
                        let key_local = key
                            .iter()
                            .rposition(|b| *b == b':')
                            .map(|position| &key[position + 1..])
                            .unwrap_or(key);
                        if key_local == b"href" {
                            if let Ok(value) = attribute.unescape_value() {
                                refs.push(value.to_string());
                            }
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    refs
}
