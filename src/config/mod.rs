use std::{env, path::PathBuf, str::FromStr};

use config::{Config as config_config, File as config_file};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

const CONFIG_PATH: &str = "app.json";

const POSTGRESQL_HOST: &str = "POSTGRESQL_HOST";
const POSTGRESQL_PORT: &str = "POSTGRESQL_PORT";
const POSTGRESQL_USER: &str = "POSTGRESQL_USER";
const POSTGRESQL_PASSWORD: &str = "POSTGRESQL_PASSWORD";
const POSTGRESQL_DB: &str = "POSTGRESQL_DB";
const MOPS_BASE_URL: &str = "MOPS_BASE_URL";
const TAXONOMY_DIR: &str = "TAXONOMY_DIR";

/// 整個服務的設定值，從 app.json 讀取後允許環境變數覆寫。
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct App {
    pub postgresql: PostgreSQL,
    #[serde(default)]
    pub mops: Mops,
    #[serde(default)]
    pub http: Http,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PostgreSQL {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: String,
    /// 連線池上限
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Mops {
    /// MOPS 站台位址
    #[serde(default = "default_mops_base")]
    pub base_url: String,
    /// 本地 taxonomy 快取目錄
    #[serde(default = "default_taxonomy_dir")]
    pub taxonomy_dir: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Http {
    /// 同一主機兩次請求之間的最小間隔（毫秒）
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    /// 單一請求逾時（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_pool_size() -> u32 {
    10
}

fn default_mops_base() -> String {
    "https://mopsov.twse.com.tw".to_string()
}

fn default_taxonomy_dir() -> String {
    "taxonomy".to_string()
}

fn default_rate_limit_ms() -> u64 {
    1_000
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for PostgreSQL {
    fn default() -> Self {
        PostgreSQL {
            host: "localhost".to_string(),
            port: 5432,
            user: String::new(),
            password: String::new(),
            db: String::new(),
            pool_size: default_pool_size(),
        }
    }
}

impl Default for Mops {
    fn default() -> Self {
        Mops {
            base_url: default_mops_base(),
            taxonomy_dir: default_taxonomy_dir(),
        }
    }
}

impl Default for Http {
    fn default() -> Self {
        Http {
            rate_limit_ms: default_rate_limit_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

pub static SETTINGS: Lazy<App> = Lazy::new(|| App::get().expect("Config error"));

impl App {
    fn get() -> Result<Self, config::ConfigError> {
        let config_path = config_path();
        if config_path.exists() {
            let config: App = config_config::builder()
                .add_source(config_file::from(config_path))
                .build()?
                .try_deserialize()?;
            return Ok(config.override_with_env());
        }

        Ok(App::default().override_with_env())
    }

    /// 將來至於 env 的設定值覆蓋掉 json 上的設定值
    fn override_with_env(mut self) -> Self {
        if let Ok(host) = env::var(POSTGRESQL_HOST) {
            self.postgresql.host = host;
        }

        if let Ok(port) = env::var(POSTGRESQL_PORT) {
            self.postgresql.port = i32::from_str(&port).unwrap_or(5432);
        }

        if let Ok(user) = env::var(POSTGRESQL_USER) {
            self.postgresql.user = user;
        }

        if let Ok(password) = env::var(POSTGRESQL_PASSWORD) {
            self.postgresql.password = password;
        }

        if let Ok(db) = env::var(POSTGRESQL_DB) {
            self.postgresql.db = db;
        }

        if let Ok(base_url) = env::var(MOPS_BASE_URL) {
            self.mops.base_url = base_url;
        }

        if let Ok(dir) = env::var(TAXONOMY_DIR) {
            self.mops.taxonomy_dir = dir;
        }

        self
    }
}

/// 回傳設定檔的路徑
fn config_path() -> PathBuf {
    PathBuf::from(CONFIG_PATH)
}
