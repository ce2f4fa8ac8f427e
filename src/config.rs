use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub struct BlogConfig {
    #[serde(default)]
    pub site: SiteInfo,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub comments: CommentConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize)]
pub struct SiteInfo {
    #[serde(default = "default_title")]
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_jwt_expires_in")]
    pub jwt_expires_in: String,
}

#[derive(Debug, Deserialize)]
pub struct CommentConfig {
    /// 包含任一敏感词的评论自动进入人工审核队列
    #[serde(default)]
    pub spam_keywords: Vec<String>,
    /// 同一 IP 两次评论之间的最小间隔（秒）
    #[serde(default = "default_rate_limit_seconds")]
    pub rate_limit_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

impl BlogConfig {
    /// 加载 nextblog.toml；文件不存在时使用全默认配置，解析失败才报错
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join("nextblog.toml");
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("读取 nextblog.toml 失败：{}", e))?;
        let config: BlogConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("解析 nextblog.toml 失败：{}", e))?;
        Ok(config)
    }
}

// 默认值函数
fn default_title() -> String { "nextblog".into() }
fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 3000 }
fn default_log_level() -> String { "info".into() }
fn default_jwt_secret() -> String { "CHANGE_ME_IN_PRODUCTION".into() }
fn default_jwt_expires_in() -> String { "7d".into() }
fn default_rate_limit_seconds() -> u64 { 60 }
fn default_page_size() -> u32 { 10 }
fn default_max_page_size() -> u32 { 100 }

impl Default for SiteInfo {
    fn default() -> Self {
        Self {
            title: default_title(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            jwt_expires_in: default_jwt_expires_in(),
        }
    }
}

impl Default for CommentConfig {
    fn default() -> Self {
        Self {
            spam_keywords: Vec::new(),
            rate_limit_seconds: default_rate_limit_seconds(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}
