//! 全局配置结构（Config）与默认值。
//!
//! `Config` 对应磁盘上的 `config.yml`，同时提供生成注释所需的字段元信息。
//! 一次下载开始前由它构造出不可变的 [`DownloadConfig`] 与 [`ApiSettings`]。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::config::{ConfigError, ConfigSpec, FieldMeta};

pub const DEFAULT_CSS: &str = "nav#landmarks {display:none;}
nav#page-list {display:none;}
ol {list-style-type: none;}
h1{font-size:1.4em;text-align:center;}
h2{font-size:1.24em;text-align:center;}
.title{text-align:center;}
.note{font-size:0.8em;text-align:right;}
body{text-indent:2em;}";

/// 输出格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    #[serde(rename = "txt")]
    Text,
    #[serde(rename = "epub2")]
    PackageV2,
    #[serde(rename = "epub3")]
    PackageV3,
}

impl OutputFormat {
    pub fn is_text(self) -> bool {
        self == OutputFormat::Text
    }

    /// 单章落盘文件的扩展名。
    pub fn chapter_ext(self) -> &'static str {
        if self.is_text() { "txt" } else { "xhtml" }
    }
}

/// 繁简转换方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScriptMode {
    #[default]
    #[serde(rename = "")]
    None,
    /// 繁转简
    #[serde(rename = "s")]
    Simplify,
    /// 简转繁
    #[serde(rename = "t")]
    Traditionalize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 账号
    #[serde(default)]
    pub token: String,

    // 输出
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub state: ScriptMode,
    #[serde(default = "default_thread_num")]
    pub thread_num: usize,

    // 标题与内容
    #[serde(default = "default_true")]
    pub show_number: bool,
    #[serde(default = "default_true")]
    pub show_title: bool,
    #[serde(default = "default_true")]
    pub show_summary: bool,
    #[serde(default = "default_false")]
    pub show_chinfo: bool,
    #[serde(default = "default_false")]
    pub del_thanks: bool,
    #[serde(default = "default_true")]
    pub add_cover: bool,
    #[serde(default = "default_false")]
    pub html_vol: bool,
    #[serde(default = "default_false")]
    pub special_intro: bool,
    #[serde(default)]
    pub custom_title: String,
    #[serde(default)]
    pub custom_vol: String,
    #[serde(default = "default_css")]
    pub css_text: String,

    // 章节范围
    #[serde(default)]
    pub chapter_start: usize,
    #[serde(default)]
    pub chapter_end: usize,
    #[serde(default = "default_false")]
    pub save_per_chapter: bool,
    #[serde(default = "default_false")]
    pub remove_blank_lines: bool,

    // 路径
    #[serde(default)]
    pub save_path: String,
    #[serde(default)]
    pub opencc_path: String,

    // 网络
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_min_wait_time")]
    pub min_wait_time: u64,
    #[serde(default = "default_max_wait_time")]
    pub max_wait_time: u64,
    #[serde(default = "default_version_code")]
    pub version_code: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_web_base")]
    pub web_base: String,
    #[serde(default = "default_content_key")]
    pub content_key: String,
    #[serde(default = "default_content_iv")]
    pub content_iv: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: String::new(),
            format: OutputFormat::default(),
            state: ScriptMode::default(),
            thread_num: default_thread_num(),
            show_number: default_true(),
            show_title: default_true(),
            show_summary: default_true(),
            show_chinfo: default_false(),
            del_thanks: default_false(),
            add_cover: default_true(),
            html_vol: default_false(),
            special_intro: default_false(),
            custom_title: String::new(),
            custom_vol: String::new(),
            css_text: default_css(),
            chapter_start: 0,
            chapter_end: 0,
            save_per_chapter: default_false(),
            remove_blank_lines: default_false(),
            save_path: String::new(),
            opencc_path: String::new(),
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            min_wait_time: default_min_wait_time(),
            max_wait_time: default_max_wait_time(),
            version_code: default_version_code(),
            api_base: default_api_base(),
            web_base: default_web_base(),
            content_key: default_content_key(),
            content_iv: default_content_iv(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 30] = [
            FieldMeta {
                name: "token",
                description: "晋江 App 登录 token（抓包获取），用于读取已购买章节",
            },
            FieldMeta {
                name: "format",
                description: "输出格式, 可选: [txt, epub2, epub3]",
            },
            FieldMeta {
                name: "state",
                description: "繁简转换: '' 不转换, s 繁转简, t 简转繁（需要 opencc）",
            },
            FieldMeta {
                name: "thread_num",
                description: "章节下载并发线程数",
            },
            FieldMeta {
                name: "show_number",
                description: "标题显示章节序号",
            },
            FieldMeta {
                name: "show_title",
                description: "标题显示章节名",
            },
            FieldMeta {
                name: "show_summary",
                description: "标题显示内容提要",
            },
            FieldMeta {
                name: "show_chinfo",
                description: "正文前显示章节字数与更新日期",
            },
            FieldMeta {
                name: "del_thanks",
                description: "去除作者有话说中的一键感谢内容",
            },
            FieldMeta {
                name: "add_cover",
                description: "epub 下载封面",
            },
            FieldMeta {
                name: "html_vol",
                description: "epub 目录中章节嵌套在卷标下",
            },
            FieldMeta {
                name: "special_intro",
                description: "文案使用网页版排版",
            },
            FieldMeta {
                name: "custom_title",
                description: "自定义标题格式，$1 序号 $2 章节名 $3 提要，留空使用默认",
            },
            FieldMeta {
                name: "custom_vol",
                description: "自定义卷标格式，$1 卷序号 $2 卷名，留空使用默认",
            },
            FieldMeta {
                name: "css_text",
                description: "epub 样式表",
            },
            FieldMeta {
                name: "chapter_start",
                description: "起始章节（从 1 开始，0 表示不限制）",
            },
            FieldMeta {
                name: "chapter_end",
                description: "结束章节（包含，0 表示不限制）",
            },
            FieldMeta {
                name: "save_per_chapter",
                description: "按章保存文件（仅 txt）",
            },
            FieldMeta {
                name: "remove_blank_lines",
                description: "去除段间空行（仅 txt）",
            },
            FieldMeta {
                name: "save_path",
                description: "保存路径，留空为当前目录",
            },
            FieldMeta {
                name: "opencc_path",
                description: "opencc 可执行文件路径，留空自动查找",
            },
            FieldMeta {
                name: "request_timeout",
                description: "请求超时时间（秒）",
            },
            FieldMeta {
                name: "max_retries",
                description: "单章最大请求次数（不低于 100）",
            },
            FieldMeta {
                name: "min_wait_time",
                description: "重试最小等待时间, 单位ms",
            },
            FieldMeta {
                name: "max_wait_time",
                description: "重试最大等待时间, 单位ms",
            },
            FieldMeta {
                name: "version_code",
                description: "请求正文时携带的 App 版本号",
            },
            FieldMeta {
                name: "api_base",
                description: "App 接口地址",
            },
            FieldMeta {
                name: "web_base",
                description: "网页版地址",
            },
            FieldMeta {
                name: "content_key",
                description: "正文 DES 密钥（8 字节）",
            },
            FieldMeta {
                name: "content_iv",
                description: "正文 DES 向量（8 字节）",
            },
        ];
        &FIELDS
    }
}

/// 单次下载的不可变配置。
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub token: String,
    pub format: OutputFormat,
    pub script_mode: ScriptMode,
    pub show_number: bool,
    pub show_title: bool,
    pub show_summary: bool,
    pub show_chapter_info: bool,
    pub strip_thanks: bool,
    pub fetch_cover: bool,
    pub html_volume: bool,
    pub source_site_intro: bool,
    pub custom_title: Option<String>,
    pub custom_volume: Option<String>,
    pub worker_count: usize,
    pub chapter_start: usize,
    pub chapter_end: usize,
    pub save_per_chapter: bool,
    pub remove_blank_lines: bool,
    pub css_text: String,
    pub save_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Config::default().to_download_config()
    }
}

/// 接口客户端设置。
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub api_base: String,
    pub web_base: String,
    pub version_code: String,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub content_key: String,
    pub content_iv: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Config::default().api_settings()
    }
}

/// 单章请求次数下限。
pub const MIN_CHAPTER_ATTEMPTS: u32 = 100;

impl Config {
    pub fn default_save_dir(&self) -> PathBuf {
        if self.save_path.trim().is_empty() {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        } else {
            PathBuf::from(&self.save_path)
        }
    }

    /// 校验并构造本次下载使用的配置。
    pub fn download_config(&self) -> Result<DownloadConfig, ConfigError> {
        if self.thread_num == 0 {
            return Err(ConfigError::Validation(
                "thread_num must be > 0".to_string(),
            ));
        }
        if self.chapter_start > 0 && self.chapter_end > 0 && self.chapter_end < self.chapter_start
        {
            return Err(ConfigError::Validation(format!(
                "chapter_end ({}) must not precede chapter_start ({})",
                self.chapter_end, self.chapter_start
            )));
        }

        if !self.format.is_text() && (self.save_per_chapter || self.remove_blank_lines) {
            warn!(target: "config", "save_per_chapter / remove_blank_lines 仅对 txt 生效，已忽略");
        }
        Ok(self.to_download_config())
    }

    fn to_download_config(&self) -> DownloadConfig {
        let is_text = self.format.is_text();
        let non_empty = |s: &str| {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        };

        DownloadConfig {
            token: self.token.trim().to_string(),
            format: self.format,
            script_mode: self.state,
            show_number: self.show_number,
            show_title: self.show_title,
            show_summary: self.show_summary,
            show_chapter_info: self.show_chinfo,
            strip_thanks: self.del_thanks,
            fetch_cover: self.add_cover,
            html_volume: self.html_vol,
            source_site_intro: self.special_intro,
            custom_title: non_empty(&self.custom_title),
            custom_volume: non_empty(&self.custom_vol),
            worker_count: self.thread_num,
            chapter_start: self.chapter_start,
            chapter_end: self.chapter_end,
            save_per_chapter: is_text && self.save_per_chapter,
            remove_blank_lines: is_text && self.remove_blank_lines,
            css_text: self.css_text.clone(),
            save_dir: self.default_save_dir(),
        }
    }

    pub fn api_settings(&self) -> ApiSettings {
        let min_wait = self.min_wait_time.max(1);
        ApiSettings {
            api_base: self.api_base.trim().trim_end_matches('/').to_string(),
            web_base: self.web_base.trim().trim_end_matches('/').to_string(),
            version_code: self.version_code.trim().to_string(),
            request_timeout: Duration::from_secs(self.request_timeout.max(1)),
            max_attempts: self.max_retries.max(MIN_CHAPTER_ATTEMPTS),
            min_wait: Duration::from_millis(min_wait),
            max_wait: Duration::from_millis(self.max_wait_time.max(min_wait)),
            content_key: self.content_key.clone(),
            content_iv: self.content_iv.clone(),
        }
    }
}

fn default_false() -> bool {
    false
}

fn default_true() -> bool {
    true
}

fn default_thread_num() -> usize {
    100
}

fn default_css() -> String {
    DEFAULT_CSS.to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    MIN_CHAPTER_ATTEMPTS
}

fn default_min_wait_time() -> u64 {
    200
}

fn default_max_wait_time() -> u64 {
    5000
}

fn default_version_code() -> String {
    "349".to_string()
}

fn default_api_base() -> String {
    "https://app.jjwxc.net".to_string()
}

fn default_web_base() -> String {
    "http://www.jjwxc.net".to_string()
}

fn default_content_key() -> String {
    "KW8Dvm2N".to_string()
}

fn default_content_iv() -> String {
    "1ae2c94b".to_string()
}
