//! 晋江 App 接口客户端。
//!
//! 负责小说信息、章节列表、单章正文（含解密与重试协议）以及封面下载。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::crypto::{ChapterCipher, DecryptError, DesCipher};
use super::transport::{HttpReply, HttpTransport, ReqwestTransport, TransportError};
use crate::base_system::context::ApiSettings;
use crate::base_system::cooldown_retry::{backoff_delay, sleep_unless_canceled};
use crate::base_system::json_extract::{JsonMap, pick_flag, pick_text};
use crate::download::models::{FetchResult, NovelInfo};

/// 付费章节的固定提示。
const PAYWALL_PATTERN: &str = "用晋江币购买章节后即可阅读";
/// 默认封面所在的静态域名。
const PLACEHOLDER_COVER_HOST: &str = "i9-static.jjwxc.net";
const CANCELED_MESSAGE: &str = "下载已取消";

fn re_paywall() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(PAYWALL_PATTERN).unwrap())
}

fn re_line_break() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"&lt;br\s*/?&gt;|<br\s*/?>").unwrap())
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("http status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected payload: {0}")]
    Payload(&'static str),
    /// 接口返回的小说级错误（书号无效、整本不可见等）
    #[error("{0}")]
    Novel(String),
    #[error("chapter list missing from response")]
    MissingChapterList,
    #[error("web page parse failed: {0}")]
    Html(String),
    #[error(transparent)]
    Decrypt(#[from] DecryptError),
}

/// 单次请求的解析结果。
enum Attempt {
    Success(FetchResult),
    Paywalled(String),
    Transient(String),
}

pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    cipher: Arc<dyn ChapterCipher>,
    settings: ApiSettings,
}

impl ApiClient {
    pub fn new(settings: ApiSettings) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new(settings.request_timeout)?;
        let cipher = DesCipher::new(&settings.content_key, &settings.content_iv)?;
        Ok(Self::with_parts(settings, Arc::new(transport), Arc::new(cipher)))
    }

    pub fn with_parts(
        settings: ApiSettings,
        transport: Arc<dyn HttpTransport>,
        cipher: Arc<dyn ChapterCipher>,
    ) -> Self {
        Self {
            transport,
            cipher,
            settings,
        }
    }

    // ── URL ────────────────────────────────────────────────────────

    pub fn novel_info_url(&self, novel_id: &str) -> String {
        format!(
            "{}/androidapi/novelbasicinfo?novelId={novel_id}",
            self.settings.api_base
        )
    }

    pub fn chapter_list_url(&self, novel_id: &str) -> String {
        format!(
            "{}/androidapi/chapterList?novelId={novel_id}&more=0&whole=1",
            self.settings.api_base
        )
    }

    /// 不含版本号与 token 的正文地址，同时作为章节的唯一标识。
    pub fn chapter_content_url(&self, novel_id: &str, chapter_id: &str) -> String {
        format!(
            "{}/androidapi/chapterContent?novelId={novel_id}&chapterId={chapter_id}",
            self.settings.api_base
        )
    }

    pub fn web_page_url(&self, novel_id: &str) -> String {
        format!("{}/onebook.php?novelid={novel_id}", self.settings.web_base)
    }

    pub fn author_page_url(&self, author_id: &str) -> String {
        format!(
            "{}/oneauthor.php?authorid={author_id}",
            self.settings.web_base
        )
    }

    // ── 小说信息 ───────────────────────────────────────────────────

    /// 拉取小说信息与原始章节列表。
    ///
    /// 信息接口带 `message` 且缺少 `novelIntro` 时视为小说级错误，不再请求章节列表。
    pub fn fetch_novel_info(
        &self,
        novel_id: &str,
        with_web_intro: bool,
    ) -> Result<(NovelInfo, Vec<JsonMap>), ApiError> {
        let info_url = self.novel_info_url(novel_id);
        let payload = self.get_json_object(&info_url)?;

        if payload.contains_key("message") && !payload.contains_key("novelIntro") {
            let message = pick_text(&payload, "message").unwrap_or_default();
            return Err(ApiError::Novel(message));
        }

        let mut info = NovelInfo::from_payload(novel_id, payload);
        debug!(target: "api", novel_id, title = %info.title, "小说信息获取成功");

        let list_payload = self.get_json_object(&self.chapter_list_url(novel_id))?;
        let chapters: Vec<JsonMap> = match list_payload.get("chapterlist") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_object().cloned())
                .collect(),
            _ => return Err(ApiError::MissingChapterList),
        };

        if with_web_intro {
            match self.fetch_web_intro(novel_id) {
                Ok(fragment) => info.web_intro = fragment,
                Err(err) => {
                    warn!(target: "api", error = %err, "网页文案获取失败，改用接口文案");
                }
            }
        }

        Ok((info, chapters))
    }

    fn get_json_object(&self, url: &str) -> Result<JsonMap, ApiError> {
        let reply = self.transport.get(url)?;
        match serde_json::from_slice::<Value>(&reply.body) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ApiError::Payload("expected a json object")),
            Err(_) if !reply.is_success() => Err(ApiError::Status {
                status: reply.status,
                url: url.to_string(),
            }),
            Err(err) => Err(ApiError::Json(err)),
        }
    }

    /// 网页版（GB18030）中 `#novelintro` 的 HTML 片段。
    pub fn fetch_web_intro(&self, novel_id: &str) -> Result<Option<String>, ApiError> {
        let url = self.web_page_url(novel_id);
        let reply = self.transport.get(&url)?;
        if !reply.is_success() {
            return Err(ApiError::Status {
                status: reply.status,
                url,
            });
        }
        let (text, _, _) = encoding_rs::GB18030.decode(&reply.body);
        let document = Html::parse_document(&text);
        let selector =
            Selector::parse("#novelintro").map_err(|err| ApiError::Html(err.to_string()))?;
        Ok(document.select(&selector).next().map(|el| el.html()))
    }

    // ── 正文 ───────────────────────────────────────────────────────

    /// 拉取并解密单章，直到成功、遇到付费提示、次数耗尽或被取消。
    ///
    /// 失败时 `content` 为空，`message` 保留最后一次的原始提示。
    pub fn fetch_chapter_content(&self, url: &str, token: &str, cancel: &AtomicBool) -> FetchResult {
        let full_url = format!(
            "{url}&versionCode={}&token={token}",
            self.settings.version_code
        );
        let max_attempts = self.settings.max_attempts.max(1);
        let mut last_message = String::new();

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay =
                    backoff_delay(self.settings.min_wait, self.settings.max_wait, attempt - 1);
                if !sleep_unless_canceled(delay, cancel) {
                    return canceled_result(attempt);
                }
            }
            if cancel.load(Ordering::Relaxed) {
                return canceled_result(attempt);
            }

            match self.attempt_chapter(&full_url) {
                Attempt::Success(mut result) => {
                    result.attempts = attempt + 1;
                    return result;
                }
                Attempt::Paywalled(message) => {
                    debug!(target: "api", url, "章节需购买");
                    return FetchResult {
                        message,
                        attempts: attempt + 1,
                        ..FetchResult::default()
                    };
                }
                Attempt::Transient(message) => {
                    debug!(target: "api", url, attempt = attempt + 1, %message, "章节请求失败，准备重试");
                    last_message = message;
                }
            }
        }

        warn!(target: "api", url, attempts = max_attempts, "章节重试次数耗尽");
        FetchResult {
            message: last_message,
            attempts: max_attempts,
            ..FetchResult::default()
        }
    }

    fn attempt_chapter(&self, full_url: &str) -> Attempt {
        let reply = match self.transport.get(full_url) {
            Ok(reply) => reply,
            Err(err) => return Attempt::Transient(err.to_string()),
        };
        let envelope = match self.parse_envelope(&reply) {
            Ok(map) => map,
            Err(err) => return Attempt::Transient(err.to_string()),
        };

        if envelope.contains_key("message") {
            let message = pick_text(&envelope, "message").unwrap_or_default();
            return if re_paywall().is_match(&message) {
                Attempt::Paywalled(message)
            } else {
                Attempt::Transient(message)
            };
        }

        let Some(encrypted) = pick_text(&envelope, "content") else {
            return Attempt::Transient("chapter content missing".to_string());
        };
        let content = match self.cipher.decrypt_field(&encrypted) {
            Ok(text) => re_line_break().replace_all(&text, "\n").into_owned(),
            Err(err) => return Attempt::Transient(err.to_string()),
        };

        Attempt::Success(FetchResult {
            content,
            note: pick_text(&envelope, "sayBody").unwrap_or_default(),
            note_after_body: pick_flag(&envelope, "upDown"),
            message: String::new(),
            size: pick_text(&envelope, "chapterSize").unwrap_or_default(),
            date: pick_text(&envelope, "chapterDate").unwrap_or_default(),
            attempts: 0,
        })
    }

    /// 先按明文 JSON 解析，失败再整体解密后解析。
    fn parse_envelope(&self, reply: &HttpReply) -> Result<JsonMap, ApiError> {
        let value = match serde_json::from_slice::<Value>(&reply.body) {
            Ok(value) => value,
            Err(_) => {
                let plain = self.cipher.decrypt_envelope(reply)?;
                serde_json::from_str(plain.trim())?
            }
        };
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(ApiError::Payload("chapter envelope is not an object")),
        }
    }

    // ── 封面 ───────────────────────────────────────────────────────

    /// 下载封面；默认封面、空地址或任何网络错误都返回 `None`。
    pub fn download_cover(&self, url: &str) -> Option<Vec<u8>> {
        let url = url.trim();
        if url.is_empty() || url.contains(PLACEHOLDER_COVER_HOST) {
            return None;
        }
        match self.transport.get(url) {
            Ok(reply) if reply.is_success() && !reply.body.is_empty() => Some(reply.body),
            Ok(reply) => {
                debug!(target: "api", url, status = reply.status, "封面下载失败");
                None
            }
            Err(err) => {
                debug!(target: "api", url, error = %err, "封面下载失败");
                None
            }
        }
    }
}

fn canceled_result(attempts: u32) -> FetchResult {
    FetchResult {
        message: CANCELED_MESSAGE.to_string(),
        attempts,
        ..FetchResult::default()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::network_parser::crypto::tests::{TEST_IV, TEST_KEY, encrypt_b64, envelope_reply};
    use crate::network_parser::transport::tests::ScriptedTransport;
    use std::time::Duration;

    pub(crate) const API: &str = "https://app.test";

    pub(crate) fn test_settings() -> ApiSettings {
        ApiSettings {
            api_base: API.to_string(),
            web_base: "http://web.test".to_string(),
            version_code: "349".to_string(),
            request_timeout: Duration::from_secs(1),
            max_attempts: 100,
            min_wait: Duration::ZERO,
            max_wait: Duration::ZERO,
            content_key: TEST_KEY.to_string(),
            content_iv: TEST_IV.to_string(),
        }
    }

    pub(crate) fn client(transport: ScriptedTransport) -> (ApiClient, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let cipher = DesCipher::new(TEST_KEY, TEST_IV).unwrap();
        let client = ApiClient::with_parts(test_settings(), transport.clone(), Arc::new(cipher));
        (client, transport)
    }

    /// 明文信封、`content` 字段加密的成功响应。
    pub(crate) fn content_reply(body: &str, note: &str, up_down: Value) -> HttpReply {
        let content = encrypt_b64(TEST_KEY.as_bytes(), TEST_IV.as_bytes(), body);
        let json = serde_json::json!({
            "content": content,
            "sayBody": note,
            "upDown": up_down,
            "chapterSize": "3000",
            "chapterDate": "2024-01-01 12:00:00",
        });
        HttpReply::ok(json.to_string())
    }

    pub(crate) fn message_reply(message: &str) -> HttpReply {
        HttpReply::ok(serde_json::json!({ "message": message }).to_string())
    }

    pub(crate) fn paywall_message() -> String {
        format!("该章节为VIP章节，{PAYWALL_PATTERN}")
    }

    #[test]
    fn success_decrypts_and_converts_breaks() {
        let (api, _) = client(
            ScriptedTransport::new().route("chapterId=1&", content_reply("一&lt;br&gt;二", "谢谢", Value::from(1))),
        );
        let url = api.chapter_content_url("9", "1");
        let res = api.fetch_chapter_content(&url, "tok", &AtomicBool::new(false));
        assert_eq!(res.content, "一\n二");
        assert_eq!(res.note, "谢谢");
        assert!(res.note_after_body);
        assert_eq!(res.size, "3000");
        assert_eq!(res.attempts, 1);
        assert!(!res.is_failure());
    }

    #[test]
    fn request_carries_version_and_token() {
        let (api, transport) =
            client(ScriptedTransport::new().route("chapterId=2&", content_reply("x", "", Value::from(0))));
        let url = api.chapter_content_url("9", "2");
        api.fetch_chapter_content(&url, "abc", &AtomicBool::new(false));
        assert_eq!(transport.calls_matching("&versionCode=349&token=abc"), 1);
    }

    #[test]
    fn transient_errors_retry_until_success() {
        let (api, transport) = client(
            ScriptedTransport::new()
                .route("chapterId=3&", message_reply("502 Bad Gateway"))
                .route_err("chapterId=3&", "connection reset")
                .route("chapterId=3&", HttpReply::ok("not json and no headers"))
                .route("chapterId=3&", content_reply("正文", "", Value::from("0"))),
        );
        let url = api.chapter_content_url("9", "3");
        let res = api.fetch_chapter_content(&url, "", &AtomicBool::new(false));
        assert_eq!(res.content, "正文");
        assert!(!res.note_after_body);
        assert_eq!(res.attempts, 4);
        assert_eq!(transport.calls_matching("chapterId=3&"), 4);
    }

    #[test]
    fn paywall_terminates_immediately() {
        let msg = paywall_message();
        let (api, transport) = client(
            ScriptedTransport::new()
                .route("chapterId=4&", message_reply("server busy"))
                .route("chapterId=4&", message_reply(&msg)),
        );
        let url = api.chapter_content_url("9", "4");
        let res = api.fetch_chapter_content(&url, "", &AtomicBool::new(false));
        assert!(res.is_failure());
        assert_eq!(res.message, msg);
        assert_eq!(res.attempts, 2);
        assert_eq!(transport.calls_matching("chapterId=4&"), 2);
    }

    #[test]
    fn exhausted_retries_keep_last_message() {
        let (api, transport) =
            client(ScriptedTransport::new().route("chapterId=5&", message_reply("gateway timeout")));
        let url = api.chapter_content_url("9", "5");
        let res = api.fetch_chapter_content(&url, "", &AtomicBool::new(false));
        assert!(res.is_failure());
        assert_eq!(res.message, "gateway timeout");
        assert_eq!(res.attempts, 100);
        assert_eq!(transport.calls_matching("chapterId=5&"), 100);
    }

    #[test]
    fn encrypted_envelope_is_decrypted_first() {
        let field = encrypt_b64(TEST_KEY.as_bytes(), TEST_IV.as_bytes(), "整体加密的正文");
        let json = serde_json::json!({ "content": field, "sayBody": "", "upDown": 0 }).to_string();
        let (api, _) = client(
            ScriptedTransport::new().route("chapterId=6&", envelope_reply("k1", "KEYSTRINGVALUE", &json)),
        );
        let url = api.chapter_content_url("9", "6");
        let res = api.fetch_chapter_content(&url, "", &AtomicBool::new(false));
        assert_eq!(res.content, "整体加密的正文");
    }

    #[test]
    fn canceled_before_first_attempt() {
        let (api, transport) =
            client(ScriptedTransport::new().route("chapterId=7&", message_reply("busy")));
        let url = api.chapter_content_url("9", "7");
        let res = api.fetch_chapter_content(&url, "", &AtomicBool::new(true));
        assert!(res.is_failure());
        assert_eq!(res.message, CANCELED_MESSAGE);
        assert_eq!(transport.calls_matching("chapterId=7&"), 0);
    }

    #[test]
    fn novel_level_error_skips_chapter_list() {
        let (api, transport) = client(
            ScriptedTransport::new()
                .route("novelbasicinfo", message_reply("该文章不存在"))
                .route("chapterList", HttpReply::ok(r#"{"chapterlist":[]}"#)),
        );
        let err = api.fetch_novel_info("1", false).unwrap_err();
        assert_eq!(err.to_string(), "该文章不存在");
        assert_eq!(transport.calls_matching("chapterList"), 0);
    }

    #[test]
    fn novel_info_with_message_and_intro_is_ok() {
        let (api, _) = client(
            ScriptedTransport::new()
                .route(
                    "novelbasicinfo",
                    HttpReply::ok(r#"{"novelName":"书","authorName":"甲","novelIntro":"简介","message":""}"#),
                )
                .route(
                    "chapterList",
                    HttpReply::ok(r#"{"chapterlist":[{"chapterid":"1","chaptername":"一"},"junk"]}"#),
                ),
        );
        let (info, list) = api.fetch_novel_info("1", false).unwrap();
        assert_eq!(info.title, "书");
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn missing_chapter_list_is_an_error() {
        let (api, _) = client(
            ScriptedTransport::new()
                .route("novelbasicinfo", HttpReply::ok(r#"{"novelName":"书","novelIntro":""}"#))
                .route("chapterList", HttpReply::ok(r#"{"other":1}"#)),
        );
        assert!(matches!(
            api.fetch_novel_info("1", false),
            Err(ApiError::MissingChapterList)
        ));
    }

    #[test]
    fn web_intro_decoded_from_gb18030() {
        let page = "<html><body><div id=\"novelintro\">第一行<br>第二行</div></body></html>";
        let (encoded, _, _) = encoding_rs::GB18030.encode(page);
        let (api, _) = client(
            ScriptedTransport::new()
                .route("novelbasicinfo", HttpReply::ok(r#"{"novelName":"书","novelIntro":""}"#))
                .route("chapterList", HttpReply::ok(r#"{"chapterlist":[]}"#))
                .route("onebook.php", HttpReply::ok(encoded.into_owned())),
        );
        let (info, _) = api.fetch_novel_info("1", true).unwrap();
        let intro = info.web_intro.unwrap();
        assert!(intro.contains("novelintro"));
        assert!(intro.contains("第一行"));
    }

    #[test]
    fn web_intro_failure_is_not_fatal() {
        let (api, _) = client(
            ScriptedTransport::new()
                .route("novelbasicinfo", HttpReply::ok(r#"{"novelName":"书","novelIntro":""}"#))
                .route("chapterList", HttpReply::ok(r#"{"chapterlist":[]}"#))
                .route_err("onebook.php", "dns failure"),
        );
        let (info, _) = api.fetch_novel_info("1", true).unwrap();
        assert!(info.web_intro.is_none());
    }

    #[test]
    fn cover_skips_placeholders_and_errors() {
        let (api, _) = client(
            ScriptedTransport::new()
                .route("cover.jpg", HttpReply::ok(vec![1u8, 2, 3]))
                .route_err("broken.jpg", "timeout"),
        );
        assert_eq!(api.download_cover("http://img.test/cover.jpg"), Some(vec![1, 2, 3]));
        assert!(api.download_cover("http://i9-static.jjwxc.net/default.jpg").is_none());
        assert!(api.download_cover("").is_none());
        assert!(api.download_cover("http://img.test/broken.jpg").is_none());
    }
}
