//! 文本工具：HTML 转义/反转义、空白归一化、文件名清理、感谢语去除。
//!
//! 全部为无状态纯函数，供章节解析、正文格式化和输出模块共用。

use regex::{Captures, Regex};
use std::sync::OnceLock;

/// 晋江正文中夹带的防盗水印。
const WATERMARK: &str = "@无限好文，尽在晋江文学城";

fn re_markup_tag() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"</?\w+[^>]*>").unwrap())
}

fn re_any_tag() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"<.*?>").unwrap())
}

fn re_fullwidth_spaces() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new("　+").unwrap())
}

fn re_spaces() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(" +").unwrap())
}

fn re_entity() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r"&(?:#(\d{1,7})|#[xX]([0-9a-fA-F]{1,6})|([a-zA-Z][a-zA-Z0-9]{1,15}));").unwrap()
    })
}

/// 文案与作品信息里出现过的命名实体。
const NAMED_ENTITIES: &[(&str, char)] = &[
    ("amp", '&'),
    ("lt", '<'),
    ("gt", '>'),
    ("quot", '"'),
    ("apos", '\''),
    ("nbsp", '\u{a0}'),
    ("ensp", '\u{2002}'),
    ("emsp", '\u{2003}'),
    ("thinsp", '\u{2009}'),
    ("zwsp", '\u{200b}'),
    ("hellip", '…'),
    ("mdash", '—'),
    ("ndash", '–'),
    ("middot", '·'),
    ("bull", '•'),
    ("lsquo", '‘'),
    ("rsquo", '’'),
    ("ldquo", '“'),
    ("rdquo", '”'),
    ("laquo", '«'),
    ("raquo", '»'),
    ("lsaquo", '‹'),
    ("rsaquo", '›'),
    ("times", '×'),
    ("divide", '÷'),
    ("plusmn", '±'),
    ("deg", '°'),
    ("copy", '©'),
    ("reg", '®'),
    ("trade", '™'),
    ("yen", '¥'),
    ("cent", '¢'),
    ("pound", '£'),
    ("euro", '€'),
    ("sect", '§'),
    ("para", '¶'),
    ("permil", '‰'),
    ("prime", '′'),
    ("Prime", '″'),
    ("larr", '←'),
    ("rarr", '→'),
    ("uarr", '↑'),
    ("darr", '↓'),
    ("hearts", '♥'),
    ("spades", '♠'),
    ("clubs", '♣'),
    ("diams", '♦'),
    ("star", '☆'),
    ("starf", '★'),
    ("iexcl", '¡'),
    ("iquest", '¿'),
    ("tilde", '˜'),
    ("circ", 'ˆ'),
];

fn named_entity(name: &str) -> Option<char> {
    NAMED_ENTITIES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, c)| *c)
}

fn re_filename_forbidden() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r#"[\\/:*?"<>|]"#).unwrap())
}

// 平台作者有话说里的“一键感谢”模板（营养液、地雷、火箭炮等）。
fn re_thanks() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(concat!(
            r"(感谢灌溉)[\w\W]+(.).*感谢(灌|投|支持).*|",
            r"感谢(在|为).*小天使.*|",
            r".*(扔|投|砸|灌)了.*时间.*|",
            r".*\d瓶.*|",
            r".*(扔|投|砸|灌|谢).*(手榴弹|营养液|地雷|浅水炸弹|深水炸弹|深水鱼雷|火箭炮|投雷|霸王票).*|",
            r"非常感谢.*努力的.*",
        ))
        .unwrap()
    })
}

// ── HTML 转义 ───────────────────────────────────────────────────

/// HTML 转义，并修复接口数据里已转义实体被二次转义的情况。
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out.replace("&amp;amp;", "&amp;")
        .replace("&amp;gt;", "&gt;")
        .replace("&amp;lt;", "&lt;")
        .replace("&amp;#", "&#")
}

/// HTML 反转义：常见命名实体与十进制/十六进制数字实体。
///
/// 无法识别的实体原样保留。
pub fn unescape_html(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    re_entity()
        .replace_all(text, |caps: &Captures| {
            let decoded = if let Some(dec) = caps.get(1) {
                dec.as_str().parse::<u32>().ok().and_then(char::from_u32)
            } else if let Some(hex) = caps.get(2) {
                u32::from_str_radix(hex.as_str(), 16)
                    .ok()
                    .and_then(char::from_u32)
            } else {
                caps.get(3).and_then(|m| named_entity(m.as_str()))
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

// ── 标签与空白 ──────────────────────────────────────────────────

/// 去掉形如 `<b>` / `</font color=...>` 的标记标签。
pub fn strip_markup_tags(text: &str) -> String {
    re_markup_tag().replace_all(text, "").into_owned()
}

/// 去掉任意 `<...>`，用于 XHTML 标题栏等纯文本场景。
pub fn strip_all_tags(text: &str) -> String {
    re_any_tag().replace_all(text, "").into_owned()
}

/// 去水印，并把连续全角/半角空格压成单个半角空格。
pub fn clean_text(text: &str) -> String {
    let text = text.replace(WATERMARK, "");
    let text = re_fullwidth_spaces().replace_all(&text, " ");
    re_spaces().replace_all(&text, " ").into_owned()
}

/// 删除作者有话说中的一键感谢段落。
pub fn remove_thanks_content(text: &str) -> String {
    re_thanks().replace_all(text, "").into_owned()
}

// ── 文件名 ──────────────────────────────────────────────────────

/// 清理文件名中的非法字符。
pub fn sanitize_filename(name: &str) -> String {
    let name = unescape_html(name);
    let replaced = re_filename_forbidden().replace_all(&name, "_");
    let mut cleaned: String = replaced
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string();
    while cleaned.ends_with('.') {
        cleaned.pop();
    }
    if cleaned.is_empty() {
        cleaned.push_str("unnamed");
    }
    cleaned
}

/// 十进制位数，用于章节号补零。
pub fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// 左侧补零到 `width` 位；本身更长时保持原样。
pub fn zero_pad(id: &str, width: usize) -> String {
    format!("{:0>width$}", id, width = width)
}
