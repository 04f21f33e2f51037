//! 作品信息页（书名、作者、类型、文案、标签、被锁章节）。

use std::sync::OnceLock;

use regex::Regex;

use crate::base_system::context::DownloadConfig;
use crate::base_system::json_extract::pick_text;
use crate::base_system::script_convert::ScriptConverter;
use crate::base_system::text_utils::{escape_html, strip_all_tags, unescape_html};
use crate::download::models::NovelInfo;

fn re_intro_break() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?i)&lt;br\s*/?&gt;|<br\s*/?>").unwrap())
}

fn re_void_tag() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?i)<(br|hr|img)([^>]*?)\s*/?>").unwrap())
}

fn re_spaces() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r" +").unwrap())
}

/// 渲染信息页：txt 为完整文本，epub 为 `<body>` 内的 XHTML 片段。
pub fn render_info_page(
    info: &NovelInfo,
    source_url: &str,
    author_url: &str,
    cfg: &DownloadConfig,
    conv: &dyn ScriptConverter,
) -> String {
    let use_web_intro = cfg.source_site_intro && info.web_intro.is_some();
    if cfg.format.is_text() {
        render_text(info, source_url, use_web_intro, conv)
    } else {
        render_xhtml(info, source_url, author_url, use_web_intro, conv)
    }
}

fn detail_lines(info: &NovelInfo) -> [String; 5] {
    [
        format!("文章类型：{}", info.field("novelClass")),
        format!("作品视角：{}", info.field("mainview")),
        format!("作品风格：{}", info.field("novelStyle")),
        format!("所属系列：{}", info.field("series")),
        format!("全文字数：{}字", info.field("novelSize")),
    ]
}

fn intro_lines(info: &NovelInfo) -> Vec<String> {
    let intro = pick_raw(info, "novelIntro");
    re_intro_break()
        .replace_all(&intro, "\n")
        .lines()
        .map(|l| re_spaces().replace_all(l, " ").into_owned())
        .collect()
}

// 文案保留首尾空白
fn pick_raw(info: &NovelInfo, key: &str) -> String {
    pick_text(&info.raw, key).unwrap_or_default()
}

fn compact_detail(line: &str) -> String {
    re_spaces()
        .replace_all(&line.trim().replace('\n', ""), "")
        .into_owned()
}

fn render_text(
    info: &NovelInfo,
    source_url: &str,
    use_web_intro: bool,
    conv: &dyn ScriptConverter,
) -> String {
    let mut page = format!(
        "{}\n作者：{}\n源网址：{}\n",
        info.title, info.author, source_url
    );
    for line in detail_lines(info) {
        page.push_str(&unescape_html(&compact_detail(&line)));
        page.push('\n');
    }

    page.push_str("文案：\n");
    match info.web_intro.as_deref().filter(|_| use_web_intro) {
        Some(fragment) => {
            let text = strip_all_tags(&re_intro_break().replace_all(fragment, "\n"));
            for line in unescape_html(&text).lines() {
                let line = line.trim();
                if !line.is_empty() {
                    page.push_str(line);
                    page.push('\n');
                }
            }
        }
        None => {
            for line in intro_lines(info) {
                page.push_str(&unescape_html(&line));
                page.push('\n');
            }
        }
    }

    let extras = [
        format!("标签：{}", info.field("novelTags")),
        info.field("protagonist"),
        info.field("costar"),
        info.field("other"),
        format!("简介：{}", info.field("novelIntroShort")),
    ];
    for line in extras {
        page.push_str(&strip_all_tags(&unescape_html(&line)));
        page.push('\n');
    }

    let mut out = conv.convert(&page).trim().to_string();
    out.push('\n');
    if !info.locked_chapters.is_empty() {
        let lock = format!("被锁章节：{}", info.locked_chapters.join(" "));
        out.push_str(conv.convert(&lock).trim());
        out.push('\n');
    }
    out
}

fn render_xhtml(
    info: &NovelInfo,
    source_url: &str,
    author_url: &str,
    use_web_intro: bool,
    conv: &dyn ScriptConverter,
) -> String {
    let title = escape_html(&info.title);
    let author = escape_html(&info.author);
    let mut page = format!(
        "<h1 class='title' title='{title}-{author}'><a href='{}'>{title}</a></h1>",
        escape_html(source_url)
    );
    page.push_str(&format!(
        "<h2 class='sigil_not_in_toc title'>作者：<a href='{}'>{author}</a></h2>",
        escape_html(author_url)
    ));

    page.push_str("<blockquote>");
    for line in detail_lines(info) {
        page.push_str(&format!("<p>{}</p>", escape_html(&compact_detail(&line))));
    }
    page.push_str("</blockquote>");

    page.push_str("<hr/><p><b>文案：</b></p>");
    match info.web_intro.as_deref().filter(|_| use_web_intro) {
        Some(fragment) => {
            page.push_str(&re_void_tag().replace_all(fragment, "<$1$2/>"));
        }
        None => {
            for line in intro_lines(info) {
                page.push_str(&format!("<p>{}</p>", escape_html(&line)));
            }
        }
    }

    let extras = [
        format!("<b>标签：</b>{}", escape_html(&info.field("novelTags"))),
        escape_html(&info.field("protagonist")),
        escape_html(&info.field("costar")),
        escape_html(&info.field("other")),
        format!("<b>简介：</b>{}", escape_html(&info.field("novelIntroShort"))),
    ];
    for line in extras {
        let line = line
            .replace("主角：", "<b>主角：</b>")
            .replace("配角：", "<b>配角：</b>")
            .replace("其它：", "<b>其它：</b>");
        page.push_str(&format!("<p>{line}</p>"));
    }

    if !info.locked_chapters.is_empty() {
        page.push_str(&format!(
            "<p><em>被锁章节：{}</em></p>",
            info.locked_chapters.join(" ")
        ));
    }
    conv.convert(&page)
}
