//! 单章正文排版：标题、章节信息、作者有话说与正文的拼接。
//!
//! txt 输出纯文本；epub 输出 XHTML 片段（`<body>` 内部），由输出模块包成完整文档。

use std::sync::OnceLock;

use regex::Regex;

use crate::base_system::context::DownloadConfig;
use crate::base_system::script_convert::ScriptConverter;
use crate::base_system::text_utils::{clean_text, escape_html, remove_thanks_content, unescape_html};
use crate::download::models::FetchResult;

const TEXT_SEPARATOR: &str = "\n*\n";
const XHTML_SEPARATOR: &str = "<hr/>";
const EMPTY_PARAGRAPH: &str = "<p><br/></p>";

fn re_paragraph_tag() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"</?p>").unwrap())
}

fn re_double_break() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r" ?<br/> ?<br/> ?").unwrap())
}

fn re_blank_paragraph() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"<p> *</p>").unwrap())
}

fn re_repeated_empty_paragraph() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(<p><br/></p>)+").unwrap())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedChapter {
    pub content: String,
    pub failed: bool,
}

pub fn format_content(
    title: &str,
    result: &FetchResult,
    cfg: &DownloadConfig,
    conv: &dyn ScriptConverter,
) -> FormattedChapter {
    let is_text = cfg.format.is_text();
    let mut content = if is_text {
        format!("\n\n{}\n", unescape_html(title))
    } else {
        format!("<h2>{}</h2>", escape_html(title))
    };

    let failed = result.is_failure();
    if failed {
        if is_text {
            content.push_str(&result.message);
            content.push('\n');
        } else {
            content.push_str(&format!("<p>{}</p>", escape_html(&result.message)));
        }
    } else {
        if cfg.show_chapter_info {
            if is_text {
                content.push_str(&format!("字数：{}\n日期：{}\n", result.size, result.date));
            } else {
                content.push_str(&format!(
                    "<p class='note'>字数：{}<br/>日期：{}</p>",
                    escape_html(&result.size),
                    escape_html(&result.date)
                ));
            }
        }

        let note = if cfg.strip_thanks {
            remove_thanks_content(&result.note)
        } else {
            result.note.clone()
        };
        let note = escape_html(&clean_text(&note));
        let body = escape_html(&clean_text(&result.content));

        let note_block = render_note(&note, is_text);
        let body_block = render_body(&body, is_text, cfg.remove_blank_lines);

        let separator = if is_text { TEXT_SEPARATOR } else { XHTML_SEPARATOR };
        let (first, second) = if result.note_after_body {
            (body_block, note_block)
        } else {
            (note_block, body_block)
        };
        content.push_str(&first);
        if !first.is_empty() && !second.is_empty() {
            content.push_str(separator);
        }
        content.push_str(&second);
    }

    if !is_text {
        let tidied = re_blank_paragraph().replace_all(&content, EMPTY_PARAGRAPH);
        content = re_repeated_empty_paragraph()
            .replace_all(&tidied, EMPTY_PARAGRAPH)
            .into_owned();
    }

    FormattedChapter {
        content: conv.convert(&content),
        failed,
    }
}

fn render_note(note: &str, is_text: bool) -> String {
    if note.trim().is_empty() {
        return String::new();
    }
    let mut out = String::new();
    if is_text {
        out.push_str("作者有话要说：\n");
        for line in note.lines() {
            out.push_str(unescape_html(line).trim());
            out.push('\n');
        }
    } else {
        out.push_str("<p><b>作者有话要说</b>：</p><blockquote>");
        for line in note.lines() {
            out.push_str(&format!("<p>{line}</p>"));
        }
        out.push_str("</blockquote>");
    }
    out
}

fn render_body(body: &str, is_text: bool, remove_blank_lines: bool) -> String {
    if is_text {
        let mut out = String::new();
        for line in body.lines() {
            let line = unescape_html(line);
            let line = re_paragraph_tag().replace_all(line.trim(), "");
            if remove_blank_lines && line.trim().is_empty() {
                continue;
            }
            out.push_str(&line);
            out.push('\n');
        }
        out
    } else {
        let mut out = String::from("<p>");
        for line in body.lines() {
            out.push_str(line);
            out.push_str("<br/>");
        }
        out.push_str("</p>");
        re_double_break().replace_all(&out, "</p><p>").into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::context::OutputFormat;
    use crate::base_system::script_convert::IdentityConverter;
    use crate::base_system::script_convert::tests::CharMapConverter;

    fn ok(body: &str, note: &str, after: bool) -> FetchResult {
        FetchResult {
            content: body.to_string(),
            note: note.to_string(),
            note_after_body: after,
            size: "2000".to_string(),
            date: "2024-05-01".to_string(),
            attempts: 1,
            ..FetchResult::default()
        }
    }

    fn text_cfg() -> DownloadConfig {
        DownloadConfig::default()
    }

    fn xhtml_cfg() -> DownloadConfig {
        DownloadConfig {
            format: OutputFormat::PackageV2,
            ..DownloadConfig::default()
        }
    }

    #[test]
    fn text_note_before_body() {
        let out = format_content("1 # 楔子", &ok("　　第一段\n　　第二段", "感谢阅读", false), &text_cfg(), &IdentityConverter);
        assert!(!out.failed);
        assert_eq!(
            out.content,
            "\n\n1 # 楔子\n作者有话要说：\n感谢阅读\n\n*\n第一段\n第二段\n"
        );
    }

    #[test]
    fn text_note_after_body_and_chapter_info() {
        let cfg = DownloadConfig {
            show_chapter_info: true,
            ..text_cfg()
        };
        let out = format_content("t", &ok("正文", "作话", true), &cfg, &IdentityConverter);
        assert_eq!(
            out.content,
            "\n\nt\n字数：2000\n日期：2024-05-01\n正文\n\n*\n作者有话要说：\n作话\n"
        );
    }

    #[test]
    fn no_separator_without_note() {
        let out = format_content("t", &ok("正文", "  ", false), &text_cfg(), &IdentityConverter);
        assert_eq!(out.content, "\n\nt\n正文\n");
    }

    #[test]
    fn text_blank_lines_removed_on_request() {
        let body = "一\n\n二\n<p>\n三";
        let keep = format_content("t", &ok(body, "", false), &text_cfg(), &IdentityConverter);
        assert_eq!(keep.content, "\n\nt\n一\n\n二\n\n三\n");

        let cfg = DownloadConfig {
            remove_blank_lines: true,
            ..text_cfg()
        };
        let drop = format_content("t", &ok(body, "", false), &cfg, &IdentityConverter);
        assert_eq!(drop.content, "\n\nt\n一\n二\n三\n");
    }

    #[test]
    fn text_keeps_literal_markup_characters() {
        let out = format_content("A &amp; B", &ok("x < y & z", "", false), &text_cfg(), &IdentityConverter);
        assert_eq!(out.content, "\n\nA & B\nx < y & z\n");
    }

    #[test]
    fn xhtml_paragraphs_and_note_block() {
        let out = format_content(
            "1 序",
            &ok("第一段\n\n第二段\n第二段续", "谢谢", true),
            &xhtml_cfg(),
            &IdentityConverter,
        );
        assert_eq!(
            out.content,
            "<h2>1 序</h2><p>第一段</p><p>第二段<br/>第二段续<br/></p><hr/>\
             <p><b>作者有话要说</b>：</p><blockquote><p>谢谢</p></blockquote>"
        );
    }

    #[test]
    fn xhtml_collapses_empty_paragraphs_and_escapes() {
        let out = format_content("a<b", &ok("x\n\n\n\ny&z", "", false), &xhtml_cfg(), &IdentityConverter);
        assert_eq!(out.content, "<h2>a&lt;b</h2><p>x</p><p><br/></p><p>y&amp;z<br/></p>");
    }

    #[test]
    fn failure_renders_message() {
        let failed = FetchResult {
            message: "用晋江币购买章节后即可阅读".to_string(),
            ..FetchResult::default()
        };
        let out = format_content("5 # 付费", &failed, &text_cfg(), &IdentityConverter);
        assert!(out.failed);
        assert_eq!(out.content, "\n\n5 # 付费\n用晋江币购买章节后即可阅读\n");

        let out = format_content("5", &failed, &xhtml_cfg(), &IdentityConverter);
        assert!(out.failed);
        assert_eq!(out.content, "<h2>5</h2><p>用晋江币购买章节后即可阅读</p>");
    }

    #[test]
    fn thanks_stripped_and_watermark_removed() {
        let cfg = DownloadConfig {
            strip_thanks: true,
            ..text_cfg()
        };
        let note = "明天加更\n读者甲扔了1个地雷";
        let out = format_content("t", &ok("正文@无限好文，尽在晋江文学城", note, true), &cfg, &IdentityConverter);
        assert!(out.content.contains("明天加更"));
        assert!(!out.content.contains("地雷"));
        assert!(!out.content.contains("晋江文学城"));
    }

    #[test]
    fn output_is_script_converted() {
        let conv = CharMapConverter::traditional_to_simplified();
        let out = format_content("他們", &ok("說", "", false), &text_cfg(), &conv);
        assert_eq!(out.content, "\n\n他们\n说\n");
    }
}
