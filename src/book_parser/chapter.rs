//! 章节列表解析：卷标、章节地址/标题/提要、目录与章节标题。

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::base_system::context::DownloadConfig;
use crate::base_system::json_extract::{JsonMap, pick_string};
use crate::base_system::script_convert::ScriptConverter;
use crate::base_system::text_utils::{decimal_digits, escape_html, strip_markup_tags, zero_pad};
use crate::download::models::ChapterRange;

/// 章节序号补零的最少位数。
pub const MIN_FILL_WIDTH: usize = 4;

fn re_placeholder() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"\$([123])").unwrap())
}

/// 单遍替换 `$1`..`$3`；替换结果中的占位符不会被再次展开。
pub fn fill_template(template: &str, values: &[&str]) -> String {
    re_placeholder()
        .replace_all(template, |caps: &Captures| {
            let n: usize = caps[1].parse().unwrap_or(0);
            match n.checked_sub(1).and_then(|i| values.get(i)) {
                Some(v) => (*v).to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// 卷标：显示文本与所在位置（其后第一章的章节号）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMark {
    pub label: String,
    pub place: String,
}

/// 章节的只读视图。
#[derive(Debug, Clone, Copy)]
pub struct ChapterEntry<'a> {
    pub position: usize,
    pub href: &'a str,
    pub id: &'a str,
    pub title: &'a str,
    pub summary: &'a str,
}

/// 章节数据。`hrefs` / `ids` / `titles` / `summaries` 同序同长，只会被整体截取。
#[derive(Debug, Clone, Default)]
pub struct ChapterData {
    hrefs: Vec<String>,
    ids: Vec<String>,
    titles: Vec<String>,
    summaries: Vec<String>,
    volume_labels: Vec<String>,
    volume_places: Vec<String>,
    index: Vec<String>,
    fill_width: usize,
}

/// 解析原始章节列表，返回章节数据与被锁章节号。
///
/// `chapter_url` 由章节号生成正文请求地址。
pub fn parse_chapters<F>(
    raw: &[JsonMap],
    cfg: &DownloadConfig,
    chapter_url: F,
) -> (ChapterData, Vec<String>)
where
    F: Fn(&str) -> String,
{
    let is_text = cfg.format.is_text();
    let mut data = ChapterData::default();
    let mut locked = Vec::new();
    let mut volume_count = 0usize;

    for entry in raw {
        let Some(chapter_id) = pick_string(entry, &["chapterid"]) else {
            continue;
        };
        let name = pick_string(entry, &["chaptername"]).unwrap_or_default();

        if pick_string(entry, &["chaptertype"]).as_deref() == Some("1") {
            volume_count += 1;
            let label = match cfg.custom_volume.as_deref() {
                Some(template) => fill_template(template, &[&volume_count.to_string(), &name]),
                None => {
                    let mut v = escape_html(&name);
                    if is_text {
                        v = strip_markup_tags(&v).trim().to_string();
                    }
                    format!("§ {v} §")
                }
            };
            data.volume_labels.push(label);
            data.volume_places.push(chapter_id);
            continue;
        }

        let title = strip_markup_tags(&escape_html(&name)).trim().to_string();
        let intro = pick_string(entry, &["chapterintro"]).unwrap_or_default();
        let mut summary = escape_html(&intro);
        if is_text {
            summary = strip_markup_tags(&summary);
        }

        let is_locked = pick_string(entry, &["islock"]).is_some_and(|v| v != "0");
        if is_locked {
            locked.push(chapter_id.clone());
        }

        data.hrefs.push(chapter_url(&chapter_id));
        data.titles.push(title);
        data.summaries.push(summary.trim().to_string());
        data.ids.push(chapter_id);
    }

    data.fill_width = decimal_digits(data.hrefs.len()).max(MIN_FILL_WIDTH);
    (data, locked)
}

impl ChapterData {
    pub fn len(&self) -> usize {
        self.hrefs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hrefs.is_empty()
    }

    pub fn fill_width(&self) -> usize {
        self.fill_width
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn hrefs(&self) -> &[String] {
        &self.hrefs
    }

    pub fn entry(&self, position: usize) -> Option<ChapterEntry<'_>> {
        Some(ChapterEntry {
            position,
            href: self.hrefs.get(position)?,
            id: self.ids.get(position)?,
            title: self.titles.get(position)?,
            summary: self.summaries.get(position)?,
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = ChapterEntry<'_>> {
        (0..self.len()).filter_map(|i| self.entry(i))
    }

    pub fn position_of(&self, href: &str) -> Option<usize> {
        self.hrefs.iter().position(|h| h == href)
    }

    /// 按范围截取章节，返回实际的 `[start, end)`。
    pub fn retain_range(&mut self, range: ChapterRange) -> (usize, usize) {
        let (start, end) = range.bounds(self.len());
        for list in [
            &mut self.hrefs,
            &mut self.ids,
            &mut self.titles,
            &mut self.summaries,
        ] {
            list.truncate(end);
            list.drain(..start);
        }
        (start, end)
    }

    /// 位于当前章节范围内的卷标。
    pub fn volumes_in_range(&self) -> Vec<VolumeMark> {
        let selected: HashSet<&str> = self.ids.iter().map(String::as_str).collect();
        self.volume_labels
            .iter()
            .zip(&self.volume_places)
            .filter(|(_, place)| selected.contains(place.trim()))
            .map(|(label, place)| VolumeMark {
                label: label.clone(),
                place: place.trim().to_string(),
            })
            .collect()
    }

    pub fn padded_id(&self, chapter_id: &str) -> String {
        zero_pad(chapter_id.trim(), self.fill_width)
    }

    /// 生成目录：`[锁]` 前缀 + 章节号 + 标题 + 提要，逐行转换。
    pub fn build_index(&mut self, locked: &[String], conv: &dyn ScriptConverter) -> &[String] {
        let locked: HashSet<&str> = locked.iter().map(String::as_str).collect();
        let index = self
            .entries()
            .map(|ch| {
                let mut line = String::new();
                if locked.contains(ch.id) {
                    line.push_str("[锁]");
                }
                line.push_str(&format!("{} {} {}", ch.id, ch.title.trim(), ch.summary.trim()));
                conv.convert(&line)
            })
            .collect();
        self.index = index;
        &self.index
    }

    /// 第 `position` 章的显示标题。
    pub fn build_title(
        &self,
        position: usize,
        cfg: &DownloadConfig,
        conv: &dyn ScriptConverter,
    ) -> String {
        let Some(ch) = self.entry(position) else {
            return String::new();
        };
        let (title, summary) = (ch.title.trim(), ch.summary.trim());

        let out = match cfg.custom_title.as_deref() {
            Some(template) => fill_template(template, &[ch.id, title, summary]),
            None => {
                let mut out = String::new();
                if cfg.show_number {
                    out.push_str(ch.id);
                    if cfg.format.is_text() {
                        out.push_str(" #");
                    }
                }
                if cfg.show_title {
                    out.push(' ');
                    out.push_str(title);
                }
                if cfg.show_summary {
                    out.push(' ');
                    out.push_str(summary);
                }
                out
            }
        };
        conv.convert(out.trim())
    }
}
