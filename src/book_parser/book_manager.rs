//! 产物落盘：暂存目录中的单章文件、卷标、封面与信息页，以及最终的合并/改名/打包。
//!
//! 单章文件名形如 `z0007.txt`，按文件名排序即为章节顺序；卷标文件 `z0006_vol.txt`
//! 排在其后第一章之前。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::chapter::VolumeMark;
use super::epub_generator::{
    ItemKind, PackageItem, PackageSpec, PackageVersion, PackageWriter, cover_page, xhtml_document,
};
use super::image_utils::cover_to_jpeg;
use crate::base_system::context::{DownloadConfig, OutputFormat};
use crate::base_system::text_utils::{sanitize_filename, zero_pad};

const COVER_FILE: &str = "zp.jpg";
const COVER_PAGE_FILE: &str = "C.xhtml";
const INFO_STEM: &str = "info";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cover image error: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Package(#[from] anyhow::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SinkError + '_ {
    move |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// 目录中的一章：原始章节号、补零章节号、目录标题与（已转换的）章节名。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: String,
    pub padded_id: String,
    pub toc_title: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct FinalizeRequest {
    pub chapters: Vec<IndexEntry>,
    pub description: String,
}

/// 一本书的落盘目标。
#[derive(Debug, Clone)]
pub struct BookTarget {
    pub novel_id: String,
    pub title: String,
    pub author: String,
    pub fill_width: usize,
}

impl BookTarget {
    /// `书名-作者.小说ID`，已清理非法字符。
    pub fn base_name(&self) -> String {
        format!(
            "{}.{}",
            sanitize_filename(&format!("{}-{}", self.title, self.author)),
            self.novel_id
        )
    }
}

pub trait ArtifactSink: Send + Sync {
    fn save_chapter(&self, padded_id: &str, title: &str, content: &str) -> Result<(), SinkError>;
    fn save_volumes(&self, volumes: &[VolumeMark]) -> Result<(), SinkError>;
    fn save_cover(&self, image: &[u8]) -> Result<(), SinkError>;
    fn save_info_page(&self, content: &str) -> Result<(), SinkError>;
    fn finalize(&self, request: &FinalizeRequest) -> Result<PathBuf, SinkError>;
}

/// 文件系统实现。
pub struct BookManager {
    target: BookTarget,
    format: OutputFormat,
    save_per_chapter: bool,
    html_volume: bool,
    stylesheet: String,
    save_dir: PathBuf,
    staging_dir: PathBuf,
    writer: Arc<dyn PackageWriter>,
    volumes: Mutex<Vec<VolumeMark>>,
}

impl BookManager {
    pub fn new(
        target: BookTarget,
        cfg: &DownloadConfig,
        writer: Arc<dyn PackageWriter>,
    ) -> Result<Self, SinkError> {
        let save_dir = cfg.save_dir.clone();
        let staging_dir = save_dir.join(target.base_name());
        // 上次取消或按章保存留下的文件不能混进本次产物
        if staging_dir.exists() {
            warn!(target: "book_manager", dir = %staging_dir.display(), "暂存目录已存在，清空后重新下载");
            fs::remove_dir_all(&staging_dir).map_err(io_err(&staging_dir))?;
        }
        fs::create_dir_all(&staging_dir).map_err(io_err(&staging_dir))?;
        debug!(target: "book_manager", dir = %staging_dir.display(), "暂存目录就绪");

        Ok(Self {
            target,
            format: cfg.format,
            save_per_chapter: cfg.save_per_chapter,
            html_volume: cfg.html_volume,
            stylesheet: cfg.css_text.clone(),
            save_dir,
            staging_dir,
            writer,
            volumes: Mutex::new(Vec::new()),
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    fn ext(&self) -> &'static str {
        self.format.chapter_ext()
    }

    fn write_file(&self, name: &str, content: &[u8]) -> Result<(), SinkError> {
        let path = self.staging_dir.join(name);
        fs::write(&path, content).map_err(io_err(&path))
    }

    fn read_staged(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.staging_dir.join(name)).ok()
    }

    fn volume_file(&self, place: &str) -> Option<String> {
        let id: u64 = place.trim().parse().ok()?;
        let before = id.saturating_sub(1).to_string();
        Some(format!(
            "z{}_vol.{}",
            zero_pad(&before, self.target.fill_width),
            self.ext()
        ))
    }

    fn remove_staging(&self) {
        if let Err(e) = fs::remove_dir_all(&self.staging_dir) {
            warn!(target: "book_manager", error = %e, "清理暂存目录失败");
        }
    }

    // ── 最终产物 ────────────────────────────────────────────────────

    /// 只合并本次写出的文件：信息页、目录中的章节与本次保存的卷标。
    fn merge_text(&self, request: &FinalizeRequest) -> Result<PathBuf, SinkError> {
        let volumes = self.volumes.lock().map(|v| v.clone()).unwrap_or_default();
        let mut names: Vec<String> = std::iter::once(format!("{INFO_STEM}.txt"))
            .chain(request.chapters.iter().map(|e| format!("z{}.txt", e.padded_id)))
            .chain(volumes.iter().filter_map(|v| self.volume_file(&v.place)))
            .filter(|name| self.staging_dir.join(name).is_file())
            .collect();
        names.sort();
        names.dedup();

        let mut merged = String::new();
        for name in &names {
            let path = self.staging_dir.join(name);
            merged.push_str(&fs::read_to_string(&path).map_err(io_err(&path))?);
        }

        let output = self
            .save_dir
            .join(format!("{}.txt", self.target.base_name()));
        fs::write(&output, merged).map_err(io_err(&output))?;
        self.remove_staging();
        info!(target: "book_manager", files = names.len(), output = %output.display(), "txt 合并完成");
        Ok(output)
    }

    fn rename_chapters(&self, request: &FinalizeRequest) -> Result<PathBuf, SinkError> {
        for entry in &request.chapters {
            let from = self.staging_dir.join(format!("z{}.txt", entry.padded_id));
            if !from.exists() {
                continue;
            }
            let stem = if entry.name.trim().is_empty() {
                entry.padded_id.clone()
            } else {
                sanitize_filename(&entry.name)
            };
            let to = self.staging_dir.join(format!("{stem}.txt"));
            if to.exists() {
                debug!(target: "book_manager", file = %to.display(), "目标已存在，跳过改名");
                continue;
            }
            fs::rename(&from, &to).map_err(io_err(&from))?;
        }
        info!(target: "book_manager", dir = %self.staging_dir.display(), "txt 按章保存完成");
        Ok(self.staging_dir.clone())
    }

    fn package(&self, request: &FinalizeRequest) -> Result<PathBuf, SinkError> {
        let version = match self.format {
            OutputFormat::PackageV2 => PackageVersion::V2,
            _ => PackageVersion::V3,
        };
        let cover_jpeg = fs::read(self.staging_dir.join(COVER_FILE)).ok();

        let mut items = Vec::new();
        if let Some(xhtml) = self.read_staged(COVER_PAGE_FILE) {
            items.push(PackageItem {
                file_name: COVER_PAGE_FILE.to_string(),
                title: "封面".to_string(),
                xhtml,
                kind: ItemKind::Cover,
                level: 1,
            });
        }
        let info_name = format!("{INFO_STEM}.xhtml");
        if let Some(xhtml) = self.read_staged(&info_name) {
            items.push(PackageItem {
                file_name: info_name,
                title: "文案".to_string(),
                xhtml,
                kind: ItemKind::Info,
                level: 1,
            });
        }

        let volumes = self.volumes.lock().map(|v| v.clone()).unwrap_or_default();
        let mut in_volume = false;
        for entry in &request.chapters {
            for vol in volumes.iter().filter(|v| v.place == entry.id) {
                let Some(name) = self.volume_file(&vol.place) else {
                    continue;
                };
                if let Some(xhtml) = self.read_staged(&name) {
                    items.push(PackageItem {
                        file_name: name,
                        title: vol.label.clone(),
                        xhtml,
                        kind: ItemKind::Volume,
                        level: 1,
                    });
                    in_volume = true;
                }
            }

            let name = format!("z{}.xhtml", entry.padded_id);
            let Some(xhtml) = self.read_staged(&name) else {
                warn!(target: "book_manager", chapter = %entry.id, "章节文件缺失，未打包");
                continue;
            };
            items.push(PackageItem {
                file_name: name,
                title: entry.toc_title.clone(),
                xhtml,
                kind: ItemKind::Chapter,
                level: if self.html_volume && in_volume { 2 } else { 1 },
            });
        }

        let spec = PackageSpec {
            identifier: self.target.novel_id.clone(),
            title: self.target.title.clone(),
            author: self.target.author.clone(),
            description: request.description.clone(),
            stylesheet: self.stylesheet.clone(),
            version,
            cover_jpeg,
            items,
        };
        let output = self
            .save_dir
            .join(format!("{}.epub", self.target.base_name()));
        self.writer.write_package(&spec, &output)?;
        self.remove_staging();
        info!(target: "book_manager", output = %output.display(), "epub 打包完成");
        Ok(output)
    }
}

impl ArtifactSink for BookManager {
    fn save_chapter(&self, padded_id: &str, title: &str, content: &str) -> Result<(), SinkError> {
        let name = format!("z{padded_id}.{}", self.ext());
        if self.format.is_text() {
            self.write_file(&name, content.as_bytes())?;
        } else {
            self.write_file(&name, xhtml_document(title, content).as_bytes())?;
        }
        Ok(())
    }

    fn save_volumes(&self, volumes: &[VolumeMark]) -> Result<(), SinkError> {
        for vol in volumes {
            let Some(name) = self.volume_file(&vol.place) else {
                warn!(target: "book_manager", place = %vol.place, "卷标位置无效，已跳过");
                continue;
            };
            if self.format.is_text() {
                self.write_file(&name, format!("\n\n{}\n", vol.label).as_bytes())?;
            } else {
                let body = format!("<h1>{}</h1>", vol.label);
                self.write_file(&name, xhtml_document(&vol.label, &body).as_bytes())?;
            }
        }
        if let Ok(mut stored) = self.volumes.lock() {
            stored.extend(volumes.iter().cloned());
        }
        Ok(())
    }

    fn save_cover(&self, image: &[u8]) -> Result<(), SinkError> {
        let jpeg = cover_to_jpeg(image)?;
        self.write_file(COVER_FILE, &jpeg)?;
        self.write_file(COVER_PAGE_FILE, cover_page().as_bytes())
    }

    fn save_info_page(&self, content: &str) -> Result<(), SinkError> {
        let name = format!("{INFO_STEM}.{}", self.ext());
        if self.format.is_text() {
            self.write_file(&name, content.as_bytes())
        } else {
            self.write_file(&name, xhtml_document(&self.target.title, content).as_bytes())
        }
    }

    fn finalize(&self, request: &FinalizeRequest) -> Result<PathBuf, SinkError> {
        match (self.format, self.save_per_chapter) {
            (OutputFormat::Text, true) => self.rename_chapters(request),
            (OutputFormat::Text, false) => self.merge_text(request),
            _ => self.package(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book_parser::epub_generator::EpubPackageWriter;
    use crate::book_parser::image_utils::tests::png_bytes;

    #[derive(Default)]
    struct RecordingWriter {
        specs: Mutex<Vec<PackageSpec>>,
    }

    impl PackageWriter for RecordingWriter {
        fn write_package(&self, spec: &PackageSpec, output: &Path) -> anyhow::Result<()> {
            fs::write(output, b"epub")?;
            self.specs.lock().unwrap().push(spec.clone());
            Ok(())
        }
    }

    fn target() -> BookTarget {
        BookTarget {
            novel_id: "100".to_string(),
            title: "春/秋".to_string(),
            author: "某某".to_string(),
            fill_width: 4,
        }
    }

    fn cfg(dir: &Path, format: OutputFormat) -> DownloadConfig {
        DownloadConfig {
            format,
            save_dir: dir.to_path_buf(),
            ..DownloadConfig::default()
        }
    }

    fn entry(id: &str, title: &str) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            padded_id: zero_pad(id, 4),
            toc_title: title.to_string(),
            name: title.split_once(' ').map(|(_, n)| n).unwrap_or(title).to_string(),
        }
    }

    fn chapters(ids: &[&str]) -> FinalizeRequest {
        FinalizeRequest {
            chapters: ids.iter().map(|id| entry(id, id)).collect(),
            description: String::new(),
        }
    }

    #[test]
    fn merged_text_follows_sequence_not_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let sink = BookManager::new(target(), &cfg(dir.path(), OutputFormat::Text), Arc::new(EpubPackageWriter)).unwrap();
        let staging = sink.staging_dir().to_path_buf();
        assert_eq!(staging.file_name().unwrap(), "春_秋-某某.100");

        sink.save_info_page("信息\n").unwrap();
        sink.save_chapter("0003", "3", "\n\n3\nC\n").unwrap();
        sink.save_chapter("0001", "1", "\n\n1\nA\n").unwrap();
        sink.save_chapter("0002", "2", "\n\n2\nB\n").unwrap();
        sink.save_volumes(&[VolumeMark {
            label: "§ 卷二 §".to_string(),
            place: "3".to_string(),
        }])
        .unwrap();

        let out = sink.finalize(&chapters(&["1", "2", "3"])).unwrap();
        assert_eq!(out, dir.path().join("春_秋-某某.100.txt"));
        let merged = fs::read_to_string(&out).unwrap();
        assert_eq!(merged, "信息\n\n\n1\nA\n\n\n2\nB\n\n\n§ 卷二 §\n\n\n3\nC\n");
        assert!(!staging.exists());
    }

    #[test]
    fn per_chapter_files_renamed_to_chapter_names() {
        let dir = tempfile::tempdir().unwrap();
        let config = DownloadConfig {
            save_per_chapter: true,
            ..cfg(dir.path(), OutputFormat::Text)
        };
        let sink = BookManager::new(target(), &config, Arc::new(EpubPackageWriter)).unwrap();
        sink.save_chapter("0001", "1 # 楔子 开始", "a").unwrap();
        sink.save_chapter("0002", "2 # 风/起", "b").unwrap();
        sink.save_chapter("0003", "3 # 楔子", "c").unwrap();
        sink.save_chapter("0004", "", "d").unwrap();

        let mut untitled = entry("4", "4");
        untitled.name = " ".to_string();
        let request = FinalizeRequest {
            chapters: vec![entry("1", "1 楔子"), entry("2", "2 风/起"), entry("3", "3 楔子"), untitled],
            description: String::new(),
        };
        let out = sink.finalize(&request).unwrap();
        assert_eq!(out, sink.staging_dir());
        assert_eq!(fs::read_to_string(out.join("楔子.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(out.join("风_起.txt")).unwrap(), "b");
        // 重名章节保留暂存名
        assert_eq!(fs::read_to_string(out.join("z0003.txt")).unwrap(), "c");
        assert_eq!(fs::read_to_string(out.join("0004.txt")).unwrap(), "d");
    }

    #[test]
    fn leftover_staging_files_are_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let config = cfg(dir.path(), OutputFormat::Text);
        let staging = dir.path().join(target().base_name());
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("z0001.txt"), "旧正文").unwrap();
        fs::write(staging.join("第1章.txt"), "旧改名").unwrap();

        let sink = BookManager::new(target(), &config, Arc::new(EpubPackageWriter)).unwrap();
        assert!(!staging.join("z0001.txt").exists());
        assert!(!staging.join("第1章.txt").exists());

        sink.save_chapter("0002", "2", "新正文").unwrap();
        let out = sink.finalize(&chapters(&["2"])).unwrap();
        assert_eq!(fs::read_to_string(out).unwrap(), "新正文");
    }

    #[test]
    fn merge_skips_files_not_written_this_run() {
        let dir = tempfile::tempdir().unwrap();
        let sink = BookManager::new(target(), &cfg(dir.path(), OutputFormat::Text), Arc::new(EpubPackageWriter)).unwrap();
        sink.save_chapter("0003", "3", "三").unwrap();
        fs::write(sink.staging_dir().join("z0001.txt"), "外来").unwrap();
        fs::write(sink.staging_dir().join("z0002_vol.txt"), "外来卷").unwrap();

        let out = sink.finalize(&chapters(&["3"])).unwrap();
        assert_eq!(fs::read_to_string(out).unwrap(), "三");
    }

    #[test]
    fn package_orders_items_and_nests_volumes() {
        let dir = tempfile::tempdir().unwrap();
        let config = DownloadConfig {
            html_volume: true,
            ..cfg(dir.path(), OutputFormat::PackageV2)
        };
        let writer = Arc::new(RecordingWriter::default());
        let sink = BookManager::new(target(), &config, writer.clone()).unwrap();
        let staging = sink.staging_dir().to_path_buf();

        sink.save_cover(&png_bytes(6, 9)).unwrap();
        sink.save_info_page("<h1>春/秋</h1>").unwrap();
        sink.save_chapter("0002", "2 风起", "<h2>2 风起</h2>").unwrap();
        sink.save_chapter("0001", "1 楔子", "<h2>1 楔子</h2>").unwrap();
        sink.save_volumes(&[VolumeMark {
            label: "§ 卷二 §".to_string(),
            place: "2".to_string(),
        }])
        .unwrap();
        assert!(staging.join("z0001_vol.xhtml").exists());

        let request = FinalizeRequest {
            chapters: vec![entry("1", "1 楔子 开始"), entry("2", "2 风起 ")],
            description: "简介".to_string(),
        };
        let out = sink.finalize(&request).unwrap();
        assert_eq!(out, dir.path().join("春_秋-某某.100.epub"));
        assert!(!staging.exists());

        let specs = writer.specs.lock().unwrap();
        let spec = &specs[0];
        assert_eq!(spec.version, PackageVersion::V2);
        assert!(spec.cover_jpeg.is_some());
        let files: Vec<(&str, i32)> = spec
            .items
            .iter()
            .map(|i| (i.file_name.as_str(), i.level))
            .collect();
        assert_eq!(
            files,
            vec![
                ("C.xhtml", 1),
                ("info.xhtml", 1),
                ("z0001.xhtml", 1),
                ("z0001_vol.xhtml", 1),
                ("z0002.xhtml", 2),
            ]
        );
        assert_eq!(spec.items[2].title, "1 楔子 开始");
        assert!(spec.items[4].xhtml.contains("<title>2 风起</title>"));
        assert!(spec.items[4].xhtml.contains("<body><h2>2 风起</h2></body>"));
    }

    #[test]
    fn bad_cover_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let sink = BookManager::new(target(), &cfg(dir.path(), OutputFormat::PackageV3), Arc::new(EpubPackageWriter)).unwrap();
        assert!(matches!(sink.save_cover(b"nope"), Err(SinkError::Image(_))));
        assert!(!sink.staging_dir().join(COVER_FILE).exists());
    }

    #[test]
    fn real_epub_written_from_staging() {
        let dir = tempfile::tempdir().unwrap();
        let sink = BookManager::new(target(), &cfg(dir.path(), OutputFormat::PackageV3), Arc::new(EpubPackageWriter)).unwrap();
        sink.save_chapter("0001", "1 楔子", "<h2>1 楔子</h2><p>正文</p>").unwrap();
        let out = sink
            .finalize(&FinalizeRequest {
                chapters: vec![entry("1", "1 楔子")],
                description: String::new(),
            })
            .unwrap();
        let archive = zip::ZipArchive::new(fs::File::open(out).unwrap()).unwrap();
        assert!(archive.file_names().any(|n| n.ends_with("z0001.xhtml")));
    }
}
