//! EPUB 打包：把暂存目录中排好序的 XHTML 页面交给 epub-builder。

use std::fs;
use std::io::Cursor;
use std::path::Path;

use anyhow::{Result, anyhow};
use epub_builder::{EpubBuilder, EpubContent, EpubVersion, ReferenceType, ZipLibrary};

use crate::base_system::text_utils::escape_html;

/// 用于从小说 ID 确定性生成 UUID v5 的命名空间。
const EPUB_UUID_NAMESPACE: uuid::Uuid = uuid::Uuid::from_bytes([
    0x3f, 0x21, 0x6c, 0x0e, 0x5b, 0x94, 0x4d, 0x71, 0x9a, 0x08, 0x2e, 0xd4, 0x67, 0x1c, 0xb5, 0x43,
]);

/// 封面图片在包内的路径。
pub const COVER_IMAGE_PATH: &str = "images/cover.jpg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageVersion {
    V2,
    V3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Cover,
    Info,
    Volume,
    Chapter,
}

/// 包内一页：文件名、目录标题、完整 XHTML 文档与目录层级（1 起）。
#[derive(Debug, Clone)]
pub struct PackageItem {
    pub file_name: String,
    pub title: String,
    pub xhtml: String,
    pub kind: ItemKind,
    pub level: i32,
}

#[derive(Debug, Clone)]
pub struct PackageSpec {
    pub identifier: String,
    pub title: String,
    pub author: String,
    pub description: String,
    pub stylesheet: String,
    pub version: PackageVersion,
    pub cover_jpeg: Option<Vec<u8>>,
    pub items: Vec<PackageItem>,
}

pub trait PackageWriter: Send + Sync {
    fn write_package(&self, spec: &PackageSpec, output: &Path) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EpubPackageWriter;

impl PackageWriter for EpubPackageWriter {
    fn write_package(&self, spec: &PackageSpec, output: &Path) -> Result<()> {
        let zip = ZipLibrary::new().map_err(|e| anyhow!(e.to_string()))?;
        let mut book = EpubBuilder::new(zip).map_err(|e| anyhow!(e.to_string()))?;

        book.epub_version(match spec.version {
            PackageVersion::V2 => EpubVersion::V20,
            PackageVersion::V3 => EpubVersion::V30,
        });
        book.set_uuid(uuid::Uuid::new_v5(
            &EPUB_UUID_NAMESPACE,
            spec.identifier.as_bytes(),
        ));
        book.metadata("title", spec.title.as_str()).ok();
        book.metadata("lang", "zh").ok();
        book.metadata("toc_name", spec.title.as_str()).ok();
        let author = spec.author.trim();
        if !author.is_empty() {
            book.metadata("author", author).ok();
        }
        let description = spec.description.trim();
        if !description.is_empty() {
            book.metadata("description", description).ok();
        }
        book.metadata("generator", "JJWXC-Novel-Downloader").ok();

        book.stylesheet(Cursor::new(spec.stylesheet.clone()))
            .map_err(|e| anyhow!(e.to_string()))?;

        if let Some(jpeg) = &spec.cover_jpeg {
            book.add_cover_image(COVER_IMAGE_PATH, Cursor::new(jpeg.clone()), "image/jpeg")
                .map_err(|e| anyhow!(e.to_string()))?;
        }

        for item in &spec.items {
            if item.kind == ItemKind::Cover && spec.cover_jpeg.is_none() {
                continue;
            }
            let reftype = match item.kind {
                ItemKind::Cover => ReferenceType::Cover,
                ItemKind::Info => ReferenceType::TitlePage,
                ItemKind::Volume | ItemKind::Chapter => ReferenceType::Text,
            };
            let content = EpubContent::new(item.file_name.clone(), Cursor::new(item.xhtml.clone()))
                .title(item.title.clone())
                .reftype(reftype)
                .level(item.level.max(1));
            book.add_content(content)
                .map_err(|e| anyhow!(e.to_string()))?;
        }

        let parent = output.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let mut buffer = Vec::new();
        book.generate(&mut buffer)
            .map_err(|e| anyhow!(e.to_string()))?;
        fs::write(output, buffer)?;
        Ok(())
    }
}

/// 把 `<body>` 片段包成完整的 XHTML 文档。
pub fn xhtml_document(title: &str, body: &str) -> String {
    format!(
        "<?xml version='1.0' encoding='utf-8'?>\n<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\" lang=\"zh\" xml:lang=\"zh\">\n  <head>\n    <title>{}</title>\n    <link href=\"stylesheet.css\" rel=\"stylesheet\" type=\"text/css\"/>\n  </head>\n  <body>{}</body>\n</html>",
        escape_html(title),
        body
    )
}

/// 封面页，引用包内的封面图片。
pub fn cover_page() -> String {
    xhtml_document(
        "封面",
        &format!("<div class='cover'><img src=\"{COVER_IMAGE_PATH}\" alt=\"cover\"/></div>"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    fn chapter(file: &str, title: &str, level: i32) -> PackageItem {
        PackageItem {
            file_name: file.to_string(),
            title: title.to_string(),
            xhtml: xhtml_document(title, &format!("<h2>{title}</h2><p>正文</p>")),
            kind: ItemKind::Chapter,
            level,
        }
    }

    fn spec(version: PackageVersion) -> PackageSpec {
        PackageSpec {
            identifier: "100".to_string(),
            title: "春与秋".to_string(),
            author: "某某".to_string(),
            description: String::new(),
            stylesheet: "p { margin: 0; }".to_string(),
            version,
            cover_jpeg: None,
            items: vec![
                PackageItem {
                    file_name: "z0001_vol.xhtml".to_string(),
                    title: "§ 第一卷 §".to_string(),
                    xhtml: xhtml_document("§ 第一卷 §", "<h1>§ 第一卷 §</h1>"),
                    kind: ItemKind::Volume,
                    level: 1,
                },
                chapter("z0001.xhtml", "1 楔子", 2),
                chapter("z0002.xhtml", "2 风起", 2),
            ],
        }
    }

    fn read_entry(path: &Path, suffix: &str) -> String {
        let file = fs::File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let name = archive
            .file_names()
            .find(|n| n.ends_with(suffix))
            .map(str::to_string)
            .unwrap();
        let mut out = String::new();
        archive.by_name(&name).unwrap().read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn writes_epub3_with_chapters_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("book.epub");
        EpubPackageWriter
            .write_package(&spec(PackageVersion::V3), &out)
            .unwrap();

        let opf = read_entry(&out, "content.opf");
        assert!(opf.contains("version=\"3.0\""));
        assert!(opf.contains("春与秋"));
        assert!(opf.contains("某某"));
        let vol = opf.find("z0001_vol.xhtml").unwrap();
        let first = opf.find("z0001.xhtml").unwrap();
        let second = opf.find("z0002.xhtml").unwrap();
        assert!(vol < first && first < second);

        let page = read_entry(&out, "z0002.xhtml");
        assert!(page.contains("<h2>2 风起</h2>"));
    }

    #[test]
    fn epub2_nests_chapters_under_volume() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("book.epub");
        EpubPackageWriter
            .write_package(&spec(PackageVersion::V2), &out)
            .unwrap();

        let opf = read_entry(&out, "content.opf");
        assert!(opf.contains("version=\"2.0\""));
        let ncx = read_entry(&out, "toc.ncx");
        let vol = ncx.find("§ 第一卷 §").unwrap();
        let nested = ncx[vol..].find("1 楔子").unwrap() + vol;
        let close = ncx[vol..].find("</navPoint>").unwrap() + vol;
        assert!(nested < close);
    }

    #[test]
    fn cover_page_only_with_image() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("book.epub");
        let mut s = spec(PackageVersion::V3);
        s.items.insert(
            0,
            PackageItem {
                file_name: "C.xhtml".to_string(),
                title: "封面".to_string(),
                xhtml: cover_page(),
                kind: ItemKind::Cover,
                level: 1,
            },
        );
        EpubPackageWriter.write_package(&s, &out).unwrap();
        assert!(!read_entry(&out, "content.opf").contains("C.xhtml"));

        s.cover_jpeg = Some(crate::book_parser::image_utils::tests::png_bytes(4, 4));
        s.cover_jpeg = s
            .cover_jpeg
            .as_deref()
            .map(|b| crate::book_parser::image_utils::cover_to_jpeg(b).unwrap());
        EpubPackageWriter.write_package(&s, &out).unwrap();
        let opf = read_entry(&out, "content.opf");
        assert!(opf.contains("C.xhtml"));
        assert!(opf.contains(COVER_IMAGE_PATH));
    }

    #[test]
    fn document_wrapper_escapes_title() {
        let doc = xhtml_document("A & B", "<p>x</p>");
        assert!(doc.contains("<title>A &amp; B</title>"));
        assert!(doc.contains("<body><p>x</p></body>"));
        assert!(doc.contains("stylesheet.css"));
    }
}
