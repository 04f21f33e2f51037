//! 解析与导出模块入口。
//!
//! 负责章节列表解析、正文排版，以及 txt/epub 产物的落盘与打包。

pub mod book_manager;
pub mod chapter;
pub mod epub_generator;
pub mod formatter;
pub(crate) mod image_utils;
pub mod info_page;
