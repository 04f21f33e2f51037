//! 繁简转换。
//!
//! 转换本身交给外部 OpenCC 命令行工具，这里只负责探测、调用与降级。
//! 找不到工具时退化为原样输出，并记录一条警告。

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::context::ScriptMode;

/// 纯文本转换服务。实现必须是确定性的纯函数。
pub trait ScriptConverter: Send + Sync {
    fn convert(&self, text: &str) -> String;
}

/// 不做任何转换。
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityConverter;

impl ScriptConverter for IdentityConverter {
    fn convert(&self, text: &str) -> String {
        text.to_string()
    }
}

/// 调用 `opencc -c t2s.json|s2t.json`，结果按输入缓存。
pub struct OpenCcCli {
    program: PathBuf,
    config_file: &'static str,
    cache: Mutex<HashMap<String, String>>,
}

// 标题、目录行会被反复转换，正文不缓存
const CACHE_MAX_LEN: usize = 512;

impl OpenCcCli {
    pub fn new(program: impl Into<PathBuf>, mode: ScriptMode) -> Option<Self> {
        let config_file = match mode {
            ScriptMode::None => return None,
            ScriptMode::Simplify => "t2s.json",
            ScriptMode::Traditionalize => "s2t.json",
        };
        Some(Self {
            program: program.into(),
            config_file,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn run(&self, text: &str) -> std::io::Result<String> {
        let mut child = Command::new(&self.program)
            .arg("-c")
            .arg(self.config_file)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        // 另起线程写 stdin，避免大段正文把管道写满后与读 stdout 互相等待
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("opencc stdin unavailable"))?;
        let input = text.as_bytes().to_vec();
        let writer = std::thread::spawn(move || stdin.write_all(&input));

        let output = child.wait_with_output()?;
        writer
            .join()
            .map_err(|_| std::io::Error::other("opencc writer panicked"))??;

        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "opencc exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ScriptConverter for OpenCcCli {
    fn convert(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }
        let cacheable = text.len() <= CACHE_MAX_LEN;
        if cacheable
            && let Ok(cache) = self.cache.lock()
            && let Some(hit) = cache.get(text)
        {
            return hit.clone();
        }

        match self.run(text) {
            Ok(mut converted) => {
                // opencc 会在末尾补换行
                if !text.ends_with('\n') && converted.ends_with('\n') {
                    converted.pop();
                }
                if cacheable && let Ok(mut cache) = self.cache.lock() {
                    cache.insert(text.to_string(), converted.clone());
                }
                converted
            }
            Err(err) => {
                warn!(target: "convert", error = %err, "繁简转换失败，保留原文");
                text.to_string()
            }
        }
    }
}

/// 按配置构造转换器：`None` 模式或找不到 opencc 时返回原样转换器。
pub fn converter_for(mode: ScriptMode, opencc_path: &str) -> Arc<dyn ScriptConverter> {
    if mode == ScriptMode::None {
        return Arc::new(IdentityConverter);
    }

    let program = if opencc_path.trim().is_empty() {
        which::which("opencc").ok()
    } else {
        let p = Path::new(opencc_path.trim());
        p.exists().then(|| p.to_path_buf())
    };

    match program.and_then(|p| OpenCcCli::new(p, mode)) {
        Some(cli) => {
            debug!(target: "convert", program = %cli.program.display(), mode = ?mode, "使用 opencc 进行繁简转换");
            Arc::new(cli)
        }
        None => {
            warn!(target: "convert", "未找到 opencc，跳过繁简转换");
            Arc::new(IdentityConverter)
        }
    }
}
