//! 接口 JSON 的宽松取值。
//!
//! 晋江接口同一字段时而是字符串、时而是数字，这里统一成字符串/布尔处理。

use serde_json::Value;

pub type JsonMap = serde_json::Map<String, Value>;

fn scalar_to_string(val: &Value) -> Option<String> {
    match val {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().filter(|f| f.is_finite()).map(|f| f.to_string())
            }
        }
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    }
}

/// 依次尝试 `keys`，返回第一个非空（去首尾空白后）的标量值。
pub fn pick_string(map: &JsonMap, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = map.get(*key).and_then(scalar_to_string) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// 原样取字段（不去空白，空串也算存在）；正文与作者有话说用它。
pub fn pick_text(map: &JsonMap, key: &str) -> Option<String> {
    map.get(key).and_then(scalar_to_string)
}

/// 取字段，缺失或非标量时给空串。
pub fn string_or_empty(map: &JsonMap, key: &str) -> String {
    pick_string(map, &[key]).unwrap_or_default()
}

/// 真值判定：非零数字、`true`、除 `"0"`/`"false"` 外的非空字符串。
pub fn pick_flag(map: &JsonMap, key: &str) -> bool {
    match map.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => {
            let t = s.trim();
            !t.is_empty() && t != "0" && !t.eq_ignore_ascii_case("false")
        }
        _ => false,
    }
}
