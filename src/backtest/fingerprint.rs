//! 回测请求指纹
//!
//! 指纹 = blake3(规范化序列化)。规范化规则：
//! - 参数按键排序，键名去除首尾空白
//! - 标的代码去空白并转大写
//! - 整数值浮点数按整数输出（`5.0` -> `5`），`-0.0` -> `0`
//! - 其它浮点数使用最短往返格式

use crate::backtest::model::{BacktestRequest, ParamValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const FINGERPRINT_VERSION: &str = "BTFP_V1";

/// 2^53，超过该值的浮点数不再保证整数精度
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(request: &BacktestRequest) -> Self {
        let canonical = canonical_form(request);
        Self(blake3::hash(canonical.as_bytes()).to_hex().to_string())
    }

    /// 从持久化的十六进制字符串恢复，长度或字符不合法时返回 None
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(hex.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn canonical_number(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if v == 0.0 {
        return "0".to_string();
    }
    if v.fract() == 0.0 && v.abs() < MAX_EXACT_INT {
        return format!("{}", v as i64);
    }
    format!("{}", v)
}

fn canonical_value(v: &ParamValue) -> String {
    match v {
        ParamValue::Bool(b) => format!("b:{}", b),
        ParamValue::Int(i) => format!("n:{}", i),
        ParamValue::Float(f) => format!("n:{}", canonical_number(*f)),
        ParamValue::Text(s) => format!("s:{}", quote(s)),
    }
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// 规范化序列化（指纹输入）
pub fn canonical_form(request: &BacktestRequest) -> String {
    let params: BTreeMap<String, String> = request
        .parameters
        .iter()
        .map(|(k, v)| (k.trim().to_string(), canonical_value(v)))
        .collect();

    let mut out = String::new();
    out.push_str(FINGERPRINT_VERSION);
    out.push('\n');
    out.push_str(&format!("symbol={}\n", quote(&request.normalized_symbol())));
    out.push_str(&format!("strategy={}\n", quote(request.strategy_name.trim())));
    out.push_str(&format!("start={}\n", request.start_date.format("%Y-%m-%d")));
    out.push_str(&format!("end={}\n", request.end_date.format("%Y-%m-%d")));
    out.push_str(&format!(
        "resolution={}\n",
        quote(&request.resolution.trim().to_ascii_lowercase())
    ));
    for (k, v) in &params {
        out.push_str(&format!("param.{}={}\n", quote(k), v));
    }
    out
}
