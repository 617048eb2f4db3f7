use super::WindowError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Volume,
    MovingAverage,
    RelativeVolume,
    Gap,
    Price,
    Custom,
}

/// 单个过滤器配置（来自筛选请求，JSON 形式）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub name: String,
    pub kind: FilterKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub params: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

impl FilterConfig {
    pub fn new(name: impl Into<String>, kind: FilterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: true,
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRequirement {
    pub filter_name: String,
    pub filter_kind: FilterKind,
    pub lookback_days: u32,
}

pub struct FilterRequirementAnalyzer;

impl FilterRequirementAnalyzer {
    /// 逐个过滤器提取历史回看需求
    ///
    /// 无历史依赖的过滤器以 lookback_days = 0 保留；禁用的过滤器跳过。
    /// 缺少必填数值字段直接报校验错误，不做任何默认猜测。
    pub fn analyze(filters: &[FilterConfig]) -> Result<Vec<FilterRequirement>, WindowError> {
        filters
            .iter()
            .filter(|f| f.enabled)
            .map(|f| {
                Ok(FilterRequirement {
                    filter_name: f.name.clone(),
                    filter_kind: f.kind,
                    lookback_days: Self::lookback_for(f)?,
                })
            })
            .collect()
    }

    fn lookback_for(filter: &FilterConfig) -> Result<u32, WindowError> {
        if filter.name.trim().is_empty() {
            return Err(WindowError::invalid_filter(&filter.name, "filter name is empty"));
        }

        match filter.kind {
            FilterKind::Volume => {
                require_number(filter, "min_volume")?;
                Ok(optional_days(filter, "average_days")?.unwrap_or(0))
            }
            FilterKind::MovingAverage => require_days(filter, "period", false),
            FilterKind::RelativeVolume => {
                require_number(filter, "min_ratio")?;
                require_days(filter, "lookback_days", false)
            }
            // 需要前一交易日收盘价
            FilterKind::Gap => {
                require_number(filter, "min_gap_pct")?;
                Ok(1)
            }
            FilterKind::Price => {
                let min = optional_number(filter, "min_price")?;
                let max = optional_number(filter, "max_price")?;
                if min.is_none() && max.is_none() {
                    return Err(WindowError::invalid_filter(
                        &filter.name,
                        "price filter needs `min_price` or `max_price`",
                    ));
                }
                Ok(0)
            }
            FilterKind::Custom => require_days(filter, "lookback_days", true),
        }
    }
}

fn optional_number(filter: &FilterConfig, key: &str) -> Result<Option<f64>, WindowError> {
    match filter.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            WindowError::invalid_filter(&filter.name, format!("`{}` must be numeric, got {}", key, v))
        }),
    }
}

fn require_number(filter: &FilterConfig, key: &str) -> Result<f64, WindowError> {
    optional_number(filter, key)?.ok_or_else(|| {
        WindowError::invalid_filter(&filter.name, format!("missing required field `{}`", key))
    })
}

fn optional_days(filter: &FilterConfig, key: &str) -> Result<Option<u32>, WindowError> {
    let Some(raw) = optional_number(filter, key)? else {
        return Ok(None);
    };
    if raw < 0.0 || raw.fract() != 0.0 || raw > u32::MAX as f64 {
        return Err(WindowError::invalid_filter(
            &filter.name,
            format!("`{}` must be a non-negative whole number of days, got {}", key, raw),
        ));
    }
    Ok(Some(raw as u32))
}

fn require_days(filter: &FilterConfig, key: &str, allow_zero: bool) -> Result<u32, WindowError> {
    let days = optional_days(filter, key)?.ok_or_else(|| {
        WindowError::invalid_filter(&filter.name, format!("missing required field `{}`", key))
    })?;
    if days == 0 && !allow_zero {
        return Err(WindowError::invalid_filter(
            &filter.name,
            format!("`{}` must be positive", key),
        ));
    }
    Ok(days)
}
