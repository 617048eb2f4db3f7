use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::str::FromStr;

pub const USAGE: &str = "\
用法:
  plan <start> <end> <filters.json>             计算过滤器所需的扩展取数窗口
  backtest <requests.json>                       并行执行一批回测
  link <session> <symbol> <date> <backtest_id>   登记筛选结果与回测的关联
  links <session> <date> [SYM1,SYM2,...]         查看关联，并报告缺失的合格标的
  stats                                          存储统计
  help                                           显示本帮助";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    Plan {
        start: NaiveDate,
        end: NaiveDate,
        filters_path: String,
    },
    Backtest {
        requests_path: String,
    },
    Link {
        session_id: String,
        symbol: String,
        data_date: NaiveDate,
        backtest_id: String,
    },
    Links {
        session_id: String,
        data_date: NaiveDate,
        qualified: BTreeSet<String>,
    },
    Stats,
    Help,
    Unknown(String),
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

impl FromStr for AppCommand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.is_empty() {
            return Ok(AppCommand::Help);
        }

        match parts[0] {
            "plan" => match (
                parts.get(1).and_then(|s| parse_date(s)),
                parts.get(2).and_then(|s| parse_date(s)),
                parts.get(3),
            ) {
                (Some(start), Some(end), Some(path)) => Ok(AppCommand::Plan {
                    start,
                    end,
                    filters_path: path.to_string(),
                }),
                _ => Ok(AppCommand::Unknown(
                    "用法: plan <YYYY-MM-DD> <YYYY-MM-DD> <filters.json>".to_string(),
                )),
            },
            "backtest" => match parts.get(1) {
                Some(path) => Ok(AppCommand::Backtest {
                    requests_path: path.to_string(),
                }),
                None => Ok(AppCommand::Unknown("用法: backtest <requests.json>".to_string())),
            },
            "link" => match (
                parts.get(1),
                parts.get(2),
                parts.get(3).and_then(|s| parse_date(s)),
                parts.get(4),
            ) {
                (Some(session), Some(symbol), Some(date), Some(bt)) => Ok(AppCommand::Link {
                    session_id: session.to_string(),
                    symbol: symbol.to_string(),
                    data_date: date,
                    backtest_id: bt.to_string(),
                }),
                _ => Ok(AppCommand::Unknown(
                    "用法: link <session> <symbol> <YYYY-MM-DD> <backtest_id>".to_string(),
                )),
            },
            "links" => match (parts.get(1), parts.get(2).and_then(|s| parse_date(s))) {
                (Some(session), Some(date)) => {
                    let qualified = parts
                        .get(3)
                        .map(|list| {
                            list.split(',')
                                .map(|s| s.trim().to_ascii_uppercase())
                                .filter(|s| !s.is_empty())
                                .collect()
                        })
                        .unwrap_or_default();
                    Ok(AppCommand::Links {
                        session_id: session.to_string(),
                        data_date: date,
                        qualified,
                    })
                }
                _ => Ok(AppCommand::Unknown(
                    "用法: links <session> <YYYY-MM-DD> [SYM1,SYM2,...]".to_string(),
                )),
            },
            "stats" => Ok(AppCommand::Stats),
            "help" | "-h" | "--help" => Ok(AppCommand::Help),
            other => Ok(AppCommand::Unknown(format!("未知命令: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        let cmd: AppCommand = "plan 2025-07-01 2025-08-01 filters.json".parse().unwrap();
        assert_eq!(
            cmd,
            AppCommand::Plan {
                start: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
                filters_path: "filters.json".into(),
            }
        );

        let cmd: AppCommand = "links S1 2025-08-01 aapl,msft".parse().unwrap();
        match cmd {
            AppCommand::Links { qualified, .. } => {
                assert!(qualified.contains("AAPL") && qualified.contains("MSFT"))
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!("".parse::<AppCommand>().unwrap(), AppCommand::Help);
        assert_eq!("stats".parse::<AppCommand>().unwrap(), AppCommand::Stats);
    }

    #[test]
    fn malformed_arguments_yield_usage() {
        assert!(matches!(
            "plan 2025-13-01 2025-08-01 f.json".parse::<AppCommand>().unwrap(),
            AppCommand::Unknown(_)
        ));
        assert!(matches!(
            "link S1 AAPL".parse::<AppCommand>().unwrap(),
            AppCommand::Unknown(_)
        ));
        assert!(matches!(
            "frobnicate".parse::<AppCommand>().unwrap(),
            AppCommand::Unknown(_)
        ));
    }
}
