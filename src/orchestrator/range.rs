//! 范围表达式解析
//!
//! 把 "1,3-5" 这样的表达式解析为一组 0 基索引。表达式按逗号分段，
//! 段可以是单个整数或 `起-止` 的闭区间，均为 1 基、指向输入的展示顺序。
//! 非法段（无法解析的数字、起大于止）跳过并记一条 warn 日志，不致命。

use std::collections::BTreeSet;
use tracing::warn;

/// 解析范围表达式，返回去重后的 0 基索引集合
///
/// 结果集是 `[0, n)` 的子集；越界的编号直接忽略。
pub fn parse_range_expr(expr: &str, n: usize) -> BTreeSet<usize> {
    let mut indices = BTreeSet::new();

    for token in expr.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        if let Some((start_str, end_str)) = token.split_once('-') {
            let start: usize = match start_str.trim().parse() {
                Ok(v) => v,
                Err(_) => {
                    warn!("范围段无法解析，已跳过: '{}'", token);
                    continue;
                }
            };
            let end: usize = match end_str.trim().parse() {
                Ok(v) => v,
                Err(_) => {
                    warn!("范围段无法解析，已跳过: '{}'", token);
                    continue;
                }
            };
            if start > end {
                warn!("范围段起大于止，已跳过: '{}'", token);
                continue;
            }
            for i in start..=end {
                if i >= 1 && i <= n {
                    indices.insert(i - 1);
                }
            }
        } else {
            match token.parse::<usize>() {
                Ok(i) if i >= 1 && i <= n => {
                    indices.insert(i - 1);
                }
                Ok(_) => {}
                Err(_) => {
                    warn!("编号无法解析，已跳过: '{}'", token);
                }
            }
        }
    }

    indices
}
