//! 结果导出
//!
//! 把 Request → Input → Template → Task 的连接投影为扁平结果行，
//! 再序列化成 CSV。纯投影，不修改任何任务或请求状态。
//! 行按输入 id 的数字后缀排序（即输入的录入顺序）。

use crate::models::{id_seq, TaskStatus};
use crate::orchestrator::BatchState;

/// 导出行，列依次为 RequestID / InputText / TemplateName / Status / TokensUsed / Result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRow {
    pub request_id: String,
    pub input_text: String,
    pub template_name: String,
    pub status: String,
    pub tokens_used: String,
    pub result: String,
}

/// 连接四类集合并投影为导出行
///
/// 输入或模板已缺失的请求跳过；非终态任务的结果列用方括号占位。
pub(crate) fn project_rows(state: &BatchState) -> Vec<ExportRow> {
    let mut keyed: Vec<(u64, ExportRow)> = Vec::with_capacity(state.requests.len());

    for request in &state.requests {
        let Some(input) = state.find_input(&request.input_id) else {
            continue;
        };
        let Some(template) = state.find_template(&request.template_id) else {
            continue;
        };
        let task = state.tasks.get(&request.local_id);

        let status = task.map(|t| t.status).unwrap_or(TaskStatus::Pending);
        let tokens_used = task
            .and_then(|t| t.usage)
            .map(|u| u.total_tokens.to_string())
            .unwrap_or_else(|| "-".to_string());
        let result = match task {
            Some(t) if t.status.is_terminal() => t.result.clone().unwrap_or_default(),
            _ => format!("[{}]", status.display_label()),
        };

        keyed.push((
            id_seq(&request.input_id),
            ExportRow {
                request_id: request.local_id.clone(),
                input_text: input.content.clone(),
                template_name: template.name.clone(),
                status: status.display_label().to_string(),
                tokens_used,
                result,
            },
        ));
    }

    keyed.sort_by_key(|(seq, _)| *seq);
    keyed.into_iter().map(|(_, row)| row).collect()
}

/// 序列化为 CSV 文本，带 UTF-8 BOM（中文内容在表格软件中可直接打开）
pub fn to_csv(rows: &[ExportRow]) -> String {
    let mut csv = String::from("\u{feff}");
    csv.push_str("RequestID,InputText,TemplateName,Status,TokensUsed,Result\n");
    for row in rows {
        let fields = [
            &row.request_id,
            &row.input_text,
            &row.template_name,
            &row.status,
            &row.tokens_used,
            &row.result,
        ];
        let line: Vec<String> = fields.iter().map(|f| escape_field(f)).collect();
        csv.push_str(&line.join(","));
        csv.push('\n');
    }
    csv
}

fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("普通文本"), "普通文本");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("说\"话\""), "\"说\"\"话\"\"\"");
        assert_eq!(escape_field("两\n行"), "\"两\n行\"");
    }

    #[test]
    fn test_to_csv_header_and_bom() {
        let rows = vec![ExportRow {
            request_id: "req-1".to_string(),
            input_text: "文本".to_string(),
            template_name: "摘要".to_string(),
            status: "已完成".to_string(),
            tokens_used: "42".to_string(),
            result: "结果".to_string(),
        }];
        let csv = to_csv(&rows);
        assert!(csv.starts_with('\u{feff}'));
        assert!(csv.contains("RequestID,InputText,TemplateName,Status,TokensUsed,Result"));
        assert!(csv.contains("req-1,文本,摘要,已完成,42,结果"));
    }
}
