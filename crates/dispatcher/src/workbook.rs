//! 结果工作簿合并

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Reader, Xlsx};
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use uuid::Uuid;

use logman_core::{transfer::write_atomic, SchedulerError, SchedulerResult};
use logman_domain::ArtifactLayout;

const DATE_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";
const MAX_SHEET_NAME_LEN: usize = 31;

fn spreadsheet_error(context: &str, err: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Spreadsheet(format!("{context}: {err}"))
}

/// 运行目录中属于该任务的结果文件，按文件名排序，附带对应的工作表名称
pub fn result_files(run_dir: &Path, task_id: Uuid) -> SchedulerResult<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(run_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if let Some(sheet) = ArtifactLayout::sheet_name_for(&file_name, task_id) {
            files.push((file_name, sheet, entry.path()));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(files
        .into_iter()
        .map(|(_, sheet, path)| (sheet, path))
        .collect())
}

/// Excel 工作表名称不区分大小写，重复时追加序号
fn unique_sheet_name(base: &str, used: &mut HashSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut n = 2;
    while used.contains(&candidate.to_lowercase()) {
        let suffix = format!("_{n}");
        let keep = MAX_SHEET_NAME_LEN.saturating_sub(suffix.chars().count());
        candidate = base.chars().take(keep).collect::<String>() + &suffix;
        n += 1;
    }
    used.insert(candidate.to_lowercase());
    candidate
}

fn copy_first_sheet(
    source_path: &Path,
    workbook: &mut Workbook,
    sheet_name: &str,
    date_format: &Format,
) -> SchedulerResult<()> {
    let mut source: Xlsx<_> = open_workbook(source_path)
        .map_err(|e| spreadsheet_error(&format!("打开 {}", source_path.display()), e))?;
    let range = source
        .worksheet_range_at(0)
        .ok_or_else(|| {
            SchedulerError::Spreadsheet(format!("{} 中没有工作表", source_path.display()))
        })?
        .map_err(|e| spreadsheet_error(&format!("读取 {}", source_path.display()), e))?;

    let target = workbook.add_worksheet();
    target
        .set_name(sheet_name)
        .map_err(|e| spreadsheet_error("设置工作表名称", e))?;

    let (row_offset, col_offset) = range.start().unwrap_or((0, 0));
    for (row, col, cell) in range.used_cells() {
        let row = row_offset + row as u32;
        let col = (col_offset as usize + col) as u16;
        let written: Result<_, XlsxError> = match cell {
            Data::Int(v) => target.write_number(row, col, *v as f64).map(|_| ()),
            Data::Float(v) => target.write_number(row, col, *v).map(|_| ()),
            Data::String(v) | Data::DateTimeIso(v) | Data::DurationIso(v) => {
                target.write_string(row, col, v).map(|_| ())
            }
            Data::Bool(v) => target.write_boolean(row, col, *v).map(|_| ()),
            Data::DateTime(v) => target
                .write_number_with_format(row, col, v.as_f64(), date_format)
                .map(|_| ()),
            Data::Error(_) | Data::Empty => Ok(()),
        };
        written.map_err(|e| spreadsheet_error("写入单元格", e))?;
    }
    Ok(())
}

/// 把每个结果文件的第一个工作表复制为总览工作簿中的一个工作表，原子地写入 `output`
///
/// 返回写入的工作表数量。
pub fn merge_result_workbooks(
    files: &[(String, PathBuf)],
    output: &Path,
) -> SchedulerResult<usize> {
    let mut workbook = Workbook::new();
    let date_format = Format::new().set_num_format(DATE_FORMAT);
    let mut used = HashSet::new();

    for (sheet, path) in files {
        let name = unique_sheet_name(sheet, &mut used);
        copy_first_sheet(path, &mut workbook, &name, &date_format)?;
    }

    let buffer = workbook
        .save_to_buffer()
        .map_err(|e| spreadsheet_error("生成总览工作簿", e))?;
    write_atomic(output, &buffer)?;
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use logman_testing_utils::{sheet_names, sheet_rows, write_result_workbook};

    #[test]
    fn test_merge_creates_one_sheet_per_file_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = Uuid::new_v4();
        for (prefix, value) in [("NodeB_2", 2.0), ("NodeA_1", 1.0), ("NodeC_3", 3.0)] {
            write_result_workbook(
                &dir.path().join(format!("{prefix}_{task_id}_result.xlsx")),
                &[("cpu", value)],
            );
        }
        // 其他任务的结果文件与总览文件不参与合并
        write_result_workbook(
            &dir.path().join(format!("NodeD_4_{}_result.xlsx", Uuid::new_v4())),
            &[("cpu", 4.0)],
        );

        let files = result_files(dir.path(), task_id).unwrap();
        assert_eq!(files.len(), 3);

        let output = dir.path().join("overview.xlsx");
        assert_eq!(merge_result_workbooks(&files, &output).unwrap(), 3);

        assert_eq!(sheet_names(&output), vec!["NodeA_1", "NodeB_2", "NodeC_3"]);
        let rows = sheet_rows(&output, "NodeB_2");
        assert_eq!(rows[0], vec!["metric", "value"]);
        assert_eq!(rows[1], vec!["cpu", "2"]);
    }

    #[test]
    fn test_unique_sheet_names() {
        let mut used = HashSet::new();
        assert_eq!(unique_sheet_name("web_1", &mut used), "web_1");
        assert_eq!(unique_sheet_name("WEB_1", &mut used), "WEB_1_2");

        let long = "x".repeat(31);
        assert_eq!(unique_sheet_name(&long, &mut used), long);
        let second = unique_sheet_name(&long, &mut used);
        assert_eq!(second.chars().count(), 31);
        assert!(second.ends_with("_2"));
    }

    #[test]
    fn test_unreadable_result_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = Uuid::new_v4();
        let bad = dir.path().join(format!("NodeA_1_{task_id}_result.xlsx"));
        std::fs::write(&bad, b"not a workbook").unwrap();

        let files = result_files(dir.path(), task_id).unwrap();
        let output = dir.path().join("overview.xlsx");
        assert!(matches!(
            merge_result_workbooks(&files, &output),
            Err(SchedulerError::Spreadsheet(_))
        ));
        assert!(!output.exists());
    }
}
