//! 测试辅助函数

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use calamine::{open_workbook, Data, Reader, Xlsx};

/// 轮询直到条件成立或超时
pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition().await
}

/// 生成一个单工作表的结果工作簿
pub fn result_workbook(rows: &[(&str, f64)]) -> Vec<u8> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "metric").unwrap();
    sheet.write_string(0, 1, "value").unwrap();
    for (i, (name, value)) in rows.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, *name).unwrap();
        sheet.write_number(row, 1, *value).unwrap();
    }
    workbook.save_to_buffer().unwrap()
}

/// 写入一个结果工作簿文件，父目录不存在时创建
pub fn write_result_workbook(path: &Path, rows: &[(&str, f64)]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, result_workbook(rows)).unwrap();
}

/// 读取工作簿中所有工作表名称
pub fn sheet_names(path: &Path) -> Vec<String> {
    let workbook: Xlsx<_> = open_workbook(path).unwrap();
    workbook.sheet_names().to_vec()
}

/// 读取指定工作表的单元格文本，按行返回
pub fn sheet_rows(path: &Path, sheet: &str) -> Vec<Vec<String>> {
    let mut workbook: Xlsx<_> = open_workbook(path).unwrap();
    let range = workbook.worksheet_range(sheet).unwrap();
    range
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    Data::Empty => String::new(),
                    other => other.to_string(),
                })
                .collect()
        })
        .collect()
}
