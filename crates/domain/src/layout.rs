//! 结果文件与配置快照的目录布局
//!
//! ```text
//! <reports_root>/<taskName>_<taskUUID>/<runTimestamp>/<hostname>_<ipSuffix>_<taskUUID>_result.xlsx
//! <reports_root>/<taskName>_<taskUUID>/<runTimestamp>/overview.xlsx
//! <node_configs_root>/<nodeUUID>_config.ini
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Timelike, Utc};
use uuid::Uuid;

use crate::entities::{Node, Task};

pub const OVERVIEW_FILE_NAME: &str = "overview.xlsx";
pub const RESULT_FILE_SUFFIX: &str = "_result.xlsx";

/// Excel 工作表名称的最大长度
const MAX_SHEET_NAME_LEN: usize = 31;

/// 生成可用于路径的时间戳：ISO-8601，`:` 换成 `-`，`.` 换成 `_`，去掉时区后缀
///
/// 微秒为 0 时不输出小数部分。
pub fn run_timestamp(dt: DateTime<Utc>) -> String {
    let mut iso = dt.format("%Y-%m-%dT%H:%M:%S").to_string();
    let micros = dt.nanosecond() / 1_000 % 1_000_000;
    if micros != 0 {
        iso.push_str(&format!(".{micros:06}"));
    }
    iso.replace(':', "-").replace('.', "_")
}

/// 工作表名称不允许出现 `[]:*?/\`，且不超过 31 个字符
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            other => other,
        })
        .take(MAX_SHEET_NAME_LEN)
        .collect();

    if cleaned.is_empty() {
        "Sheet".to_string()
    } else {
        cleaned
    }
}

fn path_component(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect()
}

/// 存储目录布局
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    reports_root: PathBuf,
    node_configs_root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(reports_root: impl Into<PathBuf>, node_configs_root: impl Into<PathBuf>) -> Self {
        Self {
            reports_root: reports_root.into(),
            node_configs_root: node_configs_root.into(),
        }
    }

    /// 以 `root/Reports` 与 `root/nodeConfigs` 作为存储目录
    pub fn under(root: &Path) -> Self {
        Self::new(root.join("Reports"), root.join("nodeConfigs"))
    }

    pub fn reports_root(&self) -> &Path {
        &self.reports_root
    }

    pub fn task_dir(&self, task: &Task) -> PathBuf {
        self.reports_root
            .join(path_component(&format!("{}_{}", task.name, task.id)))
    }

    /// 一次运行的目录，以任务的开始时间区分
    pub fn run_dir(&self, task: &Task) -> PathBuf {
        self.task_dir(task).join(run_timestamp(task.start_time))
    }

    pub fn result_file_name(task: &Task, node: &Node) -> String {
        path_component(&format!(
            "{}_{}{}",
            node.artifact_prefix(),
            task.id,
            RESULT_FILE_SUFFIX
        ))
    }

    pub fn result_path(&self, task: &Task, node: &Node) -> PathBuf {
        self.run_dir(task).join(Self::result_file_name(task, node))
    }

    pub fn overview_path(&self, task: &Task) -> PathBuf {
        self.run_dir(task).join(OVERVIEW_FILE_NAME)
    }

    pub fn node_config_path(&self, node_id: Uuid) -> PathBuf {
        self.node_configs_root.join(format!("{node_id}_config.ini"))
    }

    /// 从结果文件名中取出节点前缀作为工作表名称；不是该任务的结果文件时返回 `None`
    pub fn sheet_name_for(file_name: &str, task_id: Uuid) -> Option<String> {
        let suffix = format!("_{task_id}{RESULT_FILE_SUFFIX}");
        file_name
            .strip_suffix(&suffix)
            .filter(|prefix| !prefix.is_empty())
            .map(sanitize_sheet_name)
    }
}
