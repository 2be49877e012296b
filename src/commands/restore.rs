use crate::core::RestoreSummary;
use crate::AppState;
use std::collections::HashMap;
use std::path::Path;

/// 把类别下已备份的文件恢复到本地目录；`hashes` 为空时恢复全部
pub async fn restore_category(
    state: &AppState,
    category_id: &str,
    dest_dir: &Path,
    hashes: &[String],
) -> Result<RestoreSummary, String> {
    let mut entries = state
        .ledger
        .list_by_category(category_id)
        .await
        .map_err(|e| format!("读取台账失败: {}", e))?;
    if !hashes.is_empty() {
        entries.retain(|e| hashes.iter().any(|h| h.trim() == e.content_hash));
    }
    if entries.is_empty() {
        return Err("没有可恢复的文件".to_string());
    }

    let category_names: HashMap<String, String> = state
        .categories
        .list()
        .await
        .map_err(|e| format!("加载类别失败: {}", e))?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();

    Ok(state
        .engine
        .restore(&entries, dest_dir, &category_names)
        .await)
}
