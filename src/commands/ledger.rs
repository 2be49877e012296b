//! 台账相关命令

use crate::db::LedgerEntry;
use crate::AppState;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub total: i64,
    /// (类别 ID, 类别名, 条目数)
    pub by_category: Vec<(String, String, i64)>,
}

/// 台账统计
pub async fn ledger_stats(state: &AppState) -> Result<LedgerStats, String> {
    let total = state
        .ledger
        .count_all()
        .await
        .map_err(|e| format!("统计台账失败: {}", e))?;

    let categories = state
        .categories
        .list()
        .await
        .map_err(|e| format!("加载类别失败: {}", e))?;

    let mut by_category = Vec::with_capacity(categories.len());
    for category in categories {
        let count = state
            .ledger
            .count_by_category(&category.id)
            .await
            .map_err(|e| format!("统计台账失败: {}", e))?;
        by_category.push((category.id, category.name, count));
    }

    Ok(LedgerStats { total, by_category })
}

/// 列出类别下的台账条目
pub async fn list_entries(state: &AppState, category_id: &str) -> Result<Vec<LedgerEntry>, String> {
    state
        .ledger
        .list_by_category(category_id)
        .await
        .map_err(|e| format!("读取台账失败: {}", e))
}

/// 从台账移除条目，下一次运行会重新传输该内容
pub async fn purge_entries(state: &AppState, hashes: &[String]) -> Result<usize, String> {
    let mut removed = 0;
    for hash in hashes {
        if state
            .ledger
            .delete_by_hash(hash.trim())
            .await
            .map_err(|e| format!("删除台账条目失败: {}", e))?
        {
            removed += 1;
        }
    }
    Ok(removed)
}
