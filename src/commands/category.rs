//! 类别相关命令

use crate::core::FileScanner;
use crate::db::Category;
use crate::AppState;
use serde::Serialize;
use std::path::PathBuf;

/// 类别及其统计
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    #[serde(flatten)]
    pub category: Category,
    /// 已备份（台账中）的文件数
    pub backed_up: i64,
    /// 源文件夹中符合类型的文件数
    pub local_files: usize,
}

/// 获取所有类别
pub async fn list_categories(state: &AppState) -> Result<Vec<CategoryStats>, String> {
    let categories = state
        .categories
        .list()
        .await
        .map_err(|e| format!("加载类别失败: {}", e))?;

    let mut result = Vec::with_capacity(categories.len());
    for category in categories {
        let backed_up = state
            .ledger
            .count_by_category(&category.id)
            .await
            .map_err(|e| format!("统计台账失败: {}", e))?;

        let folders: Vec<PathBuf> = category.source_folders.iter().map(PathBuf::from).collect();
        let scanner = FileScanner::new(category.media_type);
        let local_files = tokio::task::spawn_blocking(move || scanner.count(&folders))
            .await
            .map_err(|e| format!("统计本地文件失败: {}", e))?;

        result.push(CategoryStats {
            category,
            backed_up,
            local_files,
        });
    }
    Ok(result)
}

/// 新增自定义类别
pub async fn add_category(state: &AppState, name: &str) -> Result<Category, String> {
    if name.trim().is_empty() {
        return Err("类别名称不能为空".to_string());
    }
    state
        .categories
        .add_custom(name)
        .await
        .map_err(|e| format!("创建类别失败: {}", e))
}

/// 删除自定义类别
pub async fn remove_category(state: &AppState, id: &str) -> Result<(), String> {
    if Category::is_builtin_id(id) {
        return Err(format!("内置类别不可删除: {}", id));
    }
    let removed = state
        .categories
        .remove(id)
        .await
        .map_err(|e| format!("删除类别失败: {}", e))?;
    if removed {
        Ok(())
    } else {
        Err(format!("类别不存在: {}", id))
    }
}

/// 设置源文件夹，文件夹必须存在
pub async fn set_folders(
    state: &AppState,
    id: &str,
    folders: Vec<String>,
) -> Result<Category, String> {
    if let Some(missing) = folders
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .find(|f| !PathBuf::from(f).is_dir())
    {
        return Err(format!("文件夹不存在: {}", missing));
    }

    state
        .categories
        .set_source_folders(id, &folders)
        .await
        .map_err(|e| format!("保存类别失败: {}", e))
}

/// 设置备份目标（本地目录或 "cloud"）
pub async fn set_destinations(
    state: &AppState,
    id: &str,
    destinations: Vec<String>,
) -> Result<Category, String> {
    let uses_cloud = destinations
        .iter()
        .any(|d| d.trim() == crate::storage::CLOUD_SENTINEL);
    if uses_cloud && !state.selector.cloud().is_complete() {
        tracing::warn!("已选择云端目标，但尚未配置云端地址或用户标识");
    }

    state
        .categories
        .set_destinations(id, &destinations)
        .await
        .map_err(|e| format!("保存类别失败: {}", e))
}
