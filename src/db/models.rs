use serde::{Deserialize, Serialize};

/// 类别 ID：照片
pub const ID_PHOTO: &str = "photo";
/// 类别 ID：音乐
pub const ID_MUSIC: &str = "music";
/// 类别 ID：文档
pub const ID_DOCUMENT: &str = "document";
/// 自定义类别 ID 前缀
pub const PREFIX_CUSTOM: &str = "custom_";

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "flac", "wav", "ogg", "wma"];
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "md",
];

/// 媒体类型，决定扫描时的扩展名过滤
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Music,
    Document,
    Custom,
}

impl MediaType {
    /// 该类型允许的扩展名（小写，不含点）
    pub fn extensions(&self) -> Vec<&'static str> {
        match self {
            MediaType::Photo => IMAGE_EXTENSIONS.to_vec(),
            MediaType::Music => AUDIO_EXTENSIONS.to_vec(),
            MediaType::Document => DOCUMENT_EXTENSIONS.to_vec(),
            MediaType::Custom => IMAGE_EXTENSIONS
                .iter()
                .chain(AUDIO_EXTENSIONS)
                .chain(DOCUMENT_EXTENSIONS)
                .copied()
                .collect(),
        }
    }

    /// 扩展名是否属于该类型（大小写不敏感）
    pub fn accepts(&self, extension: &str) -> bool {
        let ext = extension.to_lowercase();
        self.extensions().iter().any(|e| *e == ext)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Photo => "photo",
            MediaType::Music => "music",
            MediaType::Document => "document",
            MediaType::Custom => "custom",
        }
    }
}

impl std::str::FromStr for MediaType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "photo" => Ok(MediaType::Photo),
            "music" => Ok(MediaType::Music),
            "document" => Ok(MediaType::Document),
            "custom" => Ok(MediaType::Custom),
            _ => Err(anyhow::anyhow!("Invalid media type: {}", s)),
        }
    }
}

/// 备份类别
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub media_type: MediaType,
    /// 源文件夹（绝对路径，有序）
    pub source_folders: Vec<String>,
    /// 目标描述符（本地目录或 "cloud"，有序）
    pub destinations: Vec<String>,
}

impl Category {
    pub fn new(id: &str, name: &str, media_type: MediaType) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            media_type,
            source_folders: Vec::new(),
            destinations: Vec::new(),
        }
    }

    /// 首次使用时的三个内置类别
    pub fn defaults() -> Vec<Category> {
        vec![
            Category::new(ID_PHOTO, "照片", MediaType::Photo),
            Category::new(ID_MUSIC, "音乐", MediaType::Music),
            Category::new(ID_DOCUMENT, "文档", MediaType::Document),
        ]
    }

    pub fn is_builtin_id(id: &str) -> bool {
        id == ID_PHOTO || id == ID_MUSIC || id == ID_DOCUMENT
    }

    pub fn is_builtin(&self) -> bool {
        Self::is_builtin_id(&self.id)
    }
}

/// 台账条目：一次成功传输的记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub content_hash: String,
    pub source_path: String,
    pub file_name: String,
    pub file_size_bytes: i64,
    pub transferred_at_epoch_ms: i64,
    /// 本地目录路径或 "cloud"
    pub destination_descriptor: String,
    pub category_id: Option<String>,
    /// 仅云端传输时有值
    pub remote_object_id: Option<String>,
}

/// 最近一次运行的结果快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// 结束时间（毫秒时间戳）
    pub timestamp: i64,
    pub success: bool,
    pub success_count: u32,
    pub skip_count: u32,
    pub fail_count: u32,
    pub error_message: Option<String>,
}

// 数据库表模型
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CategoryRow {
    pub id: String,
    pub name: String,
    pub media_type: String,
    pub source_folders: String,
    pub destinations: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<CategoryRow> for Category {
    type Error = anyhow::Error;

    fn try_from(row: CategoryRow) -> Result<Self, Self::Error> {
        Ok(Category {
            id: row.id,
            name: row.name,
            media_type: row.media_type.parse()?,
            source_folders: serde_json::from_str(&row.source_folders)?,
            destinations: serde_json::from_str(&row.destinations)?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerRow {
    pub content_hash: String,
    pub source_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub transferred_at: i64,
    pub destination: String,
    pub category_id: Option<String>,
    pub remote_id: Option<String>,
}

impl From<LedgerRow> for LedgerEntry {
    fn from(row: LedgerRow) -> Self {
        LedgerEntry {
            content_hash: row.content_hash,
            source_path: row.source_path,
            file_name: row.file_name,
            file_size_bytes: row.file_size,
            transferred_at_epoch_ms: row.transferred_at,
            destination_descriptor: row.destination,
            category_id: row.category_id,
            remote_object_id: row.remote_id,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunStatusRow {
    pub timestamp: i64,
    pub success: bool,
    pub success_count: i64,
    pub skip_count: i64,
    pub fail_count: i64,
    pub error_message: Option<String>,
}

impl From<RunStatusRow> for RunSummary {
    fn from(row: RunStatusRow) -> Self {
        RunSummary {
            timestamp: row.timestamp,
            success: row.success,
            success_count: row.success_count as u32,
            skip_count: row.skip_count as u32,
            fail_count: row.fail_count as u32,
            error_message: row.error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_filter_is_case_insensitive() {
        assert!(MediaType::Photo.accepts("JPG"));
        assert!(MediaType::Photo.accepts("webp"));
        assert!(!MediaType::Photo.accepts("txt"));
        assert!(MediaType::Document.accepts("txt"));
    }

    #[test]
    fn test_custom_is_union() {
        let custom = MediaType::Custom;
        assert!(custom.accepts("flac"));
        assert!(custom.accepts("png"));
        assert!(custom.accepts("pptx"));
        assert!(!custom.accepts("exe"));
    }

    #[test]
    fn test_builtin_ids() {
        let defaults = Category::defaults();
        assert_eq!(defaults.len(), 3);
        assert!(defaults.iter().all(Category::is_builtin));
        assert!(!Category::is_builtin_id("custom_1234abcd"));
    }
}
