use crate::db::{Category, MediaType};
use crate::storage::Destination;
use std::path::PathBuf;

/// 一次运行的输入
///
/// 间隔、网络与充电条件只是给调度方的提示，引擎本身不检查。
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source_folders: Vec<PathBuf>,
    pub destinations: Vec<Destination>,
    pub interval_minutes: u32,
    pub requires_network: bool,
    pub requires_charging: bool,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
    pub media_type: MediaType,
    /// 手动触发（"立即运行"），不受周期下限约束
    pub manual: bool,
}

impl TransferRequest {
    /// 从逗号分隔的文件夹和目标列表构造请求，空白项被忽略
    pub fn parse(folders: &str, destinations: &str, media_type: MediaType) -> Self {
        let source_folders = folders
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(PathBuf::from)
            .collect();

        Self {
            source_folders,
            destinations: Destination::parse_list(destinations),
            interval_minutes: 0,
            requires_network: false,
            requires_charging: false,
            category_id: None,
            category_name: None,
            media_type,
            manual: true,
        }
    }

    /// 按类别配置构造请求
    pub fn from_category(category: &Category) -> Self {
        Self {
            source_folders: category.source_folders.iter().map(PathBuf::from).collect(),
            destinations: category
                .destinations
                .iter()
                .filter_map(|d| Destination::parse(d))
                .collect(),
            interval_minutes: 0,
            requires_network: false,
            requires_charging: false,
            category_id: Some(category.id.clone()),
            category_name: Some(category.name.clone()),
            media_type: category.media_type,
            manual: true,
        }
    }

    /// 周期运行
    pub fn scheduled(mut self, interval_minutes: u32) -> Self {
        self.interval_minutes = interval_minutes;
        self.manual = false;
        self
    }

    pub fn with_constraints(mut self, requires_network: bool, requires_charging: bool) -> Self {
        self.requires_network = requires_network;
        self.requires_charging = requires_charging;
        self
    }

    pub fn with_category(mut self, id: Option<String>, name: Option<String>) -> Self {
        self.category_id = id;
        self.category_name = name;
        self
    }

    /// 云端上传时携带的类别：优先类别名，其次类别 ID
    pub fn category_hint(&self) -> Option<&str> {
        self.category_name
            .as_deref()
            .or(self.category_id.as_deref())
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// 首个目标为云端时整个运行只上传云端
    pub fn is_cloud_mode(&self) -> bool {
        self.destinations
            .first()
            .map(Destination::is_remote)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_and_filters() {
        let request = TransferRequest::parse(" /a , ,/b,", "cloud, /backup", MediaType::Photo);
        assert_eq!(
            request.source_folders,
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
        assert_eq!(request.destinations.len(), 2);
        assert!(request.is_cloud_mode());
        assert!(request.manual);
    }

    #[test]
    fn test_from_category() {
        let mut category = Category::new("music", "音乐", MediaType::Music);
        category.source_folders = vec!["/m".to_string()];
        category.destinations = vec!["/backup".to_string(), "cloud".to_string()];

        let request = TransferRequest::from_category(&category).scheduled(30);
        assert_eq!(request.category_hint(), Some("音乐"));
        assert!(!request.is_cloud_mode());
        assert!(!request.manual);
        assert_eq!(request.interval_minutes, 30);
    }

    #[test]
    fn test_category_hint_falls_back_to_id() {
        let request = TransferRequest::parse("/a", "cloud", MediaType::Custom)
            .with_category(Some("custom_1234abcd".to_string()), None);
        assert_eq!(request.category_hint(), Some("custom_1234abcd"));

        let bare = TransferRequest::parse("/a", "cloud", MediaType::Custom);
        assert_eq!(bare.category_hint(), None);
    }
}
