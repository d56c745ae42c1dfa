use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Fixed category enumeration. Declaration order is the folder order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "社交通讯")]
    Social,
    #[serde(rename = "影音娱乐")]
    Entertainment,
    #[serde(rename = "购物电商")]
    Shopping,
    #[serde(rename = "金融支付")]
    Finance,
    #[serde(rename = "出行旅行")]
    Travel,
    #[serde(rename = "外卖生活")]
    FoodDelivery,
    #[serde(rename = "生活服务")]
    LifeServices,
    #[serde(rename = "系统工具")]
    SystemTools,
    #[serde(rename = "学校学习")]
    Learning,
    #[serde(rename = "媒体工具")]
    MediaTools,
    #[serde(rename = "资讯社区")]
    NewsCommunity,
    #[serde(rename = "浏览器")]
    Browser,
    #[serde(rename = "智能家居")]
    SmartHome,
    #[serde(rename = "游戏")]
    Games,
    #[serde(rename = "系统应用")]
    SystemApps,
    #[serde(rename = "代理工具")]
    ProxyTools,
    #[serde(rename = "Root工具")]
    RootTools,
    #[serde(rename = "AI工具")]
    AiTools,
}

impl Category {
    pub const ALL: [Category; 18] = [
        Category::Social,
        Category::Entertainment,
        Category::Shopping,
        Category::Finance,
        Category::Travel,
        Category::FoodDelivery,
        Category::LifeServices,
        Category::SystemTools,
        Category::Learning,
        Category::MediaTools,
        Category::NewsCommunity,
        Category::Browser,
        Category::SmartHome,
        Category::Games,
        Category::SystemApps,
        Category::ProxyTools,
        Category::RootTools,
        Category::AiTools,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Social => "社交通讯",
            Category::Entertainment => "影音娱乐",
            Category::Shopping => "购物电商",
            Category::Finance => "金融支付",
            Category::Travel => "出行旅行",
            Category::FoodDelivery => "外卖生活",
            Category::LifeServices => "生活服务",
            Category::SystemTools => "系统工具",
            Category::Learning => "学校学习",
            Category::MediaTools => "媒体工具",
            Category::NewsCommunity => "资讯社区",
            Category::Browser => "浏览器",
            Category::SmartHome => "智能家居",
            Category::Games => "游戏",
            Category::SystemApps => "系统应用",
            Category::ProxyTools => "代理工具",
            Category::RootTools => "Root工具",
            Category::AiTools => "AI工具",
        }
    }

    /// 1-based position in the enumeration, as shown in prompts.
    pub fn ordinal(self) -> usize {
        Category::ALL
            .iter()
            .position(|c| *c == self)
            .map(|i| i + 1)
            .unwrap_or(0)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a known category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.label() == wanted)
            .ok_or_else(|| UnknownCategory(wanted.to_string()))
    }
}

/// Which classifier produced a record. Declaration order is lookup priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    RemoteInternational,
    RemoteDomestic,
    Ai,
    Manual,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Source::RemoteInternational => "remote_international",
            Source::RemoteDomestic => "remote_domestic",
            Source::Ai => "ai",
            Source::Manual => "manual",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Resolved,
    Pending,
    Failed,
    Skipped,
}

impl Status {
    /// Whether the classifier should look at this identifier again.
    pub fn needs_lookup(self) -> bool {
        matches!(self, Status::Pending | Status::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Resolved => "resolved",
            Status::Pending => "pending",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub category: Option<Category>,
    pub source: Option<Source>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ClassificationRecord {
    pub fn resolved(identifier: impl Into<String>, category: Category, source: Source) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: None,
            category: Some(category),
            source: Some(source),
            status: Status::Resolved,
            note: None,
            updated_at: Utc::now(),
        }
    }

    pub fn failed(identifier: impl Into<String>, source: Source, note: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: None,
            category: None,
            source: Some(source),
            status: Status::Failed,
            note: Some(note.into()),
            updated_at: Utc::now(),
        }
    }

    pub fn skipped(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: None,
            category: None,
            source: Some(Source::Manual),
            status: Status::Skipped,
            note: None,
            updated_at: Utc::now(),
        }
    }

    pub fn pending(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: None,
            category: None,
            source: None,
            status: Status::Pending,
            note: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = at;
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.status == Status::Resolved && self.category.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub by_status: BTreeMap<Status, usize>,
    pub by_category: BTreeMap<Category, usize>,
}

impl CacheStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ClassificationRecord>) -> Self {
        let mut stats = CacheStats::default();
        for record in records {
            stats.total += 1;
            *stats.by_status.entry(record.status).or_default() += 1;
            if let (Status::Resolved, Some(category)) = (record.status, record.category) {
                *stats.by_category.entry(category).or_default() += 1;
            }
        }
        stats
    }

    pub fn count(&self, status: Status) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}
