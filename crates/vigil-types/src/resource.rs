use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 资源引用（list 调用的返回值）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,

    #[serde(rename = "type")]
    pub resource_type: String,

    pub region: String,

    /// 可读名称（部分服务的 list 接口会返回）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// list 接口附带的标签
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl ResourceRef {
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            region: region.into(),
            name: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// 资源详情快照，单次运行内不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,

    #[serde(rename = "type")]
    pub resource_type: String,

    pub region: String,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Resource {
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            region: region.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(&self.id, &self.resource_type, &self.region)
    }
}

/// 资源过滤条件
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFilter {
    /// id 或名称中包含的子串
    #[serde(default)]
    pub name_contains: Option<String>,

    /// 必须具备的标签
    #[serde(default)]
    pub required_tags: BTreeMap<String, String>,
}

impl ResourceFilter {
    /// 解析 `Key=Value` 形式的标签过滤条件，格式不对的条目直接忽略
    pub fn with_tag_specs<'a>(mut self, specs: impl IntoIterator<Item = &'a str>) -> Self {
        for spec in specs {
            if let Some((key, value)) = spec.split_once('=') {
                self.required_tags
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        self
    }

    pub fn matches(&self, resource: &ResourceRef) -> bool {
        if let Some(needle) = &self.name_contains {
            let in_id = resource.id.contains(needle.as_str());
            let in_name = resource
                .name
                .as_deref()
                .map(|n| n.contains(needle.as_str()))
                .unwrap_or(false);
            if !in_id && !in_name {
                return false;
            }
        }

        self.required_tags
            .iter()
            .all(|(k, v)| resource.tags.get(k) == Some(v))
    }
}
