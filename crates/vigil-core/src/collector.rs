use crate::error::ProviderError;
use crate::provider::ProviderClient;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use vigil_types::{Resource, ResourceFilter, ResourceRef};

/// list 的结果；`retrieval_error` 不为空时 `refs` 可能不完整
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub refs: Vec<ResourceRef>,
    pub retrieval_error: Option<ProviderError>,
}

/// describe 的结果
#[derive(Debug, Clone)]
pub struct Described {
    pub resource: Option<Resource>,
    pub retrieval_error: Option<ProviderError>,
}

/// 资源清单采集器
///
/// provider 错误不会向上抛出，而是作为 `retrieval_error` 附在结果上。
/// 该层不做重试。
pub struct ResourceInventoryCollector {
    provider: Arc<dyn ProviderClient>,
    /// 已经报告过权限错误的 (resource_type, region)
    permission_reported: Mutex<HashSet<(String, String)>>,
}

impl ResourceInventoryCollector {
    pub fn new(provider: Arc<dyn ProviderClient>) -> Self {
        Self {
            provider,
            permission_reported: Mutex::new(HashSet::new()),
        }
    }

    pub async fn list(&self, resource_type: &str, region: &str, filter: &ResourceFilter) -> Inventory {
        match self.provider.list(resource_type, region).await {
            Ok(refs) => {
                let total = refs.len();
                let refs: Vec<ResourceRef> = refs.into_iter().filter(|r| filter.matches(r)).collect();
                debug!(
                    resource_type,
                    region,
                    total,
                    matched = refs.len(),
                    "Listed resources"
                );
                Inventory {
                    refs,
                    retrieval_error: None,
                }
            }
            Err(e) => {
                self.log_error(resource_type, region, "list", &e);
                Inventory {
                    refs: Vec::new(),
                    retrieval_error: Some(e),
                }
            }
        }
    }

    pub async fn describe(&self, resource: &ResourceRef) -> Described {
        match self.provider.describe(resource).await {
            Ok(described) => Described {
                resource: Some(described),
                retrieval_error: None,
            },
            Err(e) => {
                self.log_error(&resource.resource_type, &resource.region, "describe", &e);
                Described {
                    resource: None,
                    retrieval_error: Some(e),
                }
            }
        }
    }

    /// 权限错误每个 (类型, 区域) 只警告一次
    fn log_error(&self, resource_type: &str, region: &str, call: &str, error: &ProviderError) {
        if let ProviderError::Permission(_) = error {
            let first = self
                .permission_reported
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert((resource_type.to_string(), region.to_string()));
            if first {
                warn!(resource_type, region, call, "Permission denied: {}", error);
            } else {
                debug!(resource_type, region, call, "Permission denied again: {}", error);
            }
            return;
        }

        warn!(
            resource_type,
            region,
            call,
            kind = error.kind(),
            "Provider call failed, data unavailable: {}",
            error
        );
    }
}
