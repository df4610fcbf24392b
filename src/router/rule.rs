//! Host rules: the ordered checks that admit a destination hostname
//!
//! Every private endpoint may reach the shared allow-list. Beyond that it
//! may reach only its own storage accounts:
//! ```text
//! <imageRegistryStorageAccountName>.blob.<storageEndpointSuffix>
//! cluster<storageSuffix>.blob.<storageEndpointSuffix>
//! ```

use std::collections::HashSet;

use crate::registry::GatewayRecord;

/// Inputs a rule is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub allow_list: &'a HashSet<String>,
    pub storage_endpoint_suffix: &'a str,
    pub record: &'a GatewayRecord,
}

/// A single admission rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRule {
    /// Host is on the shared allow-list
    AllowList,
    /// Host is the blob endpoint of the record's image registry storage
    ImageRegistryStorage,
    /// Host is the blob endpoint of the record's cluster storage
    ClusterStorage,
}

impl HostRule {
    /// Rules in evaluation order
    pub const ORDERED: [HostRule; 3] = [
        HostRule::AllowList,
        HostRule::ImageRegistryStorage,
        HostRule::ClusterStorage,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::AllowList => "allow-list",
            Self::ImageRegistryStorage => "image-registry-storage",
            Self::ClusterStorage => "cluster-storage",
        }
    }

    /// Check `host` (already lowercased) against this rule.
    ///
    /// Storage rules never match when the record leaves their field empty.
    pub fn matches(&self, host: &str, ctx: &RuleContext<'_>) -> bool {
        match self {
            Self::AllowList => ctx.allow_list.contains(host),
            Self::ImageRegistryStorage => {
                let account = &ctx.record.image_registry_storage_account_name;
                !account.is_empty()
                    && host.eq_ignore_ascii_case(&format!(
                        "{}.blob.{}",
                        account, ctx.storage_endpoint_suffix
                    ))
            }
            Self::ClusterStorage => {
                let suffix = &ctx.record.storage_suffix;
                !suffix.is_empty()
                    && host.eq_ignore_ascii_case(&format!(
                        "cluster{}.blob.{}",
                        suffix, ctx.storage_endpoint_suffix
                    ))
            }
        }
    }

    /// First rule admitting `host`, if any
    pub fn first_match(host: &str, ctx: &RuleContext<'_>) -> Option<HostRule> {
        Self::ORDERED.into_iter().find(|rule| rule.matches(host, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> GatewayRecord {
        GatewayRecord {
            id: "1".to_string(),
            deleting: false,
            storage_suffix: "xxxxx".to_string(),
            image_registry_storage_account_name: "account1".to_string(),
        }
    }

    fn allow() -> HashSet<String> {
        ["login.microsoftonline.com".to_string()].into_iter().collect()
    }

    #[test]
    fn test_allow_list_rule() {
        let (allow, rec) = (allow(), record());
        let ctx = RuleContext {
            allow_list: &allow,
            storage_endpoint_suffix: "core.windows.net",
            record: &rec,
        };
        assert!(HostRule::AllowList.matches("login.microsoftonline.com", &ctx));
        assert!(!HostRule::AllowList.matches("login.microsoftonline.com.evil.com", &ctx));
    }

    #[test]
    fn test_storage_rules() {
        let (allow, rec) = (allow(), record());
        let ctx = RuleContext {
            allow_list: &allow,
            storage_endpoint_suffix: "core.windows.net",
            record: &rec,
        };
        assert!(HostRule::ImageRegistryStorage.matches("account1.blob.core.windows.net", &ctx));
        assert!(HostRule::ClusterStorage.matches("clusterxxxxx.blob.core.windows.net", &ctx));
        assert!(!HostRule::ClusterStorage.matches("account1.blob.core.windows.net", &ctx));
        assert!(!HostRule::ImageRegistryStorage.matches("account1.queue.core.windows.net", &ctx));
    }

    #[test]
    fn test_empty_record_fields_never_match() {
        let allow = allow();
        let rec = GatewayRecord {
            id: "1".to_string(),
            ..Default::default()
        };
        let ctx = RuleContext {
            allow_list: &allow,
            storage_endpoint_suffix: "core.windows.net",
            record: &rec,
        };
        assert!(!HostRule::ImageRegistryStorage.matches(".blob.core.windows.net", &ctx));
        assert!(!HostRule::ClusterStorage.matches("cluster.blob.core.windows.net", &ctx));
    }

    #[test]
    fn test_first_match_order() {
        let mut allow = allow();
        allow.insert("account1.blob.core.windows.net".to_string());
        let rec = record();
        let ctx = RuleContext {
            allow_list: &allow,
            storage_endpoint_suffix: "core.windows.net",
            record: &rec,
        };
        assert_eq!(
            HostRule::first_match("account1.blob.core.windows.net", &ctx),
            Some(HostRule::AllowList)
        );
        assert_eq!(HostRule::first_match("nope.example.com", &ctx), None);
    }

    #[test]
    fn test_rule_names() {
        let names: Vec<_> = HostRule::ORDERED.iter().map(|r| r.name()).collect();
        assert_eq!(
            names,
            vec!["allow-list", "image-registry-storage", "cluster-storage"]
        );
    }
}
