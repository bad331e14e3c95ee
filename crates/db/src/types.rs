#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSettings {
    pub zone: String,
    pub root_resources: Vec<String>,
    pub trash_service_accounts: Vec<String>,
    pub user_type: String,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            zone: "iplant".to_string(),
            root_resources: vec!["mainIngestRes".to_string(), "mainReplRes".to_string()],
            trash_service_accounts: vec!["de-irods".to_string(), "ipcservices".to_string()],
            user_type: "rodsuser".to_string(),
        }
    }
}

/// Resource name that never counts toward usage even when listed as a root.
pub const BUNDLE_RESOURCE: &str = "bundleResc";
/// `resc_net` marker of a routing node with no live storage host.
pub const EMPTY_RESOURCE_HOST: &str = "EMPTY_RESC_HOST";
