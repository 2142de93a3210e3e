use std::collections::HashMap;

/// Static facts about this agent instance, sent once as gRPC connect metadata
/// when the stream is established (`membership_client::connect_metadata`).
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: String,
    pub base_url: String,
    pub production: bool,
    pub outdated: bool,
    pub version: String,
    pub capabilities: Vec<String>,
}

impl ClientInfo {
    /// Renders this instance's facts as gRPC connect metadata, one entry per
    /// key except `MODULE_LIST`/`EE`/`capabilities`, which §6 documents as
    /// multi-valued headers (one repeated entry per module, matching the
    /// original agent's `md.Append(metadataCapabilities, ...)` /
    /// `md.Append(capabilityModuleList, c.modules...)`), not a joined string.
    pub fn to_metadata(&self, modules: &[crate::core::modules::ModuleDescriptor]) -> HashMap<String, Vec<String>> {
        let mut md = HashMap::new();
        md.insert("id".to_string(), vec![self.id.clone()]);
        md.insert("baseUrl".to_string(), vec![self.base_url.clone()]);
        md.insert("production".to_string(), vec![self.production.to_string()]);
        md.insert("outdated".to_string(), vec![self.outdated.to_string()]);
        md.insert("version".to_string(), vec![self.version.clone()]);
        md.insert("capabilities".to_string(), self.capabilities.clone());

        let module_list: Vec<String> = modules.iter().map(|m| m.singular.clone()).collect();
        md.insert("MODULE_LIST".to_string(), module_list);

        let ee_list: Vec<String> = modules.iter().filter(|m| m.is_ee).map(|m| m.singular.clone()).collect();
        md.insert("EE".to_string(), ee_list);

        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::modules::ModuleDescriptor;

    #[test]
    fn metadata_includes_module_and_ee_lists() {
        let info = ClientInfo {
            id: "agent-1".to_string(),
            base_url: "https://agent.example.com".to_string(),
            production: true,
            outdated: false,
            version: "1.2.3".to_string(),
            capabilities: vec!["stargate".to_string()],
        };
        let modules = vec![
            ModuleDescriptor {
                singular: "ledger".to_string(),
                plural: "ledgers".to_string(),
                kind: "Ledger".to_string(),
                group: "formance.com".to_string(),
                version: "v1beta1".to_string(),
                is_ee: false,
            },
            ModuleDescriptor {
                singular: "wallets".to_string(),
                plural: "wallets".to_string(),
                kind: "Wallets".to_string(),
                group: "formance.com".to_string(),
                version: "v1beta1".to_string(),
                is_ee: true,
            },
        ];
        let md = info.to_metadata(&modules);
        assert_eq!(md.get("MODULE_LIST").unwrap(), &vec!["ledger".to_string(), "wallets".to_string()]);
        assert_eq!(md.get("EE").unwrap(), &vec!["wallets".to_string()]);
        assert_eq!(md.get("id").unwrap(), &vec!["agent-1".to_string()]);
    }
}
