use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, ListParams};
use kube::Client;

use crate::core::errors::AgentResult;

const MODULE_LABEL_SELECTOR: &str = "formance.com/kind=module";
const EE_LABEL: &str = "formance.com/is-ee";

/// Everything downstream components need to know about a discovered module
/// CRD: its group/version/kind coordinates and whether it is an enterprise
/// module (`formance.com/is-ee=true`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub singular: String,
    pub plural: String,
    pub kind: String,
    pub group: String,
    pub version: String,
    pub is_ee: bool,
}

/// Lists every CRD labelled `formance.com/kind=module`, sorted by singular
/// name, the same ordering the original agent's `RetrieveModuleList` returns.
pub async fn list_modules(client: Client) -> AgentResult<Vec<ModuleDescriptor>> {
    let crds: Api<CustomResourceDefinition> = Api::all(client);
    let lp = ListParams::default().labels(MODULE_LABEL_SELECTOR);
    let list = crds.list(&lp).await?;

    let mut descriptors: Vec<ModuleDescriptor> = list
        .items
        .into_iter()
        .filter_map(|crd| descriptor_from_crd(&crd))
        .collect();

    descriptors.sort_by(|a, b| a.singular.cmp(&b.singular));
    Ok(descriptors)
}

fn descriptor_from_crd(crd: &CustomResourceDefinition) -> Option<ModuleDescriptor> {
    let spec = &crd.spec;
    let accepted = crd.status.as_ref()?.accepted_names.as_ref()?;
    let singular = accepted.singular.clone()?;
    let plural = accepted.plural.clone();
    let kind = accepted.kind.clone();
    let version = spec
        .versions
        .iter()
        .find(|v| v.served)
        .map(|v| v.name.clone())
        .unwrap_or_else(|| spec.versions.first().map(|v| v.name.clone()).unwrap_or_default());

    let is_ee = crd
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(EE_LABEL))
        .map(|v| v == "true")
        .unwrap_or(false);

    Some(ModuleDescriptor {
        singular,
        plural,
        kind,
        group: spec.group.clone(),
        version,
        is_ee,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
        CustomResourceDefinitionNames, CustomResourceDefinitionSpec, CustomResourceDefinitionStatus,
        CustomResourceDefinitionVersion,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn make_crd(singular: &str, group: &str, is_ee: bool) -> CustomResourceDefinition {
        let mut labels = BTreeMap::new();
        labels.insert("formance.com/kind".to_string(), "module".to_string());
        if is_ee {
            labels.insert(EE_LABEL.to_string(), "true".to_string());
        }
        CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some(format!("{singular}.{group}")),
                labels: Some(labels),
                ..Default::default()
            },
            spec: CustomResourceDefinitionSpec {
                group: group.to_string(),
                names: CustomResourceDefinitionNames {
                    singular: Some(singular.to_string()),
                    plural: format!("{singular}s"),
                    kind: singular.to_string(),
                    ..Default::default()
                },
                versions: vec![CustomResourceDefinitionVersion {
                    name: "v1beta1".to_string(),
                    served: true,
                    storage: true,
                    ..Default::default()
                }],
                scope: "Namespaced".to_string(),
                ..Default::default()
            },
            status: Some(CustomResourceDefinitionStatus {
                accepted_names: Some(CustomResourceDefinitionNames {
                    singular: Some(singular.to_string()),
                    plural: format!("{singular}s"),
                    kind: singular.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn descriptor_reads_ee_label() {
        let crd = make_crd("wallet", "formance.com", true);
        let d = descriptor_from_crd(&crd).unwrap();
        assert_eq!(d.singular, "wallet");
        assert!(d.is_ee);
        assert_eq!(d.version, "v1beta1");
    }

    #[test]
    fn descriptor_defaults_to_non_ee() {
        let crd = make_crd("ledger", "formance.com", false);
        let d = descriptor_from_crd(&crd).unwrap();
        assert!(!d.is_ee);
    }
}
