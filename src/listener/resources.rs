use kube::api::ApiResource;

use crate::core::modules::ModuleDescriptor;

const GROUP: &str = "formance.com";
const VERSION: &str = "v1beta1";

fn resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: GROUP.to_string(),
        version: VERSION.to_string(),
        api_version: format!("{GROUP}/{VERSION}"),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

/// The cluster-scoped stack custom resource (§3 "Stack worldview").
pub fn stacks() -> ApiResource {
    resource("Stack", "stacks")
}

/// Watched by C6 alongside stacks and modules (§4.6); its status is reported
/// upstream but it is never itself a target of child reconciliation.
pub fn versions() -> ApiResource {
    resource("Version", "versions")
}

/// The singleton-per-stack Stargate child (§4.7 `sync_stargate`).
pub fn stargates() -> ApiResource {
    resource("Stargate", "stargates")
}

/// The per-stack set of auth clients (§4.7 `sync_auth_clients`).
pub fn auth_clients() -> ApiResource {
    resource("AuthClient", "authclients")
}

/// Builds the `ApiResource` for one discovered module category (C3), using
/// the CRD's own group/version/kind/plural rather than guessing at
/// capitalization conventions.
pub fn module(descriptor: &ModuleDescriptor) -> ApiResource {
    ApiResource {
        group: descriptor.group.clone(),
        version: descriptor.version.clone(),
        api_version: format!("{}/{}", descriptor.group, descriptor.version),
        kind: descriptor.kind.clone(),
        plural: descriptor.plural.clone(),
    }
}
