//! Installed-version discovery for custom resources.
//!
//! Edge clusters run different releases of third-party operators
//! (external-secrets in particular), so the watcher targets whichever API
//! version the cluster actually serves instead of hardcoding one.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Api, Client};

use crate::error::{Error, Result};

/// Pick the version a cluster persists for a CRD: the `storage: true`
/// version when present, otherwise the first `served: true` version.
pub fn select_installed_version(crd: &CustomResourceDefinition) -> Option<String> {
    let versions = &crd.spec.versions;
    versions
        .iter()
        .find(|v| v.storage)
        .or_else(|| versions.iter().find(|v| v.served))
        .map(|v| v.name.clone())
}

/// Look up the installed version of `{plural}.{group}` on the cluster.
///
/// Returns `None` when the CRD is not installed (404); any other API error
/// propagates to the caller.
pub async fn installed_crd_version(
    client: &Client,
    group: &str,
    plural: &str,
) -> Result<Option<String>> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    match api.get(&format!("{plural}.{group}")).await {
        Ok(crd) => Ok(select_installed_version(&crd)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(Error::Kube(e)),
    }
}
