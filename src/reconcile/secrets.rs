//! Project secret reconciliation.
//!
//! Secrets materialize either as ExternalSecret custom resources (synced by
//! the external-secrets operator) or as plain core Secrets. ExternalSecrets
//! are addressed dynamically against whichever CRD version the cluster
//! serves; all objects carry the project-secret-id label, and deletes treat
//! "nothing labelled with this id" as already done.

use k8s_openapi::api::core::v1::Secret;
use kube::api::{ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::{FIELD_MANAGER, SECRET_ID_LABEL};
use crate::error::Result;
use crate::message::{Envelope, SecretKind};
use crate::status::ProjectResourceStatus;
use crate::watch::crd::installed_crd_version;
use crate::watch::stream::{ResourceEvent, WatchEventKind};

/// Reason reported when a delete request finds no matching secret.
pub const NOT_FOUND_REASON: &str = "Project secret not found";

pub const EXTERNAL_SECRETS_GROUP: &str = "external-secrets.io";
pub const EXTERNAL_SECRETS_PLURAL: &str = "externalsecrets";

/// Dynamic API coordinates for the ExternalSecret kind at a given version.
pub fn external_secret_resource(version: &str) -> ApiResource {
    ApiResource {
        group: EXTERNAL_SECRETS_GROUP.to_string(),
        version: version.to_string(),
        api_version: format!("{EXTERNAL_SECRETS_GROUP}/{version}"),
        kind: "ExternalSecret".to_string(),
        plural: EXTERNAL_SECRETS_PLURAL.to_string(),
    }
}

/// Inject a label into a manifest's metadata, creating the label map as
/// needed. Existing values for the same key are overwritten.
pub fn inject_label(manifest: &mut Value, key: &str, value: &str) {
    let metadata = manifest
        .as_object_mut()
        .map(|object| object.entry("metadata").or_insert_with(|| Value::Object(Default::default())));
    if let Some(metadata) = metadata.and_then(Value::as_object_mut) {
        let labels = metadata
            .entry("labels")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(labels) = labels.as_object_mut() {
            labels.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
}

/// Name recorded in a manifest's metadata.
pub fn manifest_name(manifest: &Value) -> Option<&str> {
    manifest.get("metadata")?.get("name")?.as_str()
}

fn status_message(
    secret_id: Uuid,
    status: ProjectResourceStatus,
    reason: Option<String>,
) -> Envelope {
    Envelope::ProjectSecretsStatus {
        secret_id,
        status,
        reason,
    }
}

fn failed(secret_id: Uuid, reason: String) -> Vec<Envelope> {
    vec![status_message(secret_id, ProjectResourceStatus::Failed, Some(reason))]
}

async fn external_secret_api(
    client: &Client,
    namespace: &str,
) -> Result<std::result::Result<Api<DynamicObject>, String>> {
    match installed_crd_version(client, EXTERNAL_SECRETS_GROUP, EXTERNAL_SECRETS_PLURAL).await? {
        Some(version) => {
            let resource = external_secret_resource(&version);
            Ok(Ok(Api::namespaced_with(client.clone(), namespace, &resource)))
        }
        None => Ok(Err(
            "external-secrets operator is not installed on this cluster".to_string(),
        )),
    }
}

/// Create the secret object described by `manifest`.
pub async fn create(
    client: &Client,
    secret_id: Uuid,
    namespace: &str,
    kind: SecretKind,
    mut manifest: Value,
) -> Result<Vec<Envelope>> {
    inject_label(&mut manifest, SECRET_ID_LABEL, &secret_id.to_string());
    match kind {
        SecretKind::ExternalSecret => {
            let api = match external_secret_api(client, namespace).await? {
                Ok(api) => api,
                Err(reason) => return Ok(failed(secret_id, reason)),
            };
            let object: DynamicObject = match serde_json::from_value(manifest) {
                Ok(object) => object,
                Err(e) => return Ok(failed(secret_id, format!("invalid manifest: {e}"))),
            };
            match api.create(&PostParams::default(), &object).await {
                Ok(_) | Err(kube::Error::Api(kube::core::ErrorResponse { code: 409, .. })) => {
                    info!(secret_id = %secret_id, namespace, "created external secret");
                    Ok(Vec::new())
                }
                Err(e) => {
                    warn!(secret_id = %secret_id, error = %e, "failed to create external secret");
                    Ok(failed(secret_id, e.to_string()))
                }
            }
        }
        SecretKind::Opaque => {
            let secret: Secret = match serde_json::from_value(manifest) {
                Ok(secret) => secret,
                Err(e) => return Ok(failed(secret_id, format!("invalid manifest: {e}"))),
            };
            let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
            match api.create(&PostParams::default(), &secret).await {
                Ok(_) | Err(kube::Error::Api(kube::core::ErrorResponse { code: 409, .. })) => {
                    info!(secret_id = %secret_id, namespace, "created secret");
                    Ok(Vec::new())
                }
                Err(e) => {
                    warn!(secret_id = %secret_id, error = %e, "failed to create secret");
                    Ok(failed(secret_id, e.to_string()))
                }
            }
        }
    }
}

/// Patch the secret object with the updated manifest.
pub async fn update(
    client: &Client,
    secret_id: Uuid,
    namespace: &str,
    kind: SecretKind,
    mut manifest: Value,
) -> Result<Vec<Envelope>> {
    inject_label(&mut manifest, SECRET_ID_LABEL, &secret_id.to_string());
    let Some(name) = manifest_name(&manifest).map(String::from) else {
        return Ok(failed(secret_id, "manifest has no metadata.name".to_string()));
    };
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let patch = Patch::Apply(&manifest);

    let result = match kind {
        SecretKind::ExternalSecret => {
            let api = match external_secret_api(client, namespace).await? {
                Ok(api) => api,
                Err(reason) => return Ok(failed(secret_id, reason)),
            };
            api.patch(&name, &params, &patch).await.map(|_| ())
        }
        SecretKind::Opaque => {
            let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
            api.patch(&name, &params, &patch).await.map(|_| ())
        }
    };

    match result {
        Ok(()) => {
            info!(secret_id = %secret_id, namespace, name, "updated secret");
            Ok(Vec::new())
        }
        Err(e) => {
            warn!(secret_id = %secret_id, error = %e, "failed to update secret");
            Ok(failed(secret_id, e.to_string()))
        }
    }
}

/// Delete every object labelled with the secret id. No matches means the
/// delete already happened.
pub async fn delete(
    client: &Client,
    secret_id: Uuid,
    namespace: &str,
    kind: SecretKind,
) -> Result<Vec<Envelope>> {
    match kind {
        SecretKind::ExternalSecret => {
            let api = match external_secret_api(client, namespace).await? {
                Ok(api) => api,
                Err(_) => {
                    // operator uninstalled; its objects went with it
                    return Ok(vec![status_message(
                        secret_id,
                        ProjectResourceStatus::Deleted,
                        Some(NOT_FOUND_REASON.to_string()),
                    )]);
                }
            };
            delete_labelled(&api, secret_id, namespace).await
        }
        SecretKind::Opaque => {
            let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
            delete_labelled(&api, secret_id, namespace).await
        }
    }
}

async fn delete_labelled<K>(api: &Api<K>, secret_id: Uuid, namespace: &str) -> Result<Vec<Envelope>>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let selector = format!("{SECRET_ID_LABEL}={secret_id}");
    let params = ListParams::default().labels(&selector);
    let names: Vec<String> = api
        .list(&params)
        .await
        .map_err(crate::error::Error::Kube)?
        .items
        .into_iter()
        .filter_map(|object| object.meta().name.clone())
        .collect();

    if names.is_empty() {
        info!(secret_id = %secret_id, namespace, "secret already gone");
        return Ok(vec![status_message(
            secret_id,
            ProjectResourceStatus::Deleted,
            Some(NOT_FOUND_REASON.to_string()),
        )]);
    }

    for name in names {
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => {
                warn!(secret_id = %secret_id, name, error = %e, "failed to delete secret");
                return Ok(vec![status_message(
                    secret_id,
                    ProjectResourceStatus::DeleteFailed,
                    Some(e.to_string()),
                )]);
            }
        }
    }
    // terminal DELETED arrives via the watcher
    Ok(Vec::new())
}

/// Translate an observed ExternalSecret event into a status message.
/// Objects without a parseable project-secret-id label are ignored.
pub fn event_status(event: &ResourceEvent<DynamicObject>) -> Option<Envelope> {
    let secret_id = event
        .object
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(SECRET_ID_LABEL))
        .and_then(|value| Uuid::parse_str(value).ok())?;

    let message = match event.kind {
        WatchEventKind::Deleted => status_message(secret_id, ProjectResourceStatus::Deleted, None),
        WatchEventKind::Applied => match ready_condition(&event.object.data) {
            Some(("True", _)) => status_message(secret_id, ProjectResourceStatus::Synced, None),
            Some(("False", reason)) => status_message(
                secret_id,
                ProjectResourceStatus::SyncedError,
                Some(reason.unwrap_or_else(|| "secret failed to sync".to_string())),
            ),
            Some((other, _)) => status_message(
                secret_id,
                ProjectResourceStatus::Failed,
                Some(format!("unrecognized Ready condition status: {other}")),
            ),
            None => status_message(secret_id, ProjectResourceStatus::Pending, None),
        },
    };
    Some(message)
}

/// `(status, message)` of the Ready condition, when present.
fn ready_condition(data: &Value) -> Option<(&str, Option<String>)> {
    let conditions = data.get("status")?.get("conditions")?.as_array()?;
    let ready = conditions
        .iter()
        .find(|condition| condition.get("type").and_then(Value::as_str) == Some("Ready"))?;
    let status = ready.get("status").and_then(Value::as_str)?;
    let message = ready
        .get("message")
        .and_then(Value::as_str)
        .map(String::from);
    Some((status, message))
}
