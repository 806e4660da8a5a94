//! Manifest injection passes
//!
//! Each pass decorates structured documents in place and is idempotent.
//! The orchestrator runs them in a fixed order: volumes, identity, auth,
//! dataset marker. Injected strings are escaped so that rendering leaves
//! them byte-for-byte intact.

use berth_common::config::AuthConfig;
use berth_common::{
    Result, AUTH_SECRET_NAME, HIDDEN_LABEL, NO_AUTH_LABEL, NO_DATASETS_LABEL, TEMPLATE_LABEL,
    VALUES_ANNOTATION,
};
use serde_json::{Map, Value};

use crate::model::Values;
use crate::renderer::escape;
use crate::storage::StorageDomain;

const NGINX: &str = "nginx.ingress.kubernetes.io";

/// How ingresses are authenticated
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthMode {
    /// HTTP basic auth against a credential secret in the namespace
    Basic {
        /// Secret holding the htpasswd line
        secret: String,
        /// Realm shown in the prompt
        realm: String,
    },
    /// Forward auth through an external gateway
    Gateway {
        /// Gateway base URL
        url: String,
        /// Only this user is let through
        username: String,
    },
}

/// Authentication applied to every ingress of a materialization
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressAuth {
    /// Auth mechanism
    pub mode: AuthMode,
    /// Also force a TLS redirect
    pub redirect_ssl: bool,
}

impl IngressAuth {
    /// Gateway auth when a gateway is configured, basic auth otherwise
    pub fn from_config(auth: &AuthConfig, username: &str) -> Self {
        let mode = match &auth.gateway_url {
            Some(url) => AuthMode::Gateway {
                url: url.trim_end_matches('/').to_string(),
                username: username.to_string(),
            },
            None => AuthMode::Basic {
                secret: AUTH_SECRET_NAME.to_string(),
                realm: auth.realm.clone(),
            },
        };
        Self {
            mode,
            redirect_ssl: auth.redirect_ssl,
        }
    }

    fn annotations(&self) -> Vec<(String, String)> {
        let key = |suffix: &str| format!("{NGINX}/{suffix}");
        let mut out = match &self.mode {
            AuthMode::Basic { secret, realm } => vec![
                (key("auth-type"), "basic".to_string()),
                (key("auth-secret"), secret.clone()),
                (key("auth-realm"), realm.clone()),
            ],
            AuthMode::Gateway { url, username } => vec![
                (
                    key("auth-signin"),
                    format!(
                        "{url}/login?url=$scheme://$http_host$request_uri\
                         &vouch-failcount=$auth_resp_failcount\
                         &X-Vouch-Token=$auth_resp_jwt&error=$auth_resp_err"
                    ),
                ),
                (key("auth-url"), format!("{url}/validate")),
                (key("auth-response-headers"), "X-Vouch-User".to_string()),
                (
                    key("auth-snippet"),
                    [
                        "auth_request_set $auth_resp_jwt $upstream_http_x_vouch_jwt;",
                        "auth_request_set $auth_resp_err $upstream_http_x_vouch_err;",
                        "auth_request_set $auth_resp_failcount $upstream_http_x_vouch_failcount;",
                    ]
                    .join("\n"),
                ),
                (
                    key("configuration-snippet"),
                    [
                        "  auth_request_set $auth_resp_x_vouch_username $upstream_http_x_vouch_idp_claims_preferred_username;".to_string(),
                        "  access_by_lua_block {".to_string(),
                        format!("    if not (string.match(ngx.var.auth_resp_x_vouch_username, \"^{username}$\")) then"),
                        "      ngx.exit(ngx.HTTP_FORBIDDEN);".to_string(),
                        "    end".to_string(),
                        "  }".to_string(),
                    ]
                    .join("\n"),
                ),
            ],
        };
        if self.redirect_ssl {
            out.push((key("force-ssl-redirect"), "true".to_string()));
        }
        out
    }
}

/// Pointer to the object holding pod `metadata` and `spec`, for the two
/// pod-bearing kinds we decorate
fn pod_template_pointer(doc: &Value) -> Option<&'static str> {
    match doc.get("kind").and_then(Value::as_str)? {
        "Pod" => Some(""),
        "Deployment" => Some("/spec/template"),
        _ => None,
    }
}

/// Whether the pod-bearing document has any pod template
pub fn is_pod_bearing(doc: &Value) -> bool {
    pod_template_pointer(doc).is_some()
}

fn has_label(holder: &Value, label: &str) -> bool {
    holder
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .is_some_and(|labels| labels.contains_key(label))
}

fn child_object<'a>(parent: &'a mut Value, key: &str) -> Option<&'a mut Map<String, Value>> {
    let entry = parent
        .as_object_mut()?
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()));
    if entry.is_null() {
        *entry = Value::Object(Map::new());
    }
    entry.as_object_mut()
}

fn child_array<'a>(parent: &'a mut Value, key: &str) -> Option<&'a mut Vec<Value>> {
    let entry = parent
        .as_object_mut()?
        .entry(key)
        .or_insert_with(|| Value::Array(Vec::new()));
    if entry.is_null() {
        *entry = Value::Array(Vec::new());
    }
    entry.as_array_mut()
}

fn metadata_map<'a>(holder: &'a mut Value, key: &str) -> Option<&'a mut Map<String, Value>> {
    let metadata = holder.as_object_mut()?.entry("metadata").or_insert(Value::Null);
    if metadata.is_null() {
        *metadata = Value::Object(Map::new());
    }
    child_object(metadata, key)
}

fn names(list: &[Value]) -> Vec<String> {
    list.iter()
        .filter_map(|v| v.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

/// Add a volume and a mount per domain to every pod-bearing document.
///
/// Volumes and mounts already present by name are left alone. With
/// `is_datasets`, pods carrying the no-datasets label are skipped.
pub fn inject_volumes(docs: &mut [Value], domains: &[StorageDomain], is_datasets: bool) {
    if domains.is_empty() {
        return;
    }
    for doc in docs.iter_mut() {
        let Some(pointer) = pod_template_pointer(doc) else {
            continue;
        };
        let Some(holder) = doc.pointer_mut(pointer) else {
            continue;
        };
        if is_datasets && has_label(holder, NO_DATASETS_LABEL) {
            continue;
        }
        let Some(spec) = holder.get_mut("spec") else {
            continue;
        };
        if !spec.get("containers").is_some_and(Value::is_array) {
            continue;
        }

        if let Some(volumes) = child_array(spec, "volumes") {
            let existing = names(volumes);
            for domain in domains {
                if !existing.contains(&domain.volume_name) {
                    volumes.push(domain.volume());
                }
            }
        }

        let Some(containers) = spec.get_mut("containers").and_then(Value::as_array_mut) else {
            continue;
        };
        for container in containers.iter_mut() {
            let Some(mounts) = child_array(container, "volumeMounts") else {
                continue;
            };
            let existing = names(mounts);
            for domain in domains {
                if !existing.contains(&domain.volume_name) {
                    mounts.push(domain.mount());
                }
            }
        }
    }
}

/// Mark the first non-hidden document of `kind` with the template identity
/// and the serialized values. Returns whether a document was marked.
pub fn inject_identity(
    docs: &mut [Value],
    kind: &str,
    template_id: &str,
    values: &Values,
) -> Result<bool> {
    let Some(doc) = docs.iter_mut().find(|doc| {
        doc.get("kind").and_then(Value::as_str) == Some(kind) && !has_label(doc, HIDDEN_LABEL)
    }) else {
        return Ok(false);
    };

    let serialized = serde_json::to_string(values).map_err(|e| {
        berth_common::Error::internal_with_context("inject_identity", e.to_string())
    })?;

    if let Some(labels) = metadata_map(doc, "labels") {
        labels.insert(
            TEMPLATE_LABEL.to_string(),
            Value::String(escape(template_id)),
        );
    }
    if let Some(annotations) = metadata_map(doc, "annotations") {
        annotations.insert(
            VALUES_ANNOTATION.to_string(),
            Value::String(escape(&serialized)),
        );
    }
    Ok(true)
}

/// Add authentication annotations to every Ingress without the no-auth label
pub fn inject_auth(docs: &mut [Value], auth: &IngressAuth) {
    annotate_ingresses(docs, auth, escape);
}

/// [`inject_auth`] for objects that are not rendered afterwards, such as
/// those seen by the admission webhook
pub fn inject_auth_verbatim(docs: &mut [Value], auth: &IngressAuth) {
    annotate_ingresses(docs, auth, str::to_string);
}

fn annotate_ingresses(docs: &mut [Value], auth: &IngressAuth, encode: fn(&str) -> String) {
    let annotations = auth.annotations();
    for doc in docs.iter_mut() {
        if doc.get("kind").and_then(Value::as_str) != Some("Ingress") {
            continue;
        }
        if has_label(doc, NO_AUTH_LABEL) {
            continue;
        }
        if let Some(existing) = metadata_map(doc, "annotations") {
            for (key, value) in &annotations {
                existing.insert(key.clone(), Value::String(encode(value)));
            }
        }
    }
}

/// Label every Ingress as opted out of authentication
pub fn inject_no_auth_label(docs: &mut [Value]) {
    for doc in docs.iter_mut() {
        if doc.get("kind").and_then(Value::as_str) != Some("Ingress") {
            continue;
        }
        if let Some(labels) = metadata_map(doc, "labels") {
            labels.insert(NO_AUTH_LABEL.to_string(), Value::String("true".to_string()));
        }
    }
}

/// Label every pod template so the admission pass skips dataset volumes
pub fn inject_no_datasets_label(docs: &mut [Value]) {
    for doc in docs.iter_mut() {
        let Some(pointer) = pod_template_pointer(doc) else {
            continue;
        };
        let Some(holder) = doc.pointer_mut(pointer) else {
            continue;
        };
        if let Some(labels) = metadata_map(holder, "labels") {
            labels.insert(
                NO_DATASETS_LABEL.to_string(),
                Value::String("true".to_string()),
            );
        }
    }
}

/// Reject `nfs` volumes and host paths outside the allowed directories.
///
/// A host path is allowed only when it equals one of the allowed directories,
/// ignoring a trailing `/`. The error is a short reason suitable for an
/// admission denial.
pub fn validate_host_paths(docs: &[Value], allowed: &[String]) -> std::result::Result<(), String> {
    for doc in docs {
        let Some(pointer) = pod_template_pointer(doc) else {
            continue;
        };
        let Some(volumes) = doc
            .pointer(&format!("{pointer}/spec/volumes"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        for volume in volumes {
            let name = volume.get("name").and_then(Value::as_str).unwrap_or("?");
            if volume.get("nfs").is_some() {
                return Err(format!("volume {name}: nfs volumes are not allowed"));
            }
            let Some(path) = volume.pointer("/hostPath/path").and_then(Value::as_str) else {
                continue;
            };
            if !host_path_allowed(path, allowed) {
                return Err(format!("volume {name}: host path {path} is not allowed"));
            }
        }
    }
    Ok(())
}

/// Exact membership; subdirectories of an allowed path are not implied.
fn host_path_allowed(path: &str, allowed: &[String]) -> bool {
    let path = path.trim_end_matches('/');
    allowed.iter().any(|dir| {
        let dir = dir.trim_end_matches('/');
        !dir.is_empty() && path == dir
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_common::config::StorageConfig;
    use serde_json::json;

    use crate::renderer::substitute;
    use crate::storage::{dataset_domains, tenant_domains};

    fn deployment() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {"template": {
                "metadata": {"labels": {"app": "web"}},
                "spec": {"containers": [
                    {"name": "app", "image": "nginx"},
                    {"name": "sidecar", "image": "busybox", "volumeMounts": []}
                ]}
            }}
        })
    }

    fn pod() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "shell"},
            "spec": {"containers": [{"name": "sh", "image": "alpine"}]}
        })
    }

    fn service(name: &str) -> Value {
        json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": name}})
    }

    fn ingress() -> Value {
        json!({"apiVersion": "networking.k8s.io/v1", "kind": "Ingress", "metadata": {"name": "web"}})
    }

    fn domains() -> Vec<StorageDomain> {
        tenant_domains(&StorageConfig::default(), "alice").unwrap()
    }

    // ==========================================================================
    // Story Tests: Volume injection
    // ==========================================================================

    /// Story: both pod-bearing shapes get one volume and mount per domain
    #[test]
    fn story_volumes_reach_pods_and_deployments() {
        let mut docs = vec![deployment(), pod(), service("web")];
        inject_volumes(&mut docs, &domains(), false);

        let spec = &docs[0]["spec"]["template"]["spec"];
        assert_eq!(spec["volumes"].as_array().unwrap().len(), 2);
        for container in spec["containers"].as_array().unwrap() {
            assert_eq!(container["volumeMounts"].as_array().unwrap().len(), 2);
        }
        assert_eq!(docs[1]["spec"]["volumes"].as_array().unwrap().len(), 2);
        assert_eq!(docs[1]["spec"]["containers"][0]["volumeMounts"][0]["mountPath"], "/berth/private");
        assert!(docs[2].get("spec").is_none());
    }

    /// Story: injecting twice is the same as injecting once
    #[test]
    fn story_volume_injection_is_idempotent() {
        let mut once = vec![deployment(), pod()];
        inject_volumes(&mut once, &domains(), false);
        let mut twice = once.clone();
        inject_volumes(&mut twice, &domains(), false);
        assert_eq!(once, twice);
    }

    /// Story: a volume the manifest already declares is never duplicated
    #[test]
    fn story_existing_volume_names_are_respected() {
        let mut doc = pod();
        doc["spec"]["volumes"] = json!([{"name": "berth-private", "emptyDir": {}}]);
        doc["spec"]["containers"][0]["volumeMounts"] =
            json!([{"name": "berth-private", "mountPath": "/custom"}]);
        let mut docs = vec![doc];
        inject_volumes(&mut docs, &domains(), false);

        let volumes = docs[0]["spec"]["volumes"].as_array().unwrap();
        assert_eq!(volumes.len(), 2);
        assert!(volumes[0].get("emptyDir").is_some());
        let mounts = docs[0]["spec"]["containers"][0]["volumeMounts"].as_array().unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0]["mountPath"], "/custom");
    }

    /// Story: the dataset pass honors the no-datasets label
    #[test]
    fn story_dataset_pass_skips_marked_pods() {
        let datasets = dataset_domains(&StorageConfig::default(), &["imagenet".to_string()]);
        let mut docs = vec![deployment(), pod()];
        inject_no_datasets_label(&mut docs[..1]);
        inject_volumes(&mut docs, &datasets, true);

        assert!(docs[0]["spec"]["template"]["spec"].get("volumes").is_none());
        assert_eq!(
            docs[1]["spec"]["volumes"][0]["persistentVolumeClaim"]["claimName"],
            "imagenet"
        );
    }

    #[test]
    fn test_specs_without_containers_are_skipped() {
        let mut docs = vec![json!({"kind": "Pod", "metadata": {"name": "x"}, "spec": {}})];
        inject_volumes(&mut docs, &domains(), false);
        assert!(docs[0]["spec"].get("volumes").is_none());
    }

    // ==========================================================================
    // Story Tests: Identity marking
    // ==========================================================================

    /// Story: only the first visible Service is marked
    #[test]
    fn story_identity_marks_first_visible_service() {
        let mut hidden = service("metrics");
        hidden["metadata"]["labels"] = json!({ HIDDEN_LABEL: "true" });
        let mut docs = vec![hidden, service("web"), service("web-admin")];
        let values = Values::from_pairs([("NAME", "web")]);

        assert!(inject_identity(&mut docs, "Service", "web", &values).unwrap());

        assert!(docs[0]["metadata"]["labels"].get(TEMPLATE_LABEL).is_none());
        assert_eq!(docs[1]["metadata"]["labels"][TEMPLATE_LABEL], "web");
        assert_eq!(
            docs[1]["metadata"]["annotations"][VALUES_ANNOTATION],
            r#"{"NAME":"web"}"#
        );
        assert!(docs[2]["metadata"].get("labels").is_none());
    }

    /// Story: serialized values survive rendering even when they contain `$`
    #[test]
    fn story_identity_annotation_survives_rendering() {
        let mut docs = vec![service("web")];
        let values = Values::from_pairs([("NAME", "web"), ("CMD", "echo $NAME")]);
        inject_identity(&mut docs, "Service", "web", &values).unwrap();

        let raw = docs[0]["metadata"]["annotations"][VALUES_ANNOTATION]
            .as_str()
            .unwrap();
        assert_eq!(
            substitute(raw, &values),
            r#"{"NAME":"web","CMD":"echo $NAME"}"#
        );
    }

    #[test]
    fn test_identity_without_service_marks_nothing() {
        let mut docs = vec![pod()];
        let values = Values::from_pairs([("NAME", "x")]);
        assert!(!inject_identity(&mut docs, "Service", "x", &values).unwrap());
    }

    // ==========================================================================
    // Story Tests: Authentication
    // ==========================================================================

    /// Story: without a gateway, ingresses get basic auth against the tenant secret
    #[test]
    fn story_basic_auth_annotations() {
        let auth = IngressAuth::from_config(&AuthConfig::default(), "alice");
        let mut docs = vec![ingress(), service("web")];
        inject_auth(&mut docs, &auth);

        let annotations = &docs[0]["metadata"]["annotations"];
        assert_eq!(annotations[format!("{NGINX}/auth-type")], "basic");
        assert_eq!(annotations[format!("{NGINX}/auth-secret")], AUTH_SECRET_NAME);
        assert_eq!(annotations[format!("{NGINX}/auth-realm")], "berth");
        assert!(annotations.get(format!("{NGINX}/force-ssl-redirect")).is_none());
        assert!(docs[1]["metadata"].get("annotations").is_none());
    }

    /// Story: with a gateway, ingresses forward auth and pin the user
    #[test]
    fn story_gateway_auth_annotations() {
        let config = AuthConfig {
            gateway_url: Some("https://vouch.example.com/".to_string()),
            redirect_ssl: true,
            ..Default::default()
        };
        let auth = IngressAuth::from_config(&config, "alice");
        let mut docs = vec![ingress()];
        inject_auth(&mut docs, &auth);

        let annotations = &docs[0]["metadata"]["annotations"];
        assert_eq!(
            annotations[format!("{NGINX}/auth-url")],
            "https://vouch.example.com/validate"
        );
        assert_eq!(annotations[format!("{NGINX}/force-ssl-redirect")], "true");
        assert!(annotations.get(format!("{NGINX}/auth-type")).is_none());

        let signin = annotations[format!("{NGINX}/auth-signin")].as_str().unwrap();
        let rendered = substitute(signin, &Values::from_pairs([("scheme", "nope")]));
        assert!(rendered.contains("url=$scheme://$http_host$request_uri"));
        let snippet = annotations[format!("{NGINX}/configuration-snippet")]
            .as_str()
            .unwrap();
        assert!(substitute(snippet, &Values::default()).contains("\"^alice$\""));
    }

    /// Story: a no-auth ingress is skipped without stopping the others
    #[test]
    fn story_no_auth_label_skips_only_that_ingress() {
        let mut open = ingress();
        open["metadata"]["labels"] = json!({ NO_AUTH_LABEL: "true" });
        let mut docs = vec![open, ingress()];
        inject_auth(&mut docs, &IngressAuth::from_config(&AuthConfig::default(), "alice"));

        assert!(docs[0]["metadata"].get("annotations").is_none());
        assert!(docs[1]["metadata"]["annotations"].is_object());
    }

    /// Story: admission-time auth keeps nginx variables literal
    #[test]
    fn story_verbatim_auth_is_not_escaped() {
        let config = AuthConfig {
            gateway_url: Some("https://vouch.example.com".to_string()),
            ..Default::default()
        };
        let mut docs = vec![ingress()];
        inject_auth_verbatim(&mut docs, &IngressAuth::from_config(&config, "alice"));

        let signin = docs[0]["metadata"]["annotations"][format!("{NGINX}/auth-signin")]
            .as_str()
            .unwrap();
        assert!(signin.contains("url=$scheme://"));
        assert!(!signin.contains("$$"));
    }

    /// Story: opting ingresses out keeps later auth passes away
    #[test]
    fn story_no_auth_marker_blocks_auth() {
        let mut docs = vec![ingress(), pod()];
        inject_no_auth_label(&mut docs);
        assert_eq!(docs[0]["metadata"]["labels"][NO_AUTH_LABEL], "true");
        assert!(docs[1]["metadata"].get("labels").is_none());

        inject_auth_verbatim(&mut docs, &IngressAuth::from_config(&AuthConfig::default(), "alice"));
        assert!(docs[0]["metadata"].get("annotations").is_none());
    }

    // ==========================================================================
    // Story Tests: Host path validation
    // ==========================================================================

    /// Story: pods may only mount the tenant's own storage paths
    #[test]
    fn story_host_paths_are_restricted() {
        let allowed = vec!["/var/lib/berth/private/alice".to_string(), "/data".to_string()];
        let with_volume = |volume: Value| {
            let mut doc = pod();
            doc["spec"]["volumes"] = json!([volume]);
            vec![doc]
        };

        let own = with_volume(json!({"name": "a", "hostPath": {"path": "/var/lib/berth/private/alice"}}));
        assert!(validate_host_paths(&own, &allowed).is_ok());

        let trailing = with_volume(json!({"name": "a", "hostPath": {"path": "/data/"}}));
        assert!(validate_host_paths(&trailing, &allowed).is_ok());

        let nested = with_volume(json!({"name": "a", "hostPath": {"path": "/data/sets/x"}}));
        assert!(validate_host_paths(&nested, &allowed).is_err());

        let other = with_volume(json!({"name": "b", "hostPath": {"path": "/var/lib/berth/private/bob"}}));
        assert!(validate_host_paths(&other, &allowed).unwrap_err().contains("/var/lib/berth/private/bob"));

        let sneaky = with_volume(json!({"name": "c", "hostPath": {"path": "/data/../etc"}}));
        assert!(validate_host_paths(&sneaky, &allowed).is_err());

        let sibling = with_volume(json!({"name": "d", "hostPath": {"path": "/database"}}));
        assert!(validate_host_paths(&sibling, &allowed).is_err());

        let nfs = with_volume(json!({"name": "e", "nfs": {"server": "nas", "path": "/"}}));
        assert!(validate_host_paths(&nfs, &allowed).unwrap_err().contains("nfs"));

        let claim = with_volume(json!({"name": "f", "persistentVolumeClaim": {"claimName": "x"}}));
        assert!(validate_host_paths(&claim, &allowed).is_ok());
    }

    /// Story: a link planted in the shared directory cannot reach the node root
    #[test]
    fn story_paths_below_shared_storage_are_denied() {
        let allowed = vec![
            "/var/lib/berth/private/alice".to_string(),
            "/var/lib/berth/shared".to_string(),
        ];
        let mut doc = pod();
        doc["spec"]["volumes"] = json!([
            {"name": "root", "hostPath": {"path": "/var/lib/berth/shared/link-to-root"}}
        ]);

        let err = validate_host_paths(&[doc], &allowed).unwrap_err();
        assert!(err.contains("/var/lib/berth/shared/link-to-root"));
    }
}
