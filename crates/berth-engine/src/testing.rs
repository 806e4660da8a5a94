//! In-memory cluster for engine tests and for crates built on the engine
//!
//! Stores objects keyed by kind, namespace and name, evaluates simple label
//! selectors, and records every mutation so tests can assert that an
//! operation touched nothing.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use berth_common::kube_utils::ManifestRef;
use berth_common::{Error, Result};
use serde_json::{json, Value};

use crate::cluster::ClusterClient;

/// A recorded cluster mutation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    /// "apply", "create" or "delete"
    pub op: &'static str,
    /// Object kind
    pub kind: String,
    /// Namespace, if namespaced
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

type Key = (String, Option<String>, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    mutations: Vec<Mutation>,
    fail_apply_kinds: Vec<String>,
    fail_deletes: bool,
    exec_outputs: HashMap<String, std::result::Result<String, String>>,
}

/// Fake [`ClusterClient`]
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn key(kind: &str, namespace: Option<&str>, name: &str) -> Key {
    (kind.to_string(), namespace.map(str::to_string), name.to_string())
}

fn labels_match(obj: &Value, selector: &str) -> bool {
    let labels = obj.pointer("/metadata/labels").and_then(Value::as_object);
    selector.split(',').filter(|s| !s.is_empty()).all(|term| {
        match term.split_once('=') {
            Some((k, v)) => labels
                .and_then(|l| l.get(k.trim()))
                .and_then(Value::as_str)
                == Some(v.trim()),
            None => labels.is_some_and(|l| l.contains_key(term.trim())),
        }
    })
}

impl FakeCluster {
    /// Empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object without recording a mutation
    ///
    /// # Panics
    ///
    /// If the document has no apiVersion, kind or name.
    pub fn insert(&self, doc: Value) {
        let Ok(target) = ManifestRef::from_document(&doc) else {
            panic!("seeded object needs apiVersion, kind and name: {doc}");
        };
        let ns = if target.is_cluster_scoped() {
            None
        } else {
            target.namespace.clone()
        };
        let mut state = self.state();
        state
            .objects
            .insert(key(&target.api_resource.kind, ns.as_deref(), &target.name), doc);
    }

    /// Seed a running pod with labels
    pub fn insert_pod(&self, namespace: &str, name: &str, labels: Value) {
        self.insert(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name, "namespace": namespace, "labels": labels},
            "status": {"phase": "Running"}
        }));
    }

    /// Make every apply of `kind` fail with an upstream error
    pub fn fail_apply_of(&self, kind: &str) {
        self.state()
            .fail_apply_kinds
            .push(kind.to_string());
    }

    /// Make every delete fail with an upstream error
    pub fn fail_deletes(&self) {
        self.state().fail_deletes = true;
    }

    /// Script the result of exec in a pod
    pub fn set_exec_output(&self, pod: &str, output: std::result::Result<&str, &str>) {
        self.state().exec_outputs.insert(
            pod.to_string(),
            output.map(str::to_string).map_err(str::to_string),
        );
    }

    /// All mutations so far
    pub fn mutations(&self) -> Vec<Mutation> {
        self.state().mutations.clone()
    }

    /// Forget recorded mutations
    pub fn clear_mutations(&self) {
        self.state().mutations.clear();
    }

    /// Look up an object
    pub fn object(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<Value> {
        self.state()
            .objects
            .get(&key(kind, namespace, name))
            .cloned()
    }

    /// Names of all objects of a kind in a namespace
    pub fn names(&self, kind: &str, namespace: Option<&str>) -> Vec<String> {
        self.state()
            .objects
            .keys()
            .filter(|(k, ns, _)| k == kind && ns.as_deref() == namespace)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    fn locate(doc: &Value) -> Result<(ManifestRef, Option<String>)> {
        let target = ManifestRef::from_document(doc)?;
        let ns = if target.is_cluster_scoped() {
            None
        } else {
            target.namespace.clone()
        };
        Ok((target, ns))
    }

    fn record(state: &mut State, op: &'static str, kind: &str, ns: Option<&str>, name: &str) {
        state.mutations.push(Mutation {
            op,
            kind: kind.to_string(),
            namespace: ns.map(str::to_string),
            name: name.to_string(),
        });
    }

    fn store(state: &mut State, target: &ManifestRef, ns: Option<String>, doc: &Value) {
        let kind = target.api_resource.kind.clone();
        if kind == "Namespace" {
            // The service account controller creates `default` in every namespace
            let sa = json!({
                "apiVersion": "v1",
                "kind": "ServiceAccount",
                "metadata": {"name": "default", "namespace": target.name}
            });
            state
                .objects
                .entry(key("ServiceAccount", Some(&target.name), "default"))
                .or_insert(sa);
        }
        state
            .objects
            .insert(key(&kind, ns.as_deref(), &target.name), doc.clone());
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list(
        &self,
        _api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>> {
        let state = self.state();
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| k == kind && (namespace.is_none() || ns.as_deref() == namespace))
            .filter(|(_, obj)| label_selector.map_or(true, |s| labels_match(obj, s)))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn get(
        &self,
        _api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>> {
        Ok(self.object(kind, namespace, name))
    }

    async fn apply(&self, doc: &Value) -> Result<()> {
        let (target, ns) = Self::locate(doc)?;
        let mut state = self.state();
        let kind = target.api_resource.kind.clone();
        if state.fail_apply_kinds.contains(&kind) {
            return Err(Error::upstream(
                format!("apply {kind}/{}", target.name),
                "500 InternalError: injected failure",
            ));
        }
        Self::record(&mut state, "apply", &kind, ns.as_deref(), &target.name);
        Self::store(&mut state, &target, ns, doc);
        Ok(())
    }

    async fn create(&self, doc: &Value) -> Result<bool> {
        let (target, ns) = Self::locate(doc)?;
        let mut state = self.state();
        let kind = target.api_resource.kind.clone();
        if state
            .objects
            .contains_key(&key(&kind, ns.as_deref(), &target.name))
        {
            return Ok(false);
        }
        Self::record(&mut state, "create", &kind, ns.as_deref(), &target.name);
        Self::store(&mut state, &target, ns, doc);
        Ok(true)
    }

    async fn delete(
        &self,
        _api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        let mut state = self.state();
        if state.fail_deletes {
            return Err(Error::upstream(
                format!("delete {kind}/{name}"),
                "503 ServiceUnavailable: injected failure",
            ));
        }
        Self::record(&mut state, "delete", kind, namespace, name);
        let removed = state.objects.remove(&key(kind, namespace, name)).is_some();
        if kind == "Namespace" {
            state
                .objects
                .retain(|(_, ns, _), _| ns.as_deref() != Some(name));
        }
        Ok(removed)
    }

    async fn exec(&self, _namespace: &str, pod: &str, command: &[String]) -> Result<String> {
        let state = self.state();
        match state.exec_outputs.get(pod) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(message)) => Err(Error::upstream(format!("exec {pod}"), message.clone())),
            None => Ok(format!("{pod}: {}\n", command.join(" "))),
        }
    }
}
