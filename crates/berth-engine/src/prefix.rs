//! URL prefix allocation
//!
//! A materialized service is exposed at `<prefix>.<ingress host>`. Without a
//! configured pool the prefix is generated from the resource and tenant
//! names. With a pool, a free prefix is drawn at random and reserved before
//! use; a prefix is taken when any Ingress in the cluster serves a host
//! starting with it or when it is already reserved.

use std::collections::BTreeSet;

use berth_common::{Error, Result};
use berth_template::model::is_dns_label;
use rand::seq::SliceRandom;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::cluster::ClusterClient;
use crate::reservation::Reservations;

/// An allocated prefix
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlPrefix {
    /// The prefix label
    pub value: String,
    /// Whether it came from the pool and holds a reservation
    pub reserved: bool,
}

/// Draws prefixes from the configured pool
pub struct PrefixAllocator<'a> {
    cluster: &'a dyn ClusterClient,
    reservations: &'a Reservations,
    pool: &'a [String],
}

impl<'a> PrefixAllocator<'a> {
    /// Allocator over `pool`; an empty pool generates prefixes
    pub fn new(
        cluster: &'a dyn ClusterClient,
        reservations: &'a Reservations,
        pool: &'a [String],
    ) -> Self {
        Self {
            cluster,
            reservations,
            pool,
        }
    }

    /// Allocate a prefix for resource `name` of `tenant`
    #[instrument(skip(self))]
    pub async fn allocate(&self, tenant: &str, name: &str) -> Result<UrlPrefix> {
        if self.pool.is_empty() {
            return Ok(UrlPrefix {
                value: generated_prefix(tenant, name)?,
                reserved: false,
            });
        }

        let used = self.used_prefixes().await?;
        let mut free: Vec<&String> = self.pool.iter().filter(|p| !used.contains(*p)).collect();
        free.shuffle(&mut rand::thread_rng());

        for candidate in free {
            if self.reservations.reserve_prefix(tenant, candidate).await? {
                debug!(prefix = %candidate, "Reserved URL prefix");
                return Ok(UrlPrefix {
                    value: candidate.clone(),
                    reserved: true,
                });
            }
        }
        Err(Error::exhausted(format!(
            "all {} URL prefixes are in use",
            self.pool.len()
        )))
    }

    /// Prefixes served by an Ingress anywhere or held by a reservation
    pub async fn used_prefixes(&self) -> Result<BTreeSet<String>> {
        let ingresses = self
            .cluster
            .list("networking.k8s.io/v1", "Ingress", None, None)
            .await?;
        let mut used: BTreeSet<String> = ingresses.iter().flat_map(ingress_prefixes).collect();
        used.extend(self.reservations.reserved_prefixes().await?);
        Ok(used)
    }
}

/// Prefix used when no pool is configured; it must be a single DNS label
pub fn generated_prefix(tenant: &str, name: &str) -> Result<String> {
    let prefix = format!("{name}-{tenant}");
    if !is_dns_label(&prefix) {
        return Err(Error::bad_request(format!(
            "URL prefix {prefix} is not a valid DNS label; choose a shorter name"
        )));
    }
    Ok(prefix)
}

/// First DNS label of every host an Ingress serves
fn ingress_prefixes(ingress: &Value) -> Vec<String> {
    ingress
        .pointer("/spec/rules")
        .and_then(Value::as_array)
        .map(|rules| {
            rules
                .iter()
                .filter_map(|rule| rule.get("host").and_then(Value::as_str))
                .filter_map(|host| host.split('.').next())
                .filter(|label| !label.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
