//! Template and trigger provisioning.
//!
//! Everything here is idempotent: an existing object is left alone (or
//! refreshed under `force`). Creation of prototypes is best-effort — a
//! duplicate-object error from the server is logged and skipped, matching
//! how the monitor behaves when deletes are processed asynchronously.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::NamingConfig;
use crate::error::{Result, ZtcError};
use crate::zabbix::client::Client;
use crate::zabbix::hosts::first_created_id;
use crate::zabbix::types::{HostGroup, Item, Template};

/// Discovery-rule keys provisioned on the overlay template.
pub const HOSTS_LLD_KEY: &str = "vulners.hosts_lld";
pub const PACKAGES_LLD_KEY: &str = "vulners.packages_lld";
pub const BULLETINS_LLD_KEY: &str = "vulners.bulletins_lld";

impl Client {
    /// Ensure the OS-report template exists with its two agent items.
    /// When `force` is set, items on an existing template are re-checked
    /// and recreated if missing.
    pub async fn ensure_os_report_template(&self, _force: bool) -> Result<()> {
        let result = self
            .call(
                "template.get",
                json!({
                    "output": ["templateid", "host", "name"],
                    "filter": { "host": self.cfg.scan.os_report_template },
                }),
            )
            .await?;
        let templates: Vec<Template> = serde_json::from_value(result)?;

        if let Some(template) = templates.first() {
            info!("OS-report template already exists");
            return self.update_os_report_items(&template.template_id).await;
        }

        info!("creating OS-report template");

        let group_id = self
            .ensure_host_group(&self.cfg.scan.template_group_name)
            .await?;

        let result = self
            .call(
                "template.create",
                json!({
                    "host": self.cfg.scan.os_report_template,
                    "name": self.cfg.scan.os_report_visible_name,
                    "groups": [{ "groupid": group_id }],
                }),
            )
            .await?;

        let template_id = first_created_id(&result, "templateids")
            .ok_or_else(|| ZtcError::config(format!("no templateid in response: {result}")))?;

        self.create_os_report_items(&template_id).await
    }

    async fn create_os_report_items(&self, template_id: &str) -> Result<()> {
        let items = [
            json!({
                "hostid": template_id,
                "name": "OS - Name",
                "key_": "system.sw.os",
                "type": 0,       // Zabbix agent
                "value_type": 1, // character
                "delay": "1d",
                "description": "Operating system name and version",
            }),
            json!({
                "hostid": template_id,
                "name": "OS - Packages",
                "key_": "system.sw.packages",
                "type": 0,
                "value_type": 4, // text
                "delay": "1d",
                "description": "List of installed packages",
            }),
        ];

        for item in items {
            let name = item["name"].clone();
            self.call("item.create", item).await.map_err(|e| {
                ZtcError::config(format!("failed to create item {name}: {e}"))
            })?;
        }

        info!("created OS-report template items");
        Ok(())
    }

    /// Create any of the two required OS-report items missing from an
    /// existing template.
    async fn update_os_report_items(&self, template_id: &str) -> Result<()> {
        let result = self
            .call(
                "item.get",
                json!({
                    "output": ["itemid", "key_"],
                    "templateids": template_id,
                }),
            )
            .await?;
        let items: Vec<Item> = serde_json::from_value(result)?;

        for key in ["system.sw.os", "system.sw.packages"] {
            if items.iter().any(|item| item.key == key) {
                continue;
            }
            info!(key, "creating missing template item");
            let (name, value_type) = match key {
                "system.sw.packages" => ("OS - Packages", 4),
                _ => ("OS - Name", 1),
            };
            self.call(
                "item.create",
                json!({
                    "hostid": template_id,
                    "key_": key,
                    "name": name,
                    "type": 0,
                    "value_type": value_type,
                    "delay": "1d",
                }),
            )
            .await
            .map_err(|e| ZtcError::config(format!("failed to create item {key}: {e}")))?;
        }

        Ok(())
    }

    /// Ensure a host group exists, returning its ID.
    pub async fn ensure_host_group(&self, name: &str) -> Result<String> {
        let result = self
            .call(
                "hostgroup.get",
                json!({
                    "output": ["groupid", "name"],
                    "filter": { "name": name },
                }),
            )
            .await?;
        let groups: Vec<HostGroup> = serde_json::from_value(result)?;

        if let Some(group) = groups.first() {
            return Ok(group.group_id.clone());
        }

        let result = self.call("hostgroup.create", json!({ "name": name })).await?;
        first_created_id(&result, "groupids")
            .ok_or_else(|| ZtcError::config(format!("no groupid in response: {result}")))
    }

    /// Ensure a template group exists (Zabbix >= 6.2), returning its ID.
    pub async fn ensure_template_group(&self, name: &str) -> Result<String> {
        let result = self
            .call(
                "templategroup.get",
                json!({
                    "output": ["groupid"],
                    "filter": { "name": name },
                }),
            )
            .await?;
        let groups: Vec<HostGroup> = serde_json::from_value(result)?;

        if let Some(group) = groups.first() {
            return Ok(group.group_id.clone());
        }

        let result = self
            .call("templategroup.create", json!({ "name": name }))
            .await?;
        first_created_id(&result, "groupids")
            .ok_or_else(|| ZtcError::config(format!("no groupid in response: {result}")))
    }

    /// Ensure the overlay template that carries the discovery rules, item
    /// prototypes, trigger prototypes, and statistics items. When `force`
    /// is set on an existing template, its discovery rules and items are
    /// deleted and recreated to pick up key-schema changes.
    pub async fn ensure_overlay_template(&self, group_id: &str, force: bool) -> Result<String> {
        let template_name = &self.cfg.naming.group_name;

        let result = self
            .call(
                "template.get",
                json!({
                    "output": ["templateid", "host"],
                    "filter": { "host": template_name },
                }),
            )
            .await?;
        let templates: Vec<Template> = serde_json::from_value(result)?;

        if let Some(template) = templates.first() {
            let template_id = template.template_id.clone();
            if force {
                info!("force mode: recreating overlay template items");
                // Deleting a discovery rule cascades to its prototypes.
                if let Err(e) = self.delete_template_discovery_rules(&template_id).await {
                    warn!(error = %e, "failed to delete discovery rules");
                }
                if let Err(e) = self.delete_template_items(&template_id).await {
                    warn!(error = %e, "failed to delete template items");
                }
                self.create_overlay_template_items(&template_id).await?;
            }
            return Ok(template_id);
        }

        // Zabbix >= 6.2 files templates under template groups; fall back to
        // the host group if the new endpoints are absent.
        let mut template_group_id = group_id.to_string();
        if self.version_at_least(6, 2) {
            match self.ensure_template_group(template_name).await {
                Ok(id) => template_group_id = id,
                Err(e) => {
                    warn!(error = %e, "failed to create template group, falling back to host group")
                }
            }
        }

        let result = self
            .call(
                "template.create",
                json!({
                    "host": template_name,
                    "name": "Vulners - Zabbix Threat Control",
                    "groups": [{ "groupid": template_group_id }],
                }),
            )
            .await?;
        let template_id = first_created_id(&result, "templateids")
            .ok_or_else(|| ZtcError::config(format!("no templateid in response: {result}")))?;

        self.create_overlay_template_items(&template_id).await?;

        info!("created overlay template");
        Ok(template_id)
    }

    async fn delete_template_discovery_rules(&self, template_id: &str) -> Result<()> {
        let result = self
            .call(
                "discoveryrule.get",
                json!({
                    "output": ["itemid"],
                    "hostids": template_id,
                }),
            )
            .await?;

        let ids = collect_item_ids(&result);
        if !ids.is_empty() {
            self.call("discoveryrule.delete", json!(ids.clone())).await?;
            debug!(count = ids.len(), "deleted discovery rules");
        }
        Ok(())
    }

    async fn delete_template_items(&self, template_id: &str) -> Result<()> {
        let result = self
            .call(
                "item.get",
                json!({
                    "output": ["itemid"],
                    "templateids": template_id,
                }),
            )
            .await?;
        let items: Vec<Item> = serde_json::from_value(result)?;
        if items.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = items.into_iter().map(|item| item.item_id).collect();
        self.call("item.delete", json!(ids.clone())).await?;
        debug!(count = ids.len(), "deleted template items");
        Ok(())
    }

    /// Create the three trapper discovery rules, their item and trigger
    /// prototypes, and the statistics trapper items.
    async fn create_overlay_template_items(&self, template_id: &str) -> Result<()> {
        let lld_rules = [
            ("Vulners - Hosts Discovery", HOSTS_LLD_KEY),
            ("Vulners - Packages Discovery", PACKAGES_LLD_KEY),
            ("Vulners - Bulletins Discovery", BULLETINS_LLD_KEY),
        ];

        // Rule key → rule ID, needed to attach item prototypes.
        let mut rule_ids: Vec<(String, String)> = Vec::new();
        for (name, key) in lld_rules {
            let params = json!({
                "hostid": template_id,
                "name": name,
                "key_": key,
                "type": 2, // Zabbix trapper
                "delay": "0",
                "lifetime": "0",
            });
            match self.call("discoveryrule.create", params).await {
                Ok(result) => {
                    if let Some(id) = first_created_id(&result, "itemids") {
                        rule_ids.push((key.to_string(), id));
                    }
                }
                Err(e) => {
                    // The rule may already exist; look its ID up instead.
                    debug!(rule = name, error = %e, "LLD rule create failed, fetching existing");
                    let existing = self
                        .call(
                            "discoveryrule.get",
                            json!({
                                "output": ["itemid"],
                                "hostids": template_id,
                                "filter": { "key_": key },
                            }),
                        )
                        .await?;
                    if let Some(id) = collect_item_ids(&existing).into_iter().next() {
                        rule_ids.push((key.to_string(), id));
                    }
                }
            }
        }

        // Item prototypes so that discovered entities produce actual trapper
        // items that accept score data.
        let prototypes = [
            (
                HOSTS_LLD_KEY,
                "Host {#H.VNAME} CVSS Score",
                "vulners.hosts[{#H.ID}]",
            ),
            (
                PACKAGES_LLD_KEY,
                "Package {#P.NAME} {#P.VERSION} ({#P.ARCH}) CVSS Score",
                "vulners.packages[{#P.NAME},{#P.VERSION},{#P.ARCH}]",
            ),
            (
                BULLETINS_LLD_KEY,
                "Bulletin {#B.ID} CVSS Score",
                "vulners.bulletins[{#B.ID}]",
            ),
        ];
        for (rule_key, name, key) in prototypes {
            let Some((_, rule_id)) = rule_ids.iter().find(|(k, _)| k == rule_key) else {
                continue;
            };
            let params = json!({
                "hostid": template_id,
                "ruleid": rule_id,
                "name": name,
                "key_": key,
                "type": 2,
                "value_type": 0, // numeric float
                "delay": "0",
            });
            if let Err(e) = self.call("itemprototype.create", params).await {
                warn!(prototype = key, error = %e, "failed to create item prototype (may already exist)");
            }
        }

        for item in statistics_items(template_id) {
            let name = item["name"].clone();
            if let Err(e) = self.call("item.create", item).await {
                warn!(item = %name, error = %e, "failed to create item (may already exist)");
            }
        }

        // Trigger prototypes for alerting.
        let rule_keys: Vec<&str> = rule_ids.iter().map(|(k, _)| k.as_str()).collect();
        for trigger in trigger_prototypes(self.version_at_least(5, 4), &self.cfg.naming) {
            if !rule_keys.contains(&trigger.rule_key) {
                continue;
            }
            let params = json!({
                "expression": trigger.expression,
                "description": trigger.description,
                "url": trigger.url,
                "manual_close": 1,
                "priority": "0",
                "comments": trigger.comments,
                "status": "0",
            });
            if let Err(e) = self.call("triggerprototype.create", params).await {
                warn!(trigger = trigger.description, error = %e,
                    "failed to create trigger prototype (may already exist)");
            }
        }

        Ok(())
    }
}

/// Statistics trapper items: the Python-era keys, their aliases, the
/// histogram buckets, and the `vulners.stats[...]` family. Both key sets
/// are emitted for backward compatibility.
fn statistics_items(template_id: &str) -> Vec<Value> {
    // value_type 3 = unsigned (counts), 0 = float (scores).
    let mut items = vec![
        json!({"hostid": template_id, "name": "CVSS Score - Total Hosts", "key_": "vulners.TotalHosts", "type": 2, "value_type": 3}),
        json!({"hostid": template_id, "name": "CVSS Score - Maximum", "key_": "vulners.Maximum", "type": 2, "value_type": 0}),
        json!({"hostid": template_id, "name": "CVSS Score - Average", "key_": "vulners.Average", "type": 2, "value_type": 0}),
        json!({"hostid": template_id, "name": "CVSS Score - Minimum", "key_": "vulners.Minimum", "type": 2, "value_type": 0}),
        json!({"hostid": template_id, "name": "CVSS Score - Median", "key_": "vulners.scoreMedian", "type": 2, "value_type": 0}),
    ];

    for i in 0..=10 {
        items.push(json!({
            "hostid": template_id,
            "name": format!("CVSS Score - Hosts with a score ~ {i}"),
            "key_": format!("vulners.hostsCountScore{i}"),
            "type": 2,
            "value_type": 3,
        }));
    }

    items.extend([
        json!({"hostid": template_id, "name": "Vulners - Total Hosts", "key_": "vulners.stats[total_hosts]", "type": 2, "value_type": 3}),
        json!({"hostid": template_id, "name": "Vulners - Vulnerable Hosts", "key_": "vulners.stats[vuln_hosts]", "type": 2, "value_type": 3}),
        json!({"hostid": template_id, "name": "Vulners - Total Vulnerabilities", "key_": "vulners.stats[total_vulns]", "type": 2, "value_type": 3}),
        json!({"hostid": template_id, "name": "Vulners - Max CVSS Score", "key_": "vulners.stats[max_score]", "type": 2, "value_type": 0}),
        json!({"hostid": template_id, "name": "Vulners - Total Bulletins", "key_": "vulners.stats[total_bulletins]", "type": 2, "value_type": 3}),
        json!({"hostid": template_id, "name": "Vulners - Total CVEs", "key_": "vulners.stats[total_cves]", "type": 2, "value_type": 3}),
        json!({"hostid": template_id, "name": "Vulners - Average CVSS Score", "key_": "vulners.stats[avg_score]", "type": 2, "value_type": 0}),
    ]);

    items
}

/// One trigger prototype definition.
#[derive(Debug)]
pub(crate) struct TriggerDef {
    pub rule_key: &'static str,
    pub expression: String,
    pub description: &'static str,
    pub url: &'static str,
    pub comments: &'static str,
}

/// Build the trigger prototypes in the expression syntax the server
/// understands: `last(/host/key)` from 5.4 on, `{host:key.last()}` before.
pub(crate) fn trigger_prototypes(modern_syntax: bool, naming: &NamingConfig) -> Vec<TriggerDef> {
    let host_expr = if modern_syntax {
        format!(
            "last(/{}/vulners.hosts[{{#H.ID}}]) > 0 and {{#H.SCORE}} >= {{$SCORE.MIN}}",
            naming.hosts_host
        )
    } else {
        format!(
            "{{{}:vulners.hosts[{{#H.ID}}].last()}} > 0 and {{#H.SCORE}} >= {{$SCORE.MIN}}",
            naming.hosts_host
        )
    };
    let bulletin_expr = if modern_syntax {
        format!(
            "last(/{}/vulners.bulletins[{{#BULLETIN.ID}}]) > 0 and {{#BULLETIN.SCORE}} >= {{$SCORE.MIN}}",
            naming.bulletins_host
        )
    } else {
        format!(
            "{{{}:vulners.bulletins[{{#BULLETIN.ID}}].last()}} > 0 and {{#BULLETIN.SCORE}} >= {{$SCORE.MIN}}",
            naming.bulletins_host
        )
    };
    let package_expr = if modern_syntax {
        format!(
            "last(/{}/vulners.packages[{{#P.NAME}},{{#P.VERSION}},{{#P.ARCH}}]) > 0 and {{#PKG.SCORE}} >= {{$SCORE.MIN}}",
            naming.packages_host
        )
    } else {
        format!(
            "{{{}:vulners.packages[{{#P.NAME}},{{#P.VERSION}},{{#P.ARCH}}].last()}} > 0 and {{#PKG.SCORE}} >= {{$SCORE.MIN}}",
            naming.packages_host
        )
    };

    vec![
        TriggerDef {
            rule_key: HOSTS_LLD_KEY,
            expression: host_expr,
            description: "Score {#H.SCORE}. Host = {#H.VNAME}",
            url: "",
            comments: "Cumulative fix:\r\n\r\n{#H.FIX}",
        },
        TriggerDef {
            rule_key: BULLETINS_LLD_KEY,
            expression: bulletin_expr,
            description: "Impact {#BULLETIN.IMPACT}. Score {#BULLETIN.SCORE}. Affected {ITEM.VALUE}. Bulletin = {#BULLETIN.ID}",
            url: "https://vulners.com/info/{#BULLETIN.ID}",
            comments: "Vulnerabilities are found on:\r\n\r\n{#BULLETIN.HOSTS}",
        },
        TriggerDef {
            rule_key: PACKAGES_LLD_KEY,
            expression: package_expr,
            description: "Impact {#PKG.IMPACT}. Score {#PKG.SCORE}. Affected {ITEM.VALUE}. Package = {#PKG.ID}",
            url: "https://vulners.com/info/{#PKG.URL}",
            comments: "Vulnerabilities are found on:\r\n\r\n{#PKG.HOSTS}\r\n----\r\n{#PKG.FIX}",
        },
    ]
}

fn collect_item_ids(result: &Value) -> Vec<String> {
    result
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("itemid")?.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
