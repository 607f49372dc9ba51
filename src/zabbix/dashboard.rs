//! Virtual hosts, dashboard, and actions provisioning.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{Result, ZtcError};
use crate::zabbix::client::Client;
use crate::zabbix::hosts::first_created_id;
use crate::zabbix::types::{Host, Item};

impl Client {
    /// Ensure the four virtual hosts that hold aggregated vulnerability
    /// data, together with their group and the overlay template. When
    /// `force` is set, existing hosts are updated with current template
    /// linkage and macros.
    pub async fn ensure_virtual_hosts(&self, force: bool) -> Result<()> {
        let group_id = self.ensure_host_group(&self.cfg.naming.group_name).await?;
        let template_id = self.ensure_overlay_template(&group_id, force).await?;

        let naming = &self.cfg.naming;
        let virtual_hosts = [
            (&naming.hosts_host, &naming.hosts_visible_name),
            (&naming.packages_host, &naming.packages_visible_name),
            (&naming.bulletins_host, &naming.bulletins_visible_name),
            (&naming.statistics_host, &naming.statistics_visible_name),
        ];

        for (host, name) in virtual_hosts {
            self.ensure_virtual_host(host, name, &group_id, &template_id, force)
                .await
                .map_err(|e| {
                    ZtcError::config(format!("failed to create virtual host {host}: {e}"))
                })?;
        }

        info!("virtual hosts ready");
        Ok(())
    }

    /// Create one virtual host if it doesn't exist. Virtual hosts carry a
    /// loopback agent interface (required by Zabbix but never used) and the
    /// `{$SCORE.MIN}` macro the trigger prototypes reference.
    async fn ensure_virtual_host(
        &self,
        host: &str,
        name: &str,
        group_id: &str,
        template_id: &str,
        force: bool,
    ) -> Result<()> {
        let result = self
            .call(
                "host.get",
                json!({
                    "output": ["hostid", "host"],
                    "filter": { "host": host },
                }),
            )
            .await?;
        let existing: Vec<Host> = serde_json::from_value(result)?;

        if let Some(found) = existing.first() {
            if force {
                info!(host, "force-updating virtual host");
                self.call(
                    "host.update",
                    json!({
                        "hostid": found.host_id,
                        "templates": [{ "templateid": template_id }],
                        "macros": [{
                            "macro": "{$SCORE.MIN}",
                            "value": format!("{}", self.cfg.scan.min_cvss),
                        }],
                    }),
                )
                .await?;
                return Ok(());
            }
            debug!(host, "virtual host already exists");
            return Ok(());
        }

        self.call(
            "host.create",
            json!({
                "host": host,
                "name": name,
                "groups": [{ "groupid": group_id }],
                "templates": [{ "templateid": template_id }],
                "interfaces": [{
                    "type": 1, // agent
                    "main": 1,
                    "useip": 1,
                    "ip": "127.0.0.1",
                    "dns": self.cfg.zabbix.server_fqdn,
                    "port": "10050",
                }],
                "macros": [{
                    "macro": "{$SCORE.MIN}",
                    "value": format!("{}", self.cfg.scan.min_cvss),
                }],
            }),
        )
        .await?;

        info!(host, "created virtual host");
        Ok(())
    }

    /// Ensure the dashboard exists, creating the statistics graphs it
    /// embeds first. When `force` is set, an existing dashboard is deleted
    /// and recreated.
    pub async fn ensure_dashboard(&self, force: bool) -> Result<()> {
        let (median_graph_id, score_graph_id) = match self.create_statistics_graphs().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "failed to create statistics graphs");
                (String::new(), String::new())
            }
        };

        let dashboard_name = &self.cfg.naming.dashboard_name;

        let result = self
            .call(
                "dashboard.get",
                json!({
                    "output": ["dashboardid", "name"],
                    "filter": { "name": dashboard_name },
                }),
            )
            .await?;

        let dashboards = result.as_array().cloned().unwrap_or_default();
        if let Some(existing) = dashboards.first() {
            if !force {
                info!("dashboard already exists");
                return Ok(());
            }
            if let Some(id) = existing.get("dashboardid").and_then(Value::as_str) {
                info!("force mode: deleting existing dashboard");
                self.call("dashboard.delete", json!([id])).await?;
            }
        }

        let hosts_host_id = self.resolve_host_id(&self.cfg.naming.hosts_host).await;
        let packages_host_id = self.resolve_host_id(&self.cfg.naming.packages_host).await;
        let bulletins_host_id = self.resolve_host_id(&self.cfg.naming.bulletins_host).await;

        let mut widgets = vec![
            problems_widget("Vulners - Hosts", 0, 8, "600", &hosts_host_id),
            problems_widget("Vulners - Packages", 8, 0, "600", &packages_host_id),
            problems_widget("Vulners - Bulletins", 8, 8, "900", &bulletins_host_id),
        ];

        if !score_graph_id.is_empty() {
            widgets.push(graph_widget(
                "CVSS Score ratio by servers",
                0,
                0,
                &score_graph_id,
            ));
        }
        if !median_graph_id.is_empty() {
            widgets.push(graph_widget("Median CVSS Score", 0, 4, &median_graph_id));
        }

        let mut params = json!({
            "name": dashboard_name,
            "display_period": 30,
            "auto_start": 1,
        });

        // Servers newer than 5.0 take paged dashboards; 5.0 itself still
        // wants the flat widget list.
        if self.version_at_least(5, 1) {
            params["pages"] = json!([{ "widgets": widgets }]);
        } else {
            params["widgets"] = json!(widgets);
        }

        self.call("dashboard.create", params).await?;
        info!("created dashboard");
        Ok(())
    }

    /// Look up the host ID for a virtual host, or an empty string.
    async fn resolve_host_id(&self, tech_name: &str) -> String {
        let result = self
            .call(
                "host.get",
                json!({
                    "output": ["hostid"],
                    "filter": { "host": tech_name },
                }),
            )
            .await;
        let Ok(result) = result else {
            return String::new();
        };
        serde_json::from_value::<Vec<Host>>(result)
            .ok()
            .and_then(|hosts| hosts.into_iter().next())
            .map(|host| host.host_id)
            .unwrap_or_default()
    }

    /// Create the median-CVSS line graph and the 11-slice score-ratio pie
    /// graph on the statistics virtual host. Returns
    /// `(median_graph_id, score_graph_id)`; empty strings where creation
    /// was skipped or failed.
    async fn create_statistics_graphs(&self) -> Result<(String, String)> {
        let statistics_host_id = self.resolve_host_id(&self.cfg.naming.statistics_host).await;
        if statistics_host_id.is_empty() {
            return Err(ZtcError::not_found("statistics virtual host"));
        }

        let median_item_id = self
            .find_item_id(&statistics_host_id, "vulners.scoreMedian")
            .await;
        let mut median_graph_id = String::new();
        if !median_item_id.is_empty() {
            let params = json!({
                "name": "Median CVSS Score",
                "width": 1000,
                "height": 300,
                "show_work_period": 0,
                "graphtype": 0, // normal
                "show_legend": 0,
                "show_3d": 0,
                "gitems": [{ "itemid": median_item_id, "color": "00AAAA", "drawtype": "5" }],
            });
            match self.call("graph.create", params).await {
                Ok(result) => {
                    median_graph_id = first_created_id(&result, "graphids").unwrap_or_default();
                }
                Err(e) => {
                    warn!(error = %e, "failed to create median CVSS graph (may already exist)")
                }
            }
        }

        let colors = [
            "DD0000", "EE0000", "FF3333", "EEEE00", "FFFF66", "00EEEE", "00DDDD", "3333FF",
            "6666FF", "00DD00", "33FF33",
        ];
        let mut gitems = Vec::new();
        for (i, color) in colors.iter().enumerate() {
            let item_id = self
                .find_item_id(&statistics_host_id, &format!("vulners.hostsCountScore{i}"))
                .await;
            if item_id.is_empty() {
                continue;
            }
            gitems.push(json!({
                "itemid": item_id,
                "color": color,
                "drawtype": "5",
                "calc_fnc": "9",
            }));
        }

        let mut score_graph_id = String::new();
        if gitems.len() == 11 {
            let params = json!({
                "name": "CVSS Score ratio by servers",
                "width": 1000,
                "height": 300,
                "show_work_period": 0,
                "graphtype": 2, // pie
                "show_legend": 0,
                "show_3d": 1,
                "gitems": gitems,
            });
            match self.call("graph.create", params).await {
                Ok(result) => {
                    score_graph_id = first_created_id(&result, "graphids").unwrap_or_default();
                }
                Err(e) => {
                    warn!(error = %e, "failed to create score ratio graph (may already exist)")
                }
            }
        } else {
            warn!("not all histogram items found, skipping score ratio graph");
        }

        Ok((median_graph_id, score_graph_id))
    }

    async fn find_item_id(&self, host_id: &str, key: &str) -> String {
        let result = self
            .call(
                "item.get",
                json!({
                    "output": ["itemid"],
                    "hostids": host_id,
                    "filter": { "key_": key },
                }),
            )
            .await;
        let Ok(result) = result else {
            return String::new();
        };
        serde_json::from_value::<Vec<Item>>(result)
            .ok()
            .and_then(|items| items.into_iter().next())
            .map(|item| item.item_id)
            .unwrap_or_default()
    }

    /// Check whether the alerting action exists. Action creation needs
    /// operation details that only make sense in the Zabbix UI, so this
    /// only reports.
    pub async fn ensure_actions(&self) -> Result<()> {
        let result = self
            .call(
                "action.get",
                json!({
                    "output": ["actionid", "name"],
                    "filter": { "name": self.cfg.naming.action_name },
                }),
            )
            .await?;

        let actions = result.as_array().cloned().unwrap_or_default();
        if !actions.is_empty() {
            info!("action already exists");
            return Ok(());
        }

        info!("action creation requires manual configuration in the Zabbix UI");
        Ok(())
    }
}

fn problems_widget(name: &str, x: u32, y: u32, refresh: &str, host_id: &str) -> Value {
    json!({
        "type": "problems",
        "name": name,
        "x": x,
        "y": y,
        "width": 8,
        "height": 8,
        "fields": [
            { "type": 0, "name": "rf_rate", "value": refresh },
            { "type": 0, "name": "show", "value": "3" },
            { "type": 0, "name": "show_lines", "value": "100" },
            { "type": 0, "name": "sort_triggers", "value": "16" },
            { "type": 3, "name": "hostids", "value": host_id },
        ],
    })
}

fn graph_widget(name: &str, x: u32, y: u32, graph_id: &str) -> Value {
    json!({
        "type": "graph",
        "name": name,
        "x": x,
        "y": y,
        "width": 8,
        "height": 4,
        "fields": [
            { "type": 0, "name": "rf_rate", "value": "600" },
            { "type": 0, "name": "show_legend", "value": "0" },
            { "type": 6, "name": "graphid", "value": graph_id },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problems_widget_shape() {
        let widget = problems_widget("Vulners - Hosts", 0, 8, "600", "10105");
        assert_eq!(widget["type"], "problems");
        assert_eq!(widget["width"], 8);
        let fields = widget["fields"].as_array().unwrap();
        assert!(fields
            .iter()
            .any(|f| f["name"] == "hostids" && f["value"] == "10105" && f["type"] == 3));
    }

    #[test]
    fn graph_widget_shape() {
        let widget = graph_widget("Median CVSS Score", 0, 4, "42");
        assert_eq!(widget["type"], "graph");
        assert_eq!(widget["height"], 4);
        let fields = widget["fields"].as_array().unwrap();
        assert!(fields
            .iter()
            .any(|f| f["name"] == "graphid" && f["value"] == "42" && f["type"] == 6));
    }
}
