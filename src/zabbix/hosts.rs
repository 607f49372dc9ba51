//! Host, template, and item lookups.

use serde_json::json;

use crate::error::{Result, ZtcError};
use crate::zabbix::client::Client;
use crate::zabbix::types::{Host, Item, Template};

impl Client {
    /// All monitored hosts linked to the named template, with interfaces,
    /// groups, and parent templates selected.
    pub async fn hosts_with_template(&self, template_name: &str) -> Result<Vec<Host>> {
        let result = self
            .call(
                "template.get",
                json!({
                    "output": ["templateid", "host", "name"],
                    "filter": { "host": template_name },
                }),
            )
            .await?;
        let templates: Vec<Template> = serde_json::from_value(result)?;

        let Some(template) = templates.first() else {
            return Err(ZtcError::not_found(format!("template {template_name}")));
        };

        let result = self
            .call(
                "host.get",
                json!({
                    "output": ["hostid", "host", "name", "status"],
                    "templateids": template.template_id,
                    "monitored_hosts": true,
                    "selectInterfaces": ["interfaceid", "ip", "dns", "port", "type", "main", "useip"],
                    "selectGroups": ["groupid", "name"],
                    "selectParentTemplates": ["templateid", "host", "name"],
                }),
            )
            .await?;

        Ok(serde_json::from_value(result)?)
    }

    /// Look up a host by its ID.
    pub async fn host_by_id(&self, host_id: &str) -> Result<Host> {
        let result = self
            .call(
                "host.get",
                json!({
                    "output": ["hostid", "host", "name", "status"],
                    "hostids": host_id,
                    "selectInterfaces": ["interfaceid", "ip", "dns", "port", "type", "main", "useip"],
                    "selectGroups": ["groupid", "name"],
                    "selectParentTemplates": ["templateid", "host", "name"],
                }),
            )
            .await?;

        let hosts: Vec<Host> = serde_json::from_value(result)?;
        hosts
            .into_iter()
            .next()
            .ok_or_else(|| ZtcError::not_found(format!("host {host_id}")))
    }

    /// Look up a host by its technical name.
    pub async fn host_by_name(&self, name: &str) -> Result<Host> {
        let result = self
            .call(
                "host.get",
                json!({
                    "output": ["hostid", "host", "name", "status"],
                    "filter": { "host": name },
                    "selectInterfaces": ["interfaceid", "ip", "dns", "port", "type", "main", "useip"],
                    "selectGroups": ["groupid", "name"],
                    "selectParentTemplates": ["templateid", "host", "name"],
                }),
            )
            .await?;

        let hosts: Vec<Host> = serde_json::from_value(result)?;
        hosts
            .into_iter()
            .next()
            .ok_or_else(|| ZtcError::not_found(format!("host {name}")))
    }

    /// Items on a host matching a key pattern (wildcard search).
    pub async fn host_items(&self, host_id: &str, key_pattern: &str) -> Result<Vec<Item>> {
        let result = self
            .call(
                "item.get",
                json!({
                    "output": ["itemid", "hostid", "name", "key_", "lastvalue", "value_type", "state"],
                    "hostids": host_id,
                    "search": { "key_": key_pattern },
                    "searchWildcardsEnabled": true,
                }),
            )
            .await?;

        Ok(serde_json::from_value(result)?)
    }

    /// The most recent value of an item, addressed by host technical name
    /// and exact item key. Returns an empty string if the item is absent.
    pub async fn item_value(&self, host_tech_name: &str, item_key: &str) -> Result<String> {
        let result = self
            .call(
                "host.get",
                json!({
                    "output": ["hostid"],
                    "filter": { "host": host_tech_name },
                }),
            )
            .await?;
        let hosts: Vec<Host> = serde_json::from_value(result)?;
        let Some(host) = hosts.first() else {
            return Err(ZtcError::not_found(format!("host {host_tech_name}")));
        };

        let items = self.host_items(&host.host_id, item_key).await?;
        Ok(items
            .into_iter()
            .find(|item| item.key == item_key)
            .map(|item| item.value)
            .unwrap_or_default())
    }

    /// Create a host with interfaces, groups, and template links. Returns
    /// the new host ID.
    pub async fn create_host(
        &self,
        host: &Host,
        group_ids: &[String],
        template_ids: &[String],
    ) -> Result<String> {
        let groups: Vec<_> = group_ids.iter().map(|g| json!({ "groupid": g })).collect();
        let templates: Vec<_> = template_ids
            .iter()
            .map(|t| json!({ "templateid": t }))
            .collect();

        let mut params = json!({
            "host": host.host,
            "name": host.name,
            "groups": groups,
            "templates": templates,
        });
        if !host.interfaces.is_empty() {
            params["interfaces"] = serde_json::to_value(&host.interfaces)?;
        }

        let result = self.call("host.create", params).await?;
        first_created_id(&result, "hostids")
            .ok_or_else(|| ZtcError::config(format!("no hostid in response: {result}")))
    }
}

/// Pull the first ID out of a `{"<key>": ["123", ...]}` create response.
pub(crate) fn first_created_id(result: &serde_json::Value, key: &str) -> Option<String> {
    result
        .get(key)?
        .as_array()?
        .first()?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_created_id_extracts() {
        let v = json!({ "hostids": ["10105", "10106"] });
        assert_eq!(first_created_id(&v, "hostids"), Some("10105".to_string()));
        assert_eq!(first_created_id(&v, "templateids"), None);
        assert_eq!(first_created_id(&json!({ "hostids": [] }), "hostids"), None);
    }

    #[test]
    fn host_parses_api_shape() {
        let raw = json!([{
            "hostid": "10084",
            "host": "web01",
            "name": "Web Server 01",
            "status": "0",
            "interfaces": [
                {"interfaceid": "1", "ip": "192.0.2.10", "dns": "", "port": "10050",
                 "type": "1", "main": "1", "useip": "1"}
            ],
            "groups": [{"groupid": "2", "name": "Linux servers"}],
            "parentTemplates": [{"templateid": "10001", "host": "tmpl.vulners.os-report", "name": "OS Report"}]
        }]);

        let hosts: Vec<Host> = serde_json::from_value(raw).unwrap();
        assert_eq!(hosts.len(), 1);
        let host = &hosts[0];
        assert_eq!(host.host_id, "10084");
        assert_eq!(host.interfaces[0].interface_type, "1");
        assert_eq!(host.interfaces[0].use_ip, "1");
        assert_eq!(host.templates[0].host, "tmpl.vulners.os-report");
    }
}
