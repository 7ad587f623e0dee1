//! Devices under monitoring and per-gateway test-IP configuration.

use std::collections::HashMap;

use crate::db::GatewayTestIPConfig;

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    /// IP -> owning network id
    devices: HashMap<String, String>,
    gateways: HashMap<String, GatewayTestIPConfig>,
}

impl DeviceRegistry {
    /// Merge `devices` into the monitored set.
    pub fn register_devices(&mut self, devices: HashMap<String, String>) {
        self.devices.extend(devices);
    }

    pub fn register(&mut self, ip: &str, network_id: &str) {
        self.devices.insert(ip.to_string(), network_id.to_string());
    }

    /// Returns how many of `ips` were registered.
    pub fn unregister_devices(&mut self, ips: &[String]) -> usize {
        ips.iter()
            .filter(|ip| self.devices.remove(ip.as_str()).is_some())
            .count()
    }

    pub fn set_monitored_devices(&mut self, devices: HashMap<String, String>) {
        self.devices = devices;
    }

    pub fn monitored_devices(&self) -> &HashMap<String, String> {
        &self.devices
    }

    pub fn is_registered(&self, ip: &str) -> bool {
        self.devices.contains_key(ip)
    }

    pub fn set_gateway(&mut self, config: GatewayTestIPConfig) {
        self.gateways.insert(config.gateway_ip.clone(), config);
    }

    pub fn gateway(&self, gateway_ip: &str) -> Option<&GatewayTestIPConfig> {
        self.gateways.get(gateway_ip)
    }

    pub fn gateways(&self) -> &HashMap<String, GatewayTestIPConfig> {
        &self.gateways
    }

    pub fn replace_gateways(&mut self, gateways: HashMap<String, GatewayTestIPConfig>) {
        self.gateways = gateways;
    }

    pub fn remove_gateway(&mut self, gateway_ip: &str) -> Option<GatewayTestIPConfig> {
        self.gateways.remove(gateway_ip)
    }

    /// Gateways whose test IPs should be checked, sorted for stable pass order.
    pub fn enabled_gateway_ips(&self) -> Vec<String> {
        let mut ips: Vec<String> = self
            .gateways
            .values()
            .filter(|c| c.enabled && !c.test_ips.is_empty())
            .map(|c| c.gateway_ip.clone())
            .collect();
        ips.sort();
        ips
    }
}
