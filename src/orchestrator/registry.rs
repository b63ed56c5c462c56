//! Service and container registry
//!
//! Both maps live behind a single lock so a container is never visible in
//! one and missing from the other.

use crate::container::{ContainerRecord, ContainerRole, ContainerStatus};
use crate::error::{BrockerError, Result};
use crate::service::Service;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

#[derive(Debug, Default)]
pub struct Registry {
    services: HashMap<String, Service>,
    containers: HashMap<String, ContainerRecord>,
    /// Names whose bridge is being created
    reserved: HashSet<String>,
    bridges_created: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a service name and the sequence number its bridge is named with
    ///
    /// The sequence also identifies this instance of the service, so work
    /// started for a stopped service cannot touch a later one of the same name.
    pub fn reserve_service(&mut self, name: &str) -> Result<u64> {
        if self.services.contains_key(name) || self.reserved.contains(name) {
            return Err(BrockerError::ServiceExists(name.to_string()));
        }
        self.reserved.insert(name.to_string());
        self.bridges_created += 1;
        Ok(self.bridges_created)
    }

    /// Give up a reservation whose bridge could not be created
    pub fn cancel_reservation(&mut self, name: &str) {
        self.reserved.remove(name);
    }

    /// Insert a reserved service whose bridge has just been created
    pub fn insert_service(&mut self, service: Service) {
        self.reserved.remove(&service.name);
        self.services.insert(service.name.clone(), service);
    }

    /// Remove a service together with all of its containers
    ///
    /// Returns the service and the records of members that were still
    /// active, now marked closed. Members already being closed are dropped
    /// without being returned.
    pub fn take_service(&mut self, name: &str) -> Result<(Service, Vec<ContainerRecord>)> {
        let service = self
            .services
            .remove(name)
            .ok_or_else(|| BrockerError::ServiceNotFound(name.to_string()))?;
        let mut closing = Vec::new();
        for member in &service.members {
            let Some(mut record) = self.containers.remove(member) else {
                continue;
            };
            if record.active {
                record.active = false;
                record.status = ContainerStatus::Closed;
                closing.push(record);
            }
        }
        Ok((service, closing))
    }

    pub fn service(&self, name: &str) -> Result<&Service> {
        self.services
            .get(name)
            .ok_or_else(|| BrockerError::ServiceNotFound(name.to_string()))
    }

    pub fn service_mut(&mut self, name: &str) -> Result<&mut Service> {
        self.services
            .get_mut(name)
            .ok_or_else(|| BrockerError::ServiceNotFound(name.to_string()))
    }

    /// A service, provided it is still the given instance
    pub fn instance(&self, name: &str, instance: u64) -> Result<&Service> {
        self.services
            .get(name)
            .filter(|s| s.instance == instance)
            .ok_or_else(|| BrockerError::ServiceNotFound(name.to_string()))
    }

    fn instance_mut(&mut self, name: &str, instance: u64) -> Result<&mut Service> {
        self.services
            .get_mut(name)
            .filter(|s| s.instance == instance)
            .ok_or_else(|| BrockerError::ServiceNotFound(name.to_string()))
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Hand out an address on the service bridge
    ///
    /// The proxy always gets the reserved `.2`; workloads pop the pool head.
    pub fn allocate_address(
        &mut self,
        service: &str,
        instance: u64,
        role: ContainerRole,
    ) -> Result<Ipv4Addr> {
        let service = self.instance_mut(service, instance)?;
        match role {
            ContainerRole::Proxy => Ok(service.bridge.address.proxy_address()),
            ContainerRole::Workload => service
                .pool
                .allocate()
                .ok_or_else(|| BrockerError::PoolExhausted(service.name.clone())),
        }
    }

    /// Return a workload address to the tail of its service's pool
    ///
    /// A service instance that is already gone has no pool left to return to.
    pub fn release_address(
        &mut self,
        service: &str,
        instance: u64,
        role: ContainerRole,
        ip: Ipv4Addr,
    ) {
        if role == ContainerRole::Proxy {
            return;
        }
        if let Ok(service) = self.instance_mut(service, instance) {
            service.pool.release(ip);
        }
    }

    /// Make a provisioned container visible in both maps
    pub fn register(&mut self, record: ContainerRecord, instance: u64) -> Result<()> {
        let service = self.instance_mut(&record.service_name, instance)?;

        if record.is_proxy() {
            let pid = record
                .pid
                .ok_or_else(|| BrockerError::Runtime(format!("{} has no pid", record.name)))?;
            service.proxy = Some(crate::service::ProxyRef {
                name: record.name.clone(),
                pid,
                directory: record.directory.clone(),
            });
        }
        service.join(&record.name);
        self.containers.insert(record.name.clone(), record);
        Ok(())
    }

    /// Remove a container from both maps and give its address back
    ///
    /// Returns the registry's copy of the record, or None if it was never
    /// registered or has already been removed along with its service.
    pub fn deregister(&mut self, name: &str) -> Option<ContainerRecord> {
        let record = self.containers.remove(name)?;
        // Registered containers always belong to the live instance.
        if let Some(service) = self.services.get_mut(&record.service_name) {
            service.leave(name);
            if service.proxy.as_ref().is_some_and(|p| p.name == name) {
                service.proxy = None;
            }
            if let (Some(ip), ContainerRole::Workload) = (record.ip, record.role) {
                service.pool.release(ip);
            }
        }
        Some(record)
    }

    pub fn container(&self, name: &str) -> Result<&ContainerRecord> {
        self.containers
            .get(name)
            .ok_or_else(|| BrockerError::ContainerNotFound(name.to_string()))
    }

    pub fn container_mut(&mut self, name: &str) -> Result<&mut ContainerRecord> {
        self.containers
            .get_mut(name)
            .ok_or_else(|| BrockerError::ContainerNotFound(name.to_string()))
    }

    /// Mark an active container closed; returns None if it was already inactive
    pub fn begin_close(&mut self, name: &str) -> Result<Option<ContainerRecord>> {
        let record = self.container_mut(name)?;
        if !record.active {
            return Ok(None);
        }
        record.active = false;
        record.status = ContainerStatus::Closed;
        Ok(Some(record.clone()))
    }

    /// All registered containers, oldest first
    pub fn containers(&self) -> Vec<&ContainerRecord> {
        let mut records: Vec<&ContainerRecord> = self.containers.values().collect();
        records.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.name.cmp(&b.name)));
        records
    }

    /// Active workload backends of a service in join order, as `ip:port`
    pub fn backends(&self, service: &str, port: u16) -> Vec<String> {
        let Some(service) = self.services.get(service) else {
            return Vec::new();
        };
        service
            .members
            .iter()
            .filter_map(|name| self.containers.get(name))
            .filter(|r| r.role == ContainerRole::Workload && r.active)
            .filter_map(|r| r.ip)
            .map(|ip| format!("{}:{}", ip, port))
            .collect()
    }

    /// Check that both maps agree with each other
    #[cfg(test)]
    pub fn is_consistent(&self) -> bool {
        let members_known = self.services.values().all(|s| {
            s.members.iter().all(|m| {
                self.containers
                    .get(m)
                    .is_some_and(|r| r.service_name == s.name)
            })
        });
        let containers_listed = self.containers.values().all(|r| {
            self.services
                .get(&r.service_name)
                .is_some_and(|s| s.is_member(&r.name))
        });
        members_known && containers_listed
    }
}
