//! Attribute Index
//!
//! Maps `(service, characteristic)` ids to transport handles. Built in one
//! step from a discovery result and dropped in one step on disconnect or
//! rediscovery; a lookup never sees a partially built index.

use crate::error::{GattError, GattResult};
use crate::gatt::types::{
    AttributeHandle, CharacteristicProperties, DescriptorHandle, Service,
};
use crate::uuid::Uuid;
use log::warn;
use std::collections::HashMap;

/// What the index knows about one characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexedCharacteristic {
    pub handle: AttributeHandle,
    pub properties: CharacteristicProperties,
    pub descriptors: HashMap<Uuid, DescriptorHandle>,
}

#[derive(Debug, Default)]
struct Tables {
    by_id: HashMap<(Uuid, Uuid), IndexedCharacteristic>,
    by_handle: HashMap<AttributeHandle, (Uuid, Uuid)>,
    services: Vec<Service>,
}

#[derive(Debug, Default)]
pub(crate) struct AttributeIndex {
    tables: Option<Tables>,
}

impl AttributeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole index with the given discovery result
    pub fn rebuild(&mut self, services: Vec<Service>) {
        let mut tables = Tables::default();

        for service in &services {
            for characteristic in &service.characteristics {
                let key = (service.uuid, characteristic.uuid);
                if tables.by_id.contains_key(&key) {
                    warn!(
                        "Duplicate characteristic {} in service {}, keeping the first",
                        characteristic.uuid, service.uuid
                    );
                    continue;
                }

                let descriptors = characteristic
                    .descriptors
                    .iter()
                    .map(|d| (d.uuid, d.handle))
                    .collect();
                tables.by_id.insert(
                    key,
                    IndexedCharacteristic {
                        handle: characteristic.handle,
                        properties: characteristic.properties,
                        descriptors,
                    },
                );
                tables.by_handle.insert(characteristic.handle, key);
            }
        }

        tables.services = services;
        self.tables = Some(tables);
    }

    pub fn invalidate(&mut self) {
        self.tables = None;
    }

    pub fn is_built(&self) -> bool {
        self.tables.is_some()
    }

    pub fn len(&self) -> usize {
        self.tables.as_ref().map_or(0, |t| t.by_id.len())
    }

    pub fn services(&self) -> &[Service] {
        self.tables.as_ref().map_or(&[][..], |t| t.services.as_slice())
    }

    pub fn lookup(&self, service: Uuid, characteristic: Uuid) -> GattResult<&IndexedCharacteristic> {
        let tables = self.tables.as_ref().ok_or(GattError::NotReady)?;
        tables
            .by_id
            .get(&(service, characteristic))
            .ok_or(GattError::AttributeNotFound {
                service,
                characteristic,
                descriptor: None,
            })
    }

    pub fn lookup_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> GattResult<DescriptorHandle> {
        self.lookup(service, characteristic)?
            .descriptors
            .get(&descriptor)
            .copied()
            .ok_or(GattError::AttributeNotFound {
                service,
                characteristic,
                descriptor: Some(descriptor),
            })
    }

    /// Reverse lookup used for unsolicited notifications
    pub fn resolve(&self, handle: AttributeHandle) -> Option<(Uuid, Uuid)> {
        self.tables.as_ref()?.by_handle.get(&handle).copied()
    }
}
