//! Device class catalog
//!
//! Loaded from plugins at registration and never changed afterwards.

use indexmap::IndexMap;
use std::collections::BTreeSet;

use hub_core::{DeviceClass, DeviceClassId, PluginId, ThingError, ThingResult, Vendor, VendorId};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct DeviceClassCatalog {
    vendors: IndexMap<VendorId, Vendor>,
    classes: IndexMap<DeviceClassId, DeviceClass>,
}

impl DeviceClassCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a plugin's vendors and classes.
    ///
    /// All-or-nothing: a class with a duplicate id or an unknown vendor
    /// rejects the whole plugin. Classes are stamped with `plugin_id`.
    pub fn add_plugin(
        &mut self,
        plugin_id: PluginId,
        vendors: Vec<Vendor>,
        classes: Vec<DeviceClass>,
    ) -> ThingResult<()> {
        let known_vendor =
            |id: &VendorId| self.vendors.contains_key(id) || vendors.iter().any(|v| &v.id == id);

        for (index, class) in classes.iter().enumerate() {
            if self.classes.contains_key(&class.id)
                || classes[..index].iter().any(|c| c.id == class.id)
            {
                warn!(class = %class.name, id = %class.id, "Duplicate device class id");
                return Err(ThingError::DuplicateUuid);
            }
            if !known_vendor(&class.vendor_id) {
                warn!(class = %class.name, vendor = %class.vendor_id, "Device class has unknown vendor");
                return Err(ThingError::VendorNotFound);
            }
        }

        for vendor in vendors {
            self.vendors.entry(vendor.id).or_insert(vendor);
        }
        for mut class in classes {
            if class.plugin_id != plugin_id {
                debug!(class = %class.name, "Assigning device class to its plugin");
                class.plugin_id = plugin_id;
            }
            self.classes.insert(class.id, class);
        }
        Ok(())
    }

    pub fn find_class(&self, id: &DeviceClassId) -> Option<&DeviceClass> {
        self.classes.get(id)
    }

    pub fn classes(&self) -> impl Iterator<Item = &DeviceClass> {
        self.classes.values()
    }

    pub fn classes_by_vendor(&self, vendor_id: &VendorId) -> impl Iterator<Item = &DeviceClass> + '_ {
        let vendor_id = *vendor_id;
        self.classes.values().filter(move |c| c.vendor_id == vendor_id)
    }

    pub fn vendors(&self) -> impl Iterator<Item = &Vendor> {
        self.vendors.values()
    }

    pub fn find_vendor(&self, id: &VendorId) -> Option<&Vendor> {
        self.vendors.get(id)
    }

    /// Every interface tag implemented by some class, sorted
    pub fn interfaces(&self) -> Vec<String> {
        self.classes
            .values()
            .flat_map(|c| c.interfaces.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(vendor: VendorId, name: &str) -> DeviceClass {
        DeviceClass::new(DeviceClassId::generate(), vendor, PluginId::nil(), name)
    }

    #[test]
    fn test_add_plugin_stamps_plugin_id() {
        let mut catalog = DeviceClassCatalog::new();
        let vendor = Vendor::new(VendorId::generate(), "acme");
        let plugin = PluginId::generate();
        let lamp = class(vendor.id, "lamp").with_interfaces(&["light", "power"]);
        let plug = class(vendor.id, "plug").with_interfaces(&["power"]);

        catalog
            .add_plugin(plugin, vec![vendor.clone()], vec![lamp.clone(), plug])
            .unwrap();

        assert_eq!(catalog.find_class(&lamp.id).unwrap().plugin_id, plugin);
        assert_eq!(catalog.classes_by_vendor(&vendor.id).count(), 2);
        assert_eq!(catalog.interfaces(), vec!["light", "power"]);
        assert!(catalog.find_vendor(&vendor.id).is_some());
    }

    #[test]
    fn test_duplicate_class_rejects_plugin() {
        let mut catalog = DeviceClassCatalog::new();
        let vendor = Vendor::new(VendorId::generate(), "acme");
        let lamp = class(vendor.id, "lamp");
        catalog
            .add_plugin(PluginId::generate(), vec![vendor.clone()], vec![lamp.clone()])
            .unwrap();

        let other = class(vendor.id, "other");
        assert_eq!(
            catalog.add_plugin(PluginId::generate(), vec![], vec![other.clone(), lamp]),
            Err(ThingError::DuplicateUuid)
        );
        assert!(catalog.find_class(&other.id).is_none());
    }

    #[test]
    fn test_unknown_vendor() {
        let mut catalog = DeviceClassCatalog::new();
        let orphan = class(VendorId::generate(), "orphan");
        assert_eq!(
            catalog.add_plugin(PluginId::generate(), vec![], vec![orphan]),
            Err(ThingError::VendorNotFound)
        );
    }
}
