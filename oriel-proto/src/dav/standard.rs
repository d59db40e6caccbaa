use std::sync::Arc;

use oriel_dav::types::{LockEntry, LockScope, LockType, QName};
use oriel_dav::value::{PropertyValue, ValueType};

use super::error::DavError;
use super::property::{PropertyError, PropertyMetaData, PropertySource};
use super::resource::DavResource;
use super::services::LockManager;

/// Live properties of RFC4918, plus the quota properties of RFC4331 and the
/// Microsoft `iscollection` / `isreadonly` / `name` extensions.
///
/// Only the names a resource can actually answer are advertised, so a file
/// without content type does not list `getcontenttype`.
pub struct StandardProperties {
    locks: Arc<dyn LockManager>,
}

impl StandardProperties {
    pub fn new(locks: Arc<dyn LockManager>) -> Self {
        Self { locks }
    }

    fn available(&self, resource: &dyn DavResource) -> Vec<(&'static str, PropertyMetaData)> {
        use PropertyMetaData::ReadOnly;

        let mut list = vec![];
        if !resource.is_collection() {
            if resource.content_length().is_some() {
                list.push(("getcontentlength", ReadOnly(ValueType::Number)));
            }
            if resource.content_type().is_some() {
                list.push(("getcontenttype", ReadOnly(ValueType::Text)));
            }
        }
        if resource.created().is_some() {
            list.push(("creationdate", ReadOnly(ValueType::Date)));
            list.push(("getcreated", ReadOnly(ValueType::Date)));
        }
        if resource.modified().is_some() {
            list.push(("getlastmodified", ReadOnly(ValueType::HttpDate)));
        }
        list.push((
            "displayname",
            match resource.as_display_name_store() {
                Some(_) => PropertyMetaData::Writable(ValueType::Text),
                None => ReadOnly(ValueType::Text),
            },
        ));
        list.push(("resourcetype", ReadOnly(ValueType::ResourceType)));
        if resource.etag().is_some() {
            list.push(("getetag", ReadOnly(ValueType::Text)));
        }
        list.push(("supported-report-set", ReadOnly(ValueType::ReportSet)));
        if resource.is_lockable() {
            list.push(("lockdiscovery", ReadOnly(ValueType::LockDiscovery)));
            list.push(("supportedlock", ReadOnly(ValueType::SupportedLock)));
        }
        if resource.quota().is_some() {
            list.push(("quota-available-bytes", ReadOnly(ValueType::Number)));
            list.push(("quota-used-bytes", ReadOnly(ValueType::Number)));
        }
        list.push(("iscollection", ReadOnly(ValueType::Number)));
        list.push(("isreadonly", ReadOnly(ValueType::Number)));
        list.push(("name", ReadOnly(ValueType::Text)));
        list
    }
}

fn flag(v: bool) -> PropertyValue {
    PropertyValue::Number(v as u64)
}

fn rejected(err: DavError) -> PropertyError {
    match err {
        DavError::NotAuthorized | DavError::Forbidden => PropertyError::NotAuthorized,
        e => PropertyError::rejected(e.status().as_u16(), e.to_string()),
    }
}

impl PropertySource for StandardProperties {
    fn metadata(&self, name: &QName, resource: &dyn DavResource) -> PropertyMetaData {
        if !name.is_dav() {
            return PropertyMetaData::Unknown;
        }
        self.available(resource)
            .into_iter()
            .find(|(local, _)| *local == name.local)
            .map(|(_, meta)| meta)
            .unwrap_or(PropertyMetaData::Unknown)
    }

    fn get(
        &self,
        name: &QName,
        resource: &dyn DavResource,
    ) -> Result<Option<PropertyValue>, PropertyError> {
        let value = match name.local.as_str() {
            "getcontentlength" => resource.content_length().map(PropertyValue::Number),
            "getcontenttype" => resource.content_type().map(PropertyValue::Text),
            "creationdate" | "getcreated" => resource.created().map(PropertyValue::Date),
            "getlastmodified" => resource.modified().map(PropertyValue::HttpDate),
            "displayname" => Some(PropertyValue::Text(resource.display_name())),
            "resourcetype" => Some(PropertyValue::ResourceType(
                match resource.is_collection() {
                    true => vec![QName::dav("collection")],
                    false => vec![],
                },
            )),
            "getetag" => resource.etag().map(PropertyValue::Text),
            "supported-report-set" => Some(PropertyValue::ReportSet(vec![])),
            "lockdiscovery" => Some(PropertyValue::LockDiscovery(self.locks.current(resource))),
            "supportedlock" => Some(PropertyValue::SupportedLock(vec![
                LockEntry {
                    scope: LockScope::Exclusive,
                    kind: LockType::Write,
                },
                LockEntry {
                    scope: LockScope::Shared,
                    kind: LockType::Write,
                },
            ])),
            "quota-available-bytes" => resource.quota().map(|q| PropertyValue::Number(q.available)),
            "quota-used-bytes" => resource.quota().map(|q| PropertyValue::Number(q.used)),
            "iscollection" => Some(flag(resource.is_collection())),
            "isreadonly" => Some(flag(
                !resource.is_collection() && resource.as_content().is_none(),
            )),
            "name" => Some(PropertyValue::Text(resource.name())),
            _ => return Err(PropertyError::rejected(404, "Unknown property")),
        };
        Ok(value)
    }

    fn set(
        &self,
        name: &QName,
        value: PropertyValue,
        resource: &dyn DavResource,
    ) -> Result<(), PropertyError> {
        match (name.local.as_str(), resource.as_display_name_store()) {
            ("displayname", Some(store)) => {
                let text = value.as_text().unwrap_or_default();
                store.set_display_name(text.trim()).map_err(rejected)
            }
            _ => Err(PropertyError::rejected(403, "Property is read only")),
        }
    }

    fn clear(&self, _: &QName, _: &dyn DavResource) -> Result<(), PropertyError> {
        Err(PropertyError::rejected(403, "Property can not be removed"))
    }

    fn all_property_names(&self, resource: &dyn DavResource) -> Vec<QName> {
        self.available(resource)
            .into_iter()
            .map(|(local, _)| QName::dav(local))
            .collect()
    }
}

/// Client defined properties, kept verbatim on resources that can store them.
/// Any name outside of the DAV: namespace is writable.
pub struct DeadProperties;

impl PropertySource for DeadProperties {
    fn metadata(&self, name: &QName, resource: &dyn DavResource) -> PropertyMetaData {
        match (name.is_dav(), resource.as_dead_properties()) {
            (false, Some(_)) => PropertyMetaData::Writable(ValueType::Xml),
            _ => PropertyMetaData::Unknown,
        }
    }

    fn get(
        &self,
        name: &QName,
        resource: &dyn DavResource,
    ) -> Result<Option<PropertyValue>, PropertyError> {
        let stored = resource
            .as_dead_properties()
            .and_then(|store| store.dead_property(name))
            .ok_or_else(|| PropertyError::rejected(404, "Unknown property"))?;

        // plain text was unescaped when parsed, markup was kept raw
        Ok(Some(match stored.trim_start().starts_with('<') {
            true => PropertyValue::Xml(stored),
            false => PropertyValue::Text(stored),
        }))
    }

    fn set(
        &self,
        name: &QName,
        value: PropertyValue,
        resource: &dyn DavResource,
    ) -> Result<(), PropertyError> {
        let store = resource
            .as_dead_properties()
            .ok_or_else(|| PropertyError::rejected(403, "Property is read only"))?;
        store.set_dead_property(name, value.as_text().unwrap_or_default());
        Ok(())
    }

    fn clear(&self, name: &QName, resource: &dyn DavResource) -> Result<(), PropertyError> {
        let store = resource
            .as_dead_properties()
            .ok_or_else(|| PropertyError::rejected(403, "Property is read only"))?;
        store.remove_dead_property(name);
        Ok(())
    }

    fn all_property_names(&self, resource: &dyn DavResource) -> Vec<QName> {
        resource
            .as_dead_properties()
            .map(|store| store.dead_property_names())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dav::lock::MemoryLockManager;
    use crate::dav::memory::MemoryFs;

    #[test]
    fn standard_names_follow_the_resource() {
        let fs = MemoryFs::new(Some(1000));
        fs.write_file("/notes.txt", "hello", Some("text/plain")).unwrap();
        let std = StandardProperties::new(Arc::new(MemoryLockManager::default()));

        let root = fs.root();
        let root_names = std.all_property_names(root.as_ref());
        assert!(root_names.contains(&QName::dav("quota-used-bytes")));
        assert!(!root_names.contains(&QName::dav("getcontentlength")));

        let file = fs.lookup("/notes.txt").unwrap();
        assert_eq!(
            std.get(&QName::dav("getcontentlength"), file.as_ref()).unwrap(),
            Some(PropertyValue::Number(5))
        );
        assert_eq!(
            std.get(&QName::dav("iscollection"), file.as_ref()).unwrap(),
            Some(PropertyValue::Number(0))
        );
        assert_eq!(
            std.metadata(&QName::dav("displayname"), file.as_ref()),
            PropertyMetaData::Writable(ValueType::Text)
        );
        assert_eq!(
            std.metadata(&QName::new("urn:x", "displayname"), file.as_ref()),
            PropertyMetaData::Unknown
        );
        assert_eq!(
            std.get(&QName::dav("quota-used-bytes"), root.as_ref()).unwrap(),
            Some(PropertyValue::Number(5))
        );
    }

    #[test]
    fn dead_properties_round_trip() {
        let fs = MemoryFs::new(None);
        let root = fs.root();
        let color = QName::new("urn:x", "color");

        assert!(DeadProperties
            .metadata(&QName::dav("color"), root.as_ref())
            .is_unknown());
        assert!(matches!(
            DeadProperties.get(&color, root.as_ref()),
            Err(PropertyError::Rejected { status: 404, .. })
        ));

        DeadProperties
            .set(&color, PropertyValue::Xml("blue".into()), root.as_ref())
            .unwrap();
        assert_eq!(
            DeadProperties.get(&color, root.as_ref()).unwrap(),
            Some(PropertyValue::Text("blue".into()))
        );
        assert_eq!(DeadProperties.all_property_names(root.as_ref()), vec![color.clone()]);

        DeadProperties.clear(&color, root.as_ref()).unwrap();
        assert!(DeadProperties.all_property_names(root.as_ref()).is_empty());
    }
}
