use std::sync::Arc;

use itertools::Itertools;

use oriel_dav::types::QName;
use oriel_dav::value::{PropertyValue, ValueType};

use super::resource::DavResource;

/// How a source exposes a property on a given resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyMetaData {
    Unknown,
    ReadOnly(ValueType),
    Writable(ValueType),
}
impl PropertyMetaData {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Writable(_))
    }

    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Unknown => None,
            Self::ReadOnly(t) | Self::Writable(t) => Some(*t),
        }
    }
}

/// Failure of a single property, reported inline in the multistatus
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyError {
    NotAuthorized,
    Rejected { status: u16, note: String },
}
impl PropertyError {
    pub fn rejected(status: u16, note: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            note: note.into(),
        }
    }
}

pub trait PropertySource: Send + Sync {
    fn metadata(&self, name: &QName, resource: &dyn DavResource) -> PropertyMetaData;

    fn get(&self, name: &QName, resource: &dyn DavResource)
        -> Result<Option<PropertyValue>, PropertyError>;

    fn set(
        &self,
        name: &QName,
        value: PropertyValue,
        resource: &dyn DavResource,
    ) -> Result<(), PropertyError>;

    fn clear(&self, name: &QName, resource: &dyn DavResource) -> Result<(), PropertyError>;

    fn all_property_names(&self, resource: &dyn DavResource) -> Vec<QName>;
}

/// Ordered registry, the first source that knows a name owns it
#[derive(Clone, Default)]
pub struct PropertySources(Vec<Arc<dyn PropertySource>>);
impl PropertySources {
    pub fn new(sources: Vec<Arc<dyn PropertySource>>) -> Self {
        Self(sources)
    }

    pub fn push(&mut self, source: Arc<dyn PropertySource>) {
        self.0.push(source)
    }

    pub fn find(
        &self,
        name: &QName,
        resource: &dyn DavResource,
    ) -> Option<(&dyn PropertySource, PropertyMetaData)> {
        self.0.iter().find_map(|s| {
            let meta = s.metadata(name, resource);
            match meta.is_unknown() {
                true => None,
                false => Some((s.as_ref(), meta)),
            }
        })
    }

    pub fn find_writable(
        &self,
        name: &QName,
        resource: &dyn DavResource,
    ) -> Option<(&dyn PropertySource, ValueType)> {
        self.0
            .iter()
            .find_map(|s| match s.metadata(name, resource) {
                PropertyMetaData::Writable(t) => Some((s.as_ref(), t)),
                _ => None,
            })
    }

    /// Union of the names of every source, without duplicates
    pub fn all_property_names(&self, resource: &dyn DavResource) -> Vec<QName> {
        self.0
            .iter()
            .flat_map(|s| s.all_property_names(resource))
            .unique()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dav::memory::MemoryFs;

    struct Fixed {
        name: QName,
        value: &'static str,
        writable: bool,
    }
    impl PropertySource for Fixed {
        fn metadata(&self, name: &QName, _: &dyn DavResource) -> PropertyMetaData {
            match (name == &self.name, self.writable) {
                (false, _) => PropertyMetaData::Unknown,
                (true, true) => PropertyMetaData::Writable(ValueType::Text),
                (true, false) => PropertyMetaData::ReadOnly(ValueType::Text),
            }
        }
        fn get(&self, _: &QName, _: &dyn DavResource) -> Result<Option<PropertyValue>, PropertyError> {
            Ok(Some(PropertyValue::Text(self.value.into())))
        }
        fn set(&self, _: &QName, _: PropertyValue, _: &dyn DavResource) -> Result<(), PropertyError> {
            Ok(())
        }
        fn clear(&self, _: &QName, _: &dyn DavResource) -> Result<(), PropertyError> {
            Ok(())
        }
        fn all_property_names(&self, _: &dyn DavResource) -> Vec<QName> {
            vec![self.name.clone()]
        }
    }

    fn fixed(local: &str, value: &'static str, writable: bool) -> Arc<dyn PropertySource> {
        Arc::new(Fixed {
            name: QName::new("urn:x", local),
            value,
            writable,
        })
    }

    #[test]
    fn first_match_wins() {
        let fs = MemoryFs::new(None);
        let root = fs.root();
        let sources = PropertySources::new(vec![
            fixed("color", "red", false),
            fixed("color", "blue", true),
            fixed("size", "xl", true),
        ]);

        let color = QName::new("urn:x", "color");
        let (src, meta) = sources.find(&color, root.as_ref()).unwrap();
        assert_eq!(meta, PropertyMetaData::ReadOnly(ValueType::Text));
        assert_eq!(
            src.get(&color, root.as_ref()).unwrap(),
            Some(PropertyValue::Text("red".into()))
        );

        // the read-only owner does not hide a writable source further down
        assert!(sources.find_writable(&color, root.as_ref()).is_some());
        assert!(sources.find(&QName::new("urn:x", "nope"), root.as_ref()).is_none());

        assert_eq!(
            sources.all_property_names(root.as_ref()),
            vec![color, QName::new("urn:x", "size")]
        );
    }
}
