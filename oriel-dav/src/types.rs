use std::collections::BTreeMap;
use std::fmt;

use super::value::{PropertyValue, ValueType};

pub const DAV_NS: &str = "DAV:";
pub const CALDAV_NS: &str = "urn:ietf:params:xml:ns:caldav";
pub const CALSERVER_NS: &str = "http://calendarserver.org/ns/";
pub const CARDDAV_NS: &str = "urn:ietf:params:xml:ns:carddav";
pub const MS_NS: &str = "urn:schemas-microsoft-com:";

/// A namespace qualified XML name, the key of every WebDAV property.
///
/// Ordering is lexicographic on (namespace, local name) so that it can back
/// sorted collections, but most structures of this crate keep insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    pub ns: String,
    pub local: String,
}
impl QName {
    pub fn new(ns: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            local: local.into(),
        }
    }

    pub fn dav(local: &str) -> Self {
        Self::new(DAV_NS, local)
    }

    pub fn is_dav(&self) -> bool {
        self.ns == DAV_NS
    }
}
impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}", self.ns, self.local)
    }
}

/// 10.2.  Depth Header
///
/// Depth = "Depth" ":" ("0" | "1" | "infinity")
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}
impl Depth {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "0" => Some(Self::Zero),
            "1" => Some(Self::One),
            v if v.eq_ignore_ascii_case("infinity") => Some(Self::Infinity),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zero => "0",
            Self::One => "1",
            Self::Infinity => "infinity",
        }
    }

    /// Number of levels below the target resource, `Infinity` being capped by `max`
    pub fn levels(&self, max: u32) -> u32 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Infinity => max,
        }
    }
}

/// A single entry of a `prop` element in a PROPFIND request.
///
/// Nested sub-properties are kept as sent (one level deep), most property
/// sources ignore them.
#[derive(Debug, PartialEq, Clone)]
pub struct PropertyRequest {
    pub name: QName,
    pub nested: Vec<QName>,
}
impl PropertyRequest {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            nested: vec![],
        }
    }
}

/// 14.20.  propfind XML Element
///
/// <!ELEMENT propfind ( propname | (allprop, include?) | prop ) >
///
/// `allprop` and an explicit list of names are mutually exclusive, the
/// `include` names of `allprop` are resolved on top of the full set.
#[derive(Debug, PartialEq, Clone)]
pub enum PropertiesRequest {
    AllProp(Vec<PropertyRequest>),
    PropName,
    Prop(Vec<PropertyRequest>),
}
impl Default for PropertiesRequest {
    fn default() -> Self {
        Self::AllProp(vec![])
    }
}
impl PropertiesRequest {
    pub fn names(names: impl IntoIterator<Item = QName>) -> Self {
        Self::Prop(names.into_iter().map(PropertyRequest::new).collect())
    }
}

/// Result of parsing a PROPPATCH `propertyupdate` body.
///
/// A name is either in `to_set` or in `to_remove`, never both: a set always
/// wins over a remove of the same name.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct PropPatchParseResult {
    pub to_set: Vec<(QName, String)>,
    pub to_remove: Vec<QName>,
}
impl PropPatchParseResult {
    pub fn set(&mut self, name: QName, value: String) {
        self.to_remove.retain(|n| n != &name);
        match self.to_set.iter_mut().find(|(n, _)| n == &name) {
            Some(entry) => entry.1 = value,
            None => self.to_set.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: QName) {
        if self.to_set.iter().any(|(n, _)| n == &name) || self.to_remove.contains(&name) {
            return;
        }
        self.to_remove.push(name);
    }

    pub fn names(&self) -> impl Iterator<Item = &QName> {
        self.to_set.iter().map(|(n, _)| n).chain(self.to_remove.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.to_set.is_empty() && self.to_remove.is_empty()
    }
}

// ---- Locks ----

/// 14.13.  lockscope XML Element
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LockScope {
    Exclusive,
    Shared,
}

/// 14.15.  locktype XML Element
///
/// Only write locks are defined by RFC4918.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LockType {
    Write,
}

/// 14.11.  lockinfo XML Element
///
/// <!ELEMENT lockinfo (lockscope, locktype, owner?)  >
#[derive(Debug, PartialEq, Clone)]
pub struct LockInfo {
    pub scope: LockScope,
    pub kind: LockType,
    pub owner: Option<String>,
}

/// 10.7.  Timeout Request Header
///
/// TimeOut = "Timeout" ":" 1#TimeType
/// TimeType = ("Second-" DAVTimeOutVal | "Infinite")
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LockTimeout {
    Infinite,
    Seconds(u64),
}
impl LockTimeout {
    pub const MAX_SECONDS: u64 = 4294967295;

    /// The first understood entry of the header wins, an absent or garbled
    /// header means no expiry.
    pub fn parse(header: Option<&str>) -> Self {
        let raw = match header {
            Some(v) => v,
            None => return Self::Infinite,
        };
        for entry in raw.split(',').map(str::trim) {
            if entry.eq_ignore_ascii_case("infinite") {
                return Self::Infinite;
            }
            if let Some(secs) = entry.strip_prefix("Second-") {
                if let Ok(v) = secs.trim().parse::<u64>() {
                    return Self::Seconds(v.min(Self::MAX_SECONDS));
                }
            }
        }
        Self::Infinite
    }

    pub fn seconds(&self) -> Option<u64> {
        match self {
            Self::Infinite => None,
            Self::Seconds(s) => Some(*s),
        }
    }

    pub fn as_header(&self) -> String {
        match self {
            Self::Infinite => "Infinite".into(),
            Self::Seconds(s) => format!("Second-{}", s),
        }
    }
}

/// 14.1.  activelock XML Element
///
/// <!ELEMENT activelock (lockscope, locktype, depth, owner?, timeout?,
///           locktoken?, lockroot)>
///
/// `token` is stored without its `opaquelocktoken:` scheme.
#[derive(Debug, PartialEq, Clone)]
pub struct ActiveLock {
    pub scope: LockScope,
    pub kind: LockType,
    pub depth: Depth,
    pub owner: Option<String>,
    pub timeout: LockTimeout,
    pub token: String,
    pub root: String,
}
impl ActiveLock {
    pub fn token_uri(&self) -> String {
        format!("opaquelocktoken:{}", self.token)
    }
}

/// 14.10.  lockentry XML Element
#[derive(Debug, PartialEq, Clone)]
pub struct LockEntry {
    pub scope: LockScope,
    pub kind: LockType,
}

// ---- PROPFIND / PROPPATCH responses, server side ----

#[derive(Debug, PartialEq, Clone)]
pub struct ValueAndType {
    pub value: Option<PropertyValue>,
    pub kind: ValueType,
}

#[derive(Debug, PartialEq, Clone)]
pub struct NameAndError {
    pub name: QName,
    pub note: Option<String>,
}

/// Outcome of a PROPFIND or a PROPPATCH for a single resource.
///
/// A name is recorded once: the first outcome registered for it wins, later
/// ones are ignored.
#[derive(Debug, PartialEq, Clone)]
pub struct PropFindResponse {
    pub href: String,
    pub known: Vec<(QName, ValueAndType)>,
    pub errors: BTreeMap<u16, Vec<NameAndError>>,
}
impl PropFindResponse {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            known: vec![],
            errors: BTreeMap::new(),
        }
    }

    pub fn contains(&self, name: &QName) -> bool {
        self.status_of(name).is_some()
    }

    pub fn add_known(&mut self, name: QName, value: Option<PropertyValue>, kind: ValueType) -> bool {
        if self.contains(&name) {
            return false;
        }
        self.known.push((name, ValueAndType { value, kind }));
        true
    }

    pub fn add_error(&mut self, status: u16, name: QName, note: Option<&str>) -> bool {
        if self.contains(&name) {
            return false;
        }
        self.errors.entry(status).or_default().push(NameAndError {
            name,
            note: note.map(str::to_string),
        });
        true
    }

    pub fn known_value(&self, name: &QName) -> Option<&ValueAndType> {
        self.known.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn status_of(&self, name: &QName) -> Option<u16> {
        if self.known.iter().any(|(n, _)| n == name) {
            return Some(200);
        }
        self.errors
            .iter()
            .find(|(_, list)| list.iter().any(|e| &e.name == name))
            .map(|(status, _)| *status)
    }

    pub fn names(&self) -> impl Iterator<Item = &QName> {
        self.known
            .iter()
            .map(|(n, _)| n)
            .chain(self.errors.values().flatten().map(|e| &e.name))
    }
}

// ---- Multistatus, client side ----

/// What a client keeps from an `activelock` element
#[derive(Debug, PartialEq, Clone, Default)]
pub struct DiscoveredLock {
    pub owner: Option<String>,
    pub token: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Received {
    Text(String),
    Elements(Vec<QName>),
    Lock(Option<DiscoveredLock>),
}

#[derive(Debug, PartialEq, Clone)]
pub struct ReceivedProperty {
    pub name: QName,
    pub value: Received,
}

#[derive(Debug, PartialEq, Clone)]
pub struct ReceivedPropStat {
    pub status: u16,
    pub props: Vec<ReceivedProperty>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct ResponseEntry {
    pub href: String,
    pub status: Option<u16>,
    pub propstats: Vec<ReceivedPropStat>,
}
impl ResponseEntry {
    /// Properties reported with a 200 status
    pub fn found(&self) -> impl Iterator<Item = &ReceivedProperty> {
        self.propstats
            .iter()
            .filter(|ps| ps.status == 200)
            .flat_map(|ps| ps.props.iter())
    }

    pub fn found_property(&self, name: &QName) -> Option<&Received> {
        self.found().find(|p| &p.name == name).map(|p| &p.value)
    }

    pub fn found_text(&self, name: &QName) -> Option<&str> {
        match self.found_property(name) {
            Some(Received::Text(t)) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn is_collection(&self) -> bool {
        match self.found_property(&QName::dav("resourcetype")) {
            Some(Received::Elements(children)) => {
                children.iter().any(|c| c == &QName::dav("collection"))
            }
            _ => false,
        }
    }

    pub fn lock(&self) -> Option<&DiscoveredLock> {
        match self.found_property(&QName::dav("lockdiscovery")) {
            Some(Received::Lock(lock)) => lock.as_ref(),
            _ => None,
        }
    }

    /// Names present in any propstat, whatever their status
    pub fn names(&self) -> impl Iterator<Item = &QName> {
        self.propstats
            .iter()
            .flat_map(|ps| ps.props.iter().map(|p| &p.name))
    }
}

/// 14.16.  multistatus XML Element
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Multistatus {
    pub responses: Vec<ResponseEntry>,
}

/// Body of a successful LOCK response: `prop/lockdiscovery`
#[derive(Debug, PartialEq, Clone)]
pub struct LockDiscovery(pub Option<DiscoveredLock>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proppatch_set_wins_over_remove() {
        let mut patch = PropPatchParseResult::default();
        let name = QName::new("urn:x", "color");
        patch.remove(name.clone());
        patch.set(name.clone(), "red".into());
        patch.remove(name.clone());

        assert_eq!(patch.to_set, vec![(name, "red".to_string())]);
        assert!(patch.to_remove.is_empty());
    }

    #[test]
    fn response_records_a_name_once() {
        let mut resp = PropFindResponse::new("/a/");
        let name = QName::dav("getetag");
        assert!(resp.add_error(404, name.clone(), Some("Unknown property")));
        assert!(!resp.add_known(name.clone(), None, ValueType::Text));
        assert!(!resp.add_error(401, name.clone(), None));

        assert_eq!(resp.status_of(&name), Some(404));
        assert_eq!(resp.names().count(), 1);
    }

    #[test]
    fn timeout_header() {
        assert_eq!(LockTimeout::parse(None), LockTimeout::Infinite);
        assert_eq!(
            LockTimeout::parse(Some("Second-3600")),
            LockTimeout::Seconds(3600)
        );
        assert_eq!(
            LockTimeout::parse(Some("Infinite, Second-4100000000")),
            LockTimeout::Infinite
        );
        assert_eq!(
            LockTimeout::parse(Some("Second-99999999999")),
            LockTimeout::Seconds(LockTimeout::MAX_SECONDS)
        );
        assert_eq!(LockTimeout::Seconds(60).as_header(), "Second-60");
    }

    #[test]
    fn depth_levels() {
        assert_eq!(Depth::parse("Infinity"), Some(Depth::Infinity));
        assert_eq!(Depth::parse("2"), None);
        assert_eq!(Depth::Infinity.levels(3), 3);
        assert_eq!(Depth::One.levels(3), 1);
    }
}
