use quick_xml::events::{BytesText, Event};
use quick_xml::Error as QError;

use super::types::*;
use super::value::{http_date, iso_date, PropertyValue};
use super::xml::{to_bytes, IWrite, Namespaces, QWrite, Writer};

// ---- Namespace collection ----

/// Every namespace appearing in the given responses, names and structured
/// values included.
pub fn response_namespaces(responses: &[PropFindResponse]) -> Namespaces {
    let mut ns = Namespaces::default();
    for resp in responses {
        for name in resp.names() {
            ns.insert(&name.ns);
        }
        for (_, vt) in resp.known.iter() {
            match &vt.value {
                Some(PropertyValue::ResourceType(names)) | Some(PropertyValue::ReportSet(names)) => {
                    names.iter().for_each(|n| ns.insert(&n.ns))
                }
                _ => (),
            }
        }
    }
    ns
}

pub fn request_namespaces(req: &PropertiesRequest) -> Namespaces {
    let mut ns = Namespaces::default();
    if let PropertiesRequest::AllProp(list) | PropertiesRequest::Prop(list) = req {
        for p in list {
            ns.insert(&p.name.ns);
            p.nested.iter().for_each(|n| ns.insert(&n.ns));
        }
    }
    ns
}

/// Serialize a full multistatus document
pub async fn generate_multistatus(
    responses: Vec<PropFindResponse>,
    brief: bool,
) -> Result<Vec<u8>, QError> {
    let ns = response_namespaces(&responses);
    to_bytes(&MultistatusBody { responses, brief }, ns).await
}

// ---- ROOT ----

/// A multistatus document built from property responses.
///
/// With `brief`, only the 200 propstat of each response is written.
#[derive(Debug, PartialEq, Clone)]
pub struct MultistatusBody {
    pub responses: Vec<PropFindResponse>,
    pub brief: bool,
}

impl QWrite for MultistatusBody {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("multistatus");
        let end = start.to_end();

        xml.q.write_event_async(Event::Start(start.clone())).await?;
        for resp in self.responses.iter() {
            write_response(xml, resp, self.brief).await?;
        }
        xml.q.write_event_async(Event::End(end)).await
    }
}

/// Body of a LOCK response: `prop/lockdiscovery`
#[derive(Debug, PartialEq, Clone)]
pub struct LockDiscoveryBody(pub Vec<ActiveLock>);

impl QWrite for LockDiscoveryBody {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("prop");
        let end = start.to_end();

        xml.q.write_event_async(Event::Start(start.clone())).await?;
        let disc = xml.create_dav_element("lockdiscovery");
        let disc_end = disc.to_end();
        xml.q.write_event_async(Event::Start(disc.clone())).await?;
        for lock in self.0.iter() {
            lock.qwrite(xml).await?;
        }
        xml.q.write_event_async(Event::End(disc_end)).await?;
        xml.q.write_event_async(Event::End(end)).await
    }
}

// ---- Client requests ----

impl QWrite for PropertiesRequest {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("propfind");
        let end = start.to_end();

        xml.q.write_event_async(Event::Start(start.clone())).await?;
        match self {
            Self::PropName => {
                let empty_propname = xml.create_dav_element("propname");
                xml.q.write_event_async(Event::Empty(empty_propname)).await?
            }
            Self::AllProp(include) => {
                let empty_allprop = xml.create_dav_element("allprop");
                xml.q.write_event_async(Event::Empty(empty_allprop)).await?;
                if !include.is_empty() {
                    write_names(xml, "include", include).await?;
                }
            }
            Self::Prop(names) => write_names(xml, "prop", names).await?,
        }
        xml.q.write_event_async(Event::End(end)).await
    }
}

async fn write_names(
    xml: &mut Writer<impl IWrite>,
    wrapper: &str,
    names: &[PropertyRequest],
) -> Result<(), QError> {
    let start = xml.create_dav_element(wrapper);
    let end = start.to_end();

    xml.q.write_event_async(Event::Start(start.clone())).await?;
    for req in names {
        let elem = xml.create_element(&req.name);
        if req.nested.is_empty() {
            xml.q.write_event_async(Event::Empty(elem)).await?;
            continue;
        }
        let elem_end = elem.to_end();
        xml.q.write_event_async(Event::Start(elem.clone())).await?;
        for nested in req.nested.iter() {
            let sub = xml.create_element(nested);
            xml.q.write_event_async(Event::Empty(sub)).await?;
        }
        xml.q.write_event_async(Event::End(elem_end)).await?;
    }
    xml.q.write_event_async(Event::End(end)).await
}

impl QWrite for LockInfo {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("lockinfo");
        let end = start.to_end();

        xml.q.write_event_async(Event::Start(start.clone())).await?;
        self.scope.qwrite(xml).await?;
        self.kind.qwrite(xml).await?;
        if let Some(owner) = &self.owner {
            write_owner(xml, owner).await?;
        }
        xml.q.write_event_async(Event::End(end)).await
    }
}

// ---- Inner XML ----

async fn write_response(
    xml: &mut Writer<impl IWrite>,
    resp: &PropFindResponse,
    brief: bool,
) -> Result<(), QError> {
    let start = xml.create_dav_element("response");
    let end = start.to_end();

    xml.q.write_event_async(Event::Start(start.clone())).await?;
    write_href(xml, &resp.href).await?;

    if !resp.known.is_empty() {
        let (propstat, prop, propstat_end, prop_end) = open_propstat(xml);
        xml.q.write_event_async(Event::Start(propstat)).await?;
        xml.q.write_event_async(Event::Start(prop)).await?;
        for (name, vt) in resp.known.iter() {
            write_property(xml, name, vt.value.as_ref()).await?;
        }
        xml.q.write_event_async(Event::End(prop_end)).await?;
        write_status(xml, 200).await?;
        xml.q.write_event_async(Event::End(propstat_end)).await?;
    }

    if !brief {
        for (status, names) in resp.errors.iter() {
            if names.is_empty() {
                continue;
            }
            let (propstat, prop, propstat_end, prop_end) = open_propstat(xml);
            xml.q.write_event_async(Event::Start(propstat)).await?;
            xml.q.write_event_async(Event::Start(prop)).await?;
            for err in names.iter() {
                let empty = xml.create_element(&err.name);
                xml.q.write_event_async(Event::Empty(empty)).await?;
            }
            xml.q.write_event_async(Event::End(prop_end)).await?;
            write_status(xml, *status).await?;
            let notes = names
                .iter()
                .filter_map(|e| e.note.as_deref())
                .collect::<Vec<_>>();
            if let Some(note) = notes.first() {
                write_text_element(xml, "responsedescription", note).await?;
            }
            xml.q.write_event_async(Event::End(propstat_end)).await?;
        }
    }

    xml.q.write_event_async(Event::End(end)).await
}

fn open_propstat<T: IWrite>(
    xml: &mut Writer<T>,
) -> (
    quick_xml::events::BytesStart<'static>,
    quick_xml::events::BytesStart<'static>,
    quick_xml::events::BytesEnd<'static>,
    quick_xml::events::BytesEnd<'static>,
) {
    let propstat = xml.create_dav_element("propstat");
    let prop = xml.create_dav_element("prop");
    let propstat_end = propstat.to_end().into_owned();
    let prop_end = prop.to_end().into_owned();
    (propstat, prop, propstat_end, prop_end)
}

async fn write_status(xml: &mut Writer<impl IWrite>, code: u16) -> Result<(), QError> {
    let reason = http::StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("No reason");
    let txt = format!("HTTP/1.1 {} {}", code, reason);
    write_text_element(xml, "status", &txt).await
}

async fn write_href(xml: &mut Writer<impl IWrite>, href: &str) -> Result<(), QError> {
    write_text_element(xml, "href", href).await
}

async fn write_text_element(
    xml: &mut Writer<impl IWrite>,
    local: &str,
    txt: &str,
) -> Result<(), QError> {
    let start = xml.create_dav_element(local);
    let end = start.to_end();

    xml.q.write_event_async(Event::Start(start.clone())).await?;
    xml.q
        .write_event_async(Event::Text(BytesText::new(txt)))
        .await?;
    xml.q.write_event_async(Event::End(end)).await
}

async fn write_owner(xml: &mut Writer<impl IWrite>, owner: &str) -> Result<(), QError> {
    let start = xml.create_dav_element("owner");
    let end = start.to_end();

    xml.q.write_event_async(Event::Start(start.clone())).await?;
    if owner.starts_with("http://") || owner.starts_with("https://") {
        write_href(xml, owner).await?;
    } else {
        xml.q
            .write_event_async(Event::Text(BytesText::new(owner)))
            .await?;
    }
    xml.q.write_event_async(Event::End(end)).await
}

/// Dispatch on the value variant, a missing value gives an empty element
async fn write_property(
    xml: &mut Writer<impl IWrite>,
    name: &QName,
    value: Option<&PropertyValue>,
) -> Result<(), QError> {
    let start = xml.create_element(name);
    let end = start.to_end().into_owned();

    let text = match value {
        None => return xml.q.write_event_async(Event::Empty(start)).await,
        Some(PropertyValue::Text(t)) => Some(t.clone()),
        Some(PropertyValue::Number(n)) => Some(n.to_string()),
        Some(PropertyValue::Boolean(b)) => Some(b.to_string()),
        Some(PropertyValue::Date(d)) => Some(iso_date(d)),
        Some(PropertyValue::HttpDate(d)) => Some(http_date(d)),
        _ => None,
    };
    if let Some(t) = text {
        xml.q.write_event_async(Event::Start(start.clone())).await?;
        xml.q
            .write_event_async(Event::Text(BytesText::new(&t)))
            .await?;
        return xml.q.write_event_async(Event::End(end)).await;
    }

    match value {
        Some(PropertyValue::ResourceType(kinds)) if kinds.is_empty() => {
            return xml.q.write_event_async(Event::Empty(start)).await
        }
        Some(PropertyValue::LockDiscovery(locks)) if locks.is_empty() => {
            return xml.q.write_event_async(Event::Empty(start)).await
        }
        _ => (),
    }

    xml.q.write_event_async(Event::Start(start.clone())).await?;
    match value {
        Some(PropertyValue::Href(h)) => write_href(xml, h).await?,
        Some(PropertyValue::HrefList(list)) => {
            for h in list.iter() {
                write_href(xml, h).await?;
            }
        }
        Some(PropertyValue::ResourceType(kinds)) => {
            for kind in kinds.iter() {
                let empty = xml.create_element(kind);
                xml.q.write_event_async(Event::Empty(empty)).await?;
            }
        }
        Some(PropertyValue::LockDiscovery(locks)) => {
            for lock in locks.iter() {
                lock.qwrite(xml).await?;
            }
        }
        Some(PropertyValue::SupportedLock(entries)) => {
            for entry in entries.iter() {
                entry.qwrite(xml).await?;
            }
        }
        Some(PropertyValue::ReportSet(reports)) => {
            for report in reports.iter() {
                let supported = xml.create_dav_element("supported-report");
                let supported_end = supported.to_end();
                let wrapper = xml.create_dav_element("report");
                let wrapper_end = wrapper.to_end();
                let inner = xml.create_element(report);
                xml.q.write_event_async(Event::Start(supported.clone())).await?;
                xml.q.write_event_async(Event::Start(wrapper.clone())).await?;
                xml.q.write_event_async(Event::Empty(inner)).await?;
                xml.q.write_event_async(Event::End(wrapper_end)).await?;
                xml.q.write_event_async(Event::End(supported_end)).await?;
            }
        }
        Some(PropertyValue::Xml(raw)) => {
            xml.q
                .write_event_async(Event::Text(BytesText::from_escaped(raw.as_str())))
                .await?
        }
        _ => (),
    }
    xml.q.write_event_async(Event::End(end)).await
}

impl QWrite for ActiveLock {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("activelock");
        let end = start.to_end();

        xml.q.write_event_async(Event::Start(start.clone())).await?;
        self.kind.qwrite(xml).await?;
        self.scope.qwrite(xml).await?;
        write_text_element(xml, "depth", self.depth.as_str()).await?;
        if let Some(owner) = &self.owner {
            write_owner(xml, owner).await?;
        }
        write_text_element(xml, "timeout", &self.timeout.as_header()).await?;

        let token = xml.create_dav_element("locktoken");
        let token_end = token.to_end();
        xml.q.write_event_async(Event::Start(token.clone())).await?;
        write_href(xml, &self.token_uri()).await?;
        xml.q.write_event_async(Event::End(token_end)).await?;

        let root = xml.create_dav_element("lockroot");
        let root_end = root.to_end();
        xml.q.write_event_async(Event::Start(root.clone())).await?;
        write_href(xml, &self.root).await?;
        xml.q.write_event_async(Event::End(root_end)).await?;

        xml.q.write_event_async(Event::End(end)).await
    }
}

impl QWrite for LockEntry {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("lockentry");
        let end = start.to_end();

        xml.q.write_event_async(Event::Start(start.clone())).await?;
        self.scope.qwrite(xml).await?;
        self.kind.qwrite(xml).await?;
        xml.q.write_event_async(Event::End(end)).await
    }
}

impl QWrite for LockScope {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("lockscope");
        let end = start.to_end();

        xml.q.write_event_async(Event::Start(start.clone())).await?;
        let inner = match self {
            Self::Exclusive => xml.create_dav_element("exclusive"),
            Self::Shared => xml.create_dav_element("shared"),
        };
        xml.q.write_event_async(Event::Empty(inner)).await?;
        xml.q.write_event_async(Event::End(end)).await
    }
}

impl QWrite for LockType {
    async fn qwrite(&self, xml: &mut Writer<impl IWrite>) -> Result<(), QError> {
        let start = xml.create_dav_element("locktype");
        let end = start.to_end();

        xml.q.write_event_async(Event::Start(start.clone())).await?;
        let inner = match self {
            Self::Write => xml.create_dav_element("write"),
        };
        xml.q.write_event_async(Event::Empty(inner)).await?;
        xml.q.write_event_async(Event::End(end)).await
    }
}
