use quick_xml::events::Event;
use quick_xml::reader::NsReader;

use super::error::ParsingError;
use super::types::*;
use super::xml::{IRead, Node, QRead, Reader, DAV_URN};

pub use super::proppatch::parse_proppatch;

// ---- Entry points ----

async fn read_document<N: Node<N>>(body: &[u8]) -> Result<N, ParsingError> {
    let mut rdr = Reader::new(NsReader::from_reader(body)).await?;
    rdr.find::<N>().await
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

/// An empty body is a request for all properties
pub async fn parse_properties_request(body: &[u8]) -> Result<PropertiesRequest, ParsingError> {
    if is_blank(body) {
        return Ok(PropertiesRequest::default());
    }
    read_document(body).await
}

/// An empty body is a lock refresh, hence `None`
pub async fn parse_lockinfo(body: &[u8]) -> Result<Option<LockInfo>, ParsingError> {
    if is_blank(body) {
        return Ok(None);
    }
    read_document(body).await.map(Some)
}

pub async fn parse_multistatus(body: &[u8]) -> Result<Multistatus, ParsingError> {
    read_document(body).await
}

pub async fn parse_lock_discovery(body: &[u8]) -> Result<LockDiscovery, ParsingError> {
    read_document(body).await
}

// ---- ROOT ----

/// Propfind request
impl QRead<PropertiesRequest> for PropertiesRequest {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "propfind").await?;
        if !xml.parent_has_child() {
            xml.close().await?;
            return Ok(PropertiesRequest::default());
        }

        let propfind = loop {
            // allprop
            if xml.maybe_open(DAV_URN, "allprop").await?.is_some() {
                xml.close().await?;
                let include = xml.maybe_find::<Include>().await?;
                break PropertiesRequest::AllProp(include.map(|i| i.0).unwrap_or_default());
            }

            // propname
            if xml.maybe_open(DAV_URN, "propname").await?.is_some() {
                xml.close().await?;
                break PropertiesRequest::PropName;
            }

            // prop
            let (mut maybe_prop, mut dirty) = (None, false);
            xml.maybe_read::<PropNames>(&mut maybe_prop, &mut dirty)
                .await?;
            if let Some(prop) = maybe_prop {
                break PropertiesRequest::Prop(prop.0);
            }

            // not found, skipping
            xml.skip().await?;
        };
        xml.close().await?;

        Ok(propfind)
    }
}

// LOCK REQUEST
impl QRead<LockInfo> for LockInfo {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "lockinfo").await?;
        let (mut m_scope, mut m_type, mut owner) = (None, None, None);
        loop {
            let mut dirty = false;
            xml.maybe_read::<LockScope>(&mut m_scope, &mut dirty)
                .await?;
            xml.maybe_read::<LockType>(&mut m_type, &mut dirty).await?;
            xml.maybe_read::<Owner>(&mut owner, &mut dirty).await?;

            if !dirty {
                match xml.peek() {
                    Event::End(_) => break,
                    _ => xml.skip().await?,
                };
            }
        }
        xml.close().await?;
        match (m_scope, m_type) {
            (Some(scope), Some(kind)) => Ok(LockInfo {
                scope,
                kind,
                owner: owner.map(|o| o.0),
            }),
            _ => Err(ParsingError::MissingChild),
        }
    }
}

/// Generic response
impl QRead<Multistatus> for Multistatus {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "multistatus").await?;
        let responses = xml.collect::<ResponseEntry>().await?;
        xml.close().await?;
        Ok(Multistatus { responses })
    }
}

// LOCK RESPONSE
impl QRead<LockDiscovery> for LockDiscovery {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "prop").await?;
        let mut found = None;
        loop {
            if xml.maybe_open(DAV_URN, "lockdiscovery").await?.is_some() {
                found = xml.maybe_find::<DiscoveredLock>().await?;
                xml.close().await?;
                break;
            }
            match xml.peek() {
                Event::End(_) => break,
                _ => xml.skip().await?,
            };
        }
        xml.close().await?;
        Ok(LockDiscovery(found))
    }
}

// ---- INNER XML ----

#[derive(Debug)]
struct Include(Vec<PropertyRequest>);
impl QRead<Include> for Include {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "include").await?;
        let acc = xml.collect::<PropertyRequest>().await?;
        xml.close().await?;
        Ok(Include(acc))
    }
}

#[derive(Debug)]
struct PropNames(Vec<PropertyRequest>);
impl QRead<PropNames> for PropNames {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "prop").await?;
        let acc = xml.collect::<PropertyRequest>().await?;
        xml.close().await?;
        Ok(PropNames(acc))
    }
}

/// Any element, only its name is kept
#[derive(Debug)]
struct BareName(QName);
impl QRead<BareName> for BareName {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        let name = xml.open_any().await?;
        xml.close().await?;
        Ok(BareName(name))
    }
}

impl QRead<PropertyRequest> for PropertyRequest {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        let name = xml.open_any().await?;
        let nested = xml
            .collect::<BareName>()
            .await?
            .into_iter()
            .map(|n| n.0)
            .collect();
        xml.close().await?;
        Ok(PropertyRequest { name, nested })
    }
}

impl QRead<LockScope> for LockScope {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "lockscope").await?;
        let lockscope = loop {
            if xml.maybe_open(DAV_URN, "exclusive").await?.is_some() {
                xml.close().await?;
                break LockScope::Exclusive;
            } else if xml.maybe_open(DAV_URN, "shared").await?.is_some() {
                xml.close().await?;
                break LockScope::Shared;
            }

            xml.skip().await?;
        };

        xml.close().await?;
        Ok(lockscope)
    }
}

impl QRead<LockType> for LockType {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "locktype").await?;
        let locktype = loop {
            if xml.maybe_open(DAV_URN, "write").await?.is_some() {
                xml.close().await?;
                break LockType::Write;
            }

            xml.skip().await?;
        };
        xml.close().await?;
        Ok(locktype)
    }
}

/// Owner content is flattened to its text, an href included
#[derive(Debug)]
struct Owner(String);
impl QRead<Owner> for Owner {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "owner").await?;
        let txt = xml.subtree_text().await?;
        xml.close().await?;
        Ok(Owner(txt.trim().to_string()))
    }
}

#[derive(Debug)]
struct Href(String);
impl QRead<Href> for Href {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "href").await?;
        let url = xml.tag_string().await?;
        xml.close().await?;
        Ok(Href(url.trim().to_string()))
    }
}

#[derive(Debug)]
struct Status(u16);
impl QRead<Status> for Status {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "status").await?;
        let fullcode = xml.tag_string().await?;
        let code = fullcode
            .split_whitespace()
            .nth(1)
            .ok_or(ParsingError::InvalidValue)?
            .parse::<u16>()?;
        xml.close().await?;
        Ok(Status(code))
    }
}

#[derive(Debug)]
struct LockToken(String);
impl QRead<LockToken> for LockToken {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "locktoken").await?;
        let href = xml.find::<Href>().await?;
        xml.close().await?;
        Ok(LockToken(href.0))
    }
}

#[derive(Debug)]
struct Timeout(String);
impl QRead<Timeout> for Timeout {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "timeout").await?;
        let txt = xml.tag_string().await?;
        xml.close().await?;
        Ok(Timeout(txt.trim().to_string()))
    }
}

impl QRead<DiscoveredLock> for DiscoveredLock {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "activelock").await?;
        let (mut owner, mut token, mut timeout) = (None, None, None);
        loop {
            let mut dirty = false;
            xml.maybe_read::<Owner>(&mut owner, &mut dirty).await?;
            xml.maybe_read::<LockToken>(&mut token, &mut dirty).await?;
            xml.maybe_read::<Timeout>(&mut timeout, &mut dirty).await?;

            if !dirty {
                match xml.peek() {
                    Event::End(_) => break,
                    _ => xml.skip().await?,
                };
            }
        }
        xml.close().await?;
        Ok(DiscoveredLock {
            owner: owner.map(|o| o.0),
            token: token.map(|t| t.0),
            timeout: timeout.map(|t| t.0),
        })
    }
}

impl QRead<ResponseEntry> for ResponseEntry {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "response").await?;
        let (mut href, mut status) = (None, None);
        let mut propstats = Vec::new();

        loop {
            let mut dirty = false;
            xml.maybe_read::<Href>(&mut href, &mut dirty).await?;
            xml.maybe_read::<Status>(&mut status, &mut dirty).await?;
            xml.maybe_push::<ReceivedPropStat>(&mut propstats, &mut dirty)
                .await?;

            if !dirty {
                match xml.peek() {
                    Event::End(_) => break,
                    _ => xml.skip().await?,
                };
            }
        }

        xml.close().await?;
        match href {
            Some(href) => Ok(ResponseEntry {
                href: href.0,
                status: status.map(|s| s.0),
                propstats,
            }),
            None => Err(ParsingError::MissingChild),
        }
    }
}

#[derive(Debug)]
struct ReceivedProps(Vec<ReceivedProperty>);
impl QRead<ReceivedProps> for ReceivedProps {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "prop").await?;
        let acc = xml.collect::<ReceivedProperty>().await?;
        xml.close().await?;
        Ok(ReceivedProps(acc))
    }
}

impl QRead<ReceivedPropStat> for ReceivedPropStat {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        xml.open(DAV_URN, "propstat").await?;
        let (mut m_props, mut m_status) = (None, None);

        loop {
            let mut dirty = false;
            xml.maybe_read::<ReceivedProps>(&mut m_props, &mut dirty)
                .await?;
            xml.maybe_read::<Status>(&mut m_status, &mut dirty).await?;

            if !dirty {
                match xml.peek() {
                    Event::End(_) => break,
                    _ => xml.skip().await?,
                };
            }
        }

        xml.close().await?;
        match (m_props, m_status) {
            (Some(props), Some(status)) => Ok(ReceivedPropStat {
                status: status.0,
                props: props.0,
            }),
            _ => Err(ParsingError::MissingChild),
        }
    }
}

impl QRead<ReceivedProperty> for ReceivedProperty {
    async fn qread(xml: &mut Reader<impl IRead>) -> Result<Self, ParsingError> {
        let name = xml.open_any().await?;
        let value = if name == QName::dav("resourcetype") {
            let kinds = xml.collect::<BareName>().await?;
            Received::Elements(kinds.into_iter().map(|k| k.0).collect())
        } else if name == QName::dav("lockdiscovery") {
            Received::Lock(xml.maybe_find::<DiscoveredLock>().await?)
        } else {
            Received::Text(xml.subtree_text().await?.trim().to_string())
        };
        xml.close().await?;
        Ok(ReceivedProperty { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_body_is_allprop() {
        let got = parse_properties_request(b"  \n").await.unwrap();
        assert_eq!(got, PropertiesRequest::AllProp(vec![]));
    }

    #[tokio::test]
    async fn propfind_propname() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<rando/>
<garbage><old/></garbage>
<D:propfind xmlns:D="DAV:">
    <D:propname/>
</D:propfind>
"#;
        let got = parse_properties_request(src.as_bytes()).await.unwrap();
        assert_eq!(got, PropertiesRequest::PropName);
    }

    #[tokio::test]
    async fn propfind_prop() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:" xmlns:R="http://ns.example.com/boxschema/">
    <D:prop>
        <R:bigbox/>
        <R:author>
            <R:name/>
        </R:author>
        <D:getetag/>
    </D:prop>
</D:propfind>
"#;
        let got = parse_properties_request(src.as_bytes()).await.unwrap();
        let boxschema = "http://ns.example.com/boxschema/";

        assert_eq!(
            got,
            PropertiesRequest::Prop(vec![
                PropertyRequest::new(QName::new(boxschema, "bigbox")),
                PropertyRequest {
                    name: QName::new(boxschema, "author"),
                    nested: vec![QName::new(boxschema, "name")],
                },
                PropertyRequest::new(QName::dav("getetag")),
            ])
        );
    }

    #[tokio::test]
    async fn propfind_allprop_include() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:">
    <D:allprop/>
    <D:include>
        <D:supported-live-property-set/>
        <D:supported-report-set/>
    </D:include>
</D:propfind>
"#;
        let got = parse_properties_request(src.as_bytes()).await.unwrap();
        assert_eq!(
            got,
            PropertiesRequest::AllProp(vec![
                PropertyRequest::new(QName::dav("supported-live-property-set")),
                PropertyRequest::new(QName::dav("supported-report-set")),
            ])
        );
    }

    #[tokio::test]
    async fn propfind_doctype_rejected() {
        let src = r#"<?xml version="1.0"?>
<!DOCTYPE propfind [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<D:propfind xmlns:D="DAV:"><D:prop><D:displayname>&xxe;</D:displayname></D:prop></D:propfind>
"#;
        let got = parse_properties_request(src.as_bytes()).await;
        assert!(matches!(got, Err(ParsingError::ForbiddenDoctype)));
    }

    #[tokio::test]
    async fn lockinfo() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D='DAV:'>
    <D:lockscope><D:exclusive/></D:lockscope>
    <D:locktype><D:write/></D:locktype>
    <D:owner>
        <D:href>http://example.org/~ejw/contact.html</D:href>
    </D:owner>
</D:lockinfo>
"#;
        let got = parse_lockinfo(src.as_bytes()).await.unwrap();
        assert_eq!(
            got,
            Some(LockInfo {
                scope: LockScope::Exclusive,
                kind: LockType::Write,
                owner: Some("http://example.org/~ejw/contact.html".into()),
            })
        );
        assert_eq!(parse_lockinfo(b"").await.unwrap(), None);
    }

    #[tokio::test]
    async fn multistatus_from_server() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:multistatus xmlns:D="DAV:" xmlns:Z="urn:example:z">
    <D:response>
        <D:href>/container/</D:href>
        <D:propstat>
            <D:prop>
                <D:resourcetype><D:collection/></D:resourcetype>
                <D:displayname>Container</D:displayname>
                <D:lockdiscovery>
                    <D:activelock>
                        <D:locktype><D:write/></D:locktype>
                        <D:lockscope><D:exclusive/></D:lockscope>
                        <D:depth>0</D:depth>
                        <D:owner>Jane</D:owner>
                        <D:timeout>Second-3600</D:timeout>
                        <D:locktoken><D:href>opaquelocktoken:abc</D:href></D:locktoken>
                    </D:activelock>
                </D:lockdiscovery>
            </D:prop>
            <D:status>HTTP/1.1 200 OK</D:status>
        </D:propstat>
        <D:propstat>
            <D:prop><Z:color/></D:prop>
            <D:status>HTTP/1.1 404 Not Found</D:status>
        </D:propstat>
    </D:response>
    <D:response>
        <D:href>/container/front.html</D:href>
        <D:propstat>
            <D:prop>
                <D:resourcetype/>
                <D:getcontentlength>4525</D:getcontentlength>
                <Z:note><Z:b>bold</Z:b> text</Z:note>
            </D:prop>
            <D:status>HTTP/1.1 200 OK</D:status>
        </D:propstat>
    </D:response>
    <D:responsedescription>done</D:responsedescription>
</D:multistatus>
"#;
        let got = parse_multistatus(src.as_bytes()).await.unwrap();
        assert_eq!(got.responses.len(), 2);

        let container = &got.responses[0];
        assert_eq!(container.href, "/container/");
        assert!(container.is_collection());
        assert_eq!(
            container.found_text(&QName::dav("displayname")),
            Some("Container")
        );
        let lock = container.lock().expect("lock discovered");
        assert_eq!(lock.owner.as_deref(), Some("Jane"));
        assert_eq!(lock.token.as_deref(), Some("opaquelocktoken:abc"));
        assert_eq!(lock.timeout.as_deref(), Some("Second-3600"));
        assert_eq!(container.propstats[1].status, 404);
        assert_eq!(
            container.propstats[1].props[0].name,
            QName::new("urn:example:z", "color")
        );

        let front = &got.responses[1];
        assert!(!front.is_collection());
        assert_eq!(
            front.found_text(&QName::dav("getcontentlength")),
            Some("4525")
        );
        assert_eq!(
            front.found_text(&QName::new("urn:example:z", "note")),
            Some("bold text")
        );
    }

    #[tokio::test]
    async fn lock_response() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:prop xmlns:D="DAV:">
    <D:lockdiscovery>
        <D:activelock>
            <D:locktype><D:write/></D:locktype>
            <D:lockscope><D:exclusive/></D:lockscope>
            <D:depth>infinity</D:depth>
            <D:owner><D:href>http://example.org/~ejw/contact.html</D:href></D:owner>
            <D:timeout>Second-604800</D:timeout>
            <D:locktoken><D:href>urn:uuid:e71d4fae-5dec-22d6-fea5-00a0c91e6be4</D:href></D:locktoken>
            <D:lockroot><D:href>http://example.com/workspace/webdav/proposal.doc</D:href></D:lockroot>
        </D:activelock>
    </D:lockdiscovery>
</D:prop>
"#;
        let got = parse_lock_discovery(src.as_bytes()).await.unwrap();
        let lock = got.0.expect("an active lock");
        assert_eq!(
            lock.token.as_deref(),
            Some("urn:uuid:e71d4fae-5dec-22d6-fea5-00a0c91e6be4")
        );
        assert_eq!(
            lock.owner.as_deref(),
            Some("http://example.org/~ejw/contact.html")
        );
    }
}
