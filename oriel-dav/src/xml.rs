use futures::Future;
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

use super::error::ParsingError;
use super::types::{QName, CALDAV_NS, CALSERVER_NS, CARDDAV_NS, DAV_NS, MS_NS};

// Constants
pub const DAV_URN: &[u8] = b"DAV:";

// Async traits
pub trait IWrite: AsyncWrite + Unpin + Send {}
impl<T: AsyncWrite + Unpin + Send> IWrite for T {}
pub trait IRead: AsyncBufRead + Unpin {}
impl<T: AsyncBufRead + Unpin> IRead for T {}

// Serialization/Deserialization traits
pub trait QWrite {
    fn qwrite(
        &self,
        xml: &mut Writer<impl IWrite>,
    ) -> impl Future<Output = Result<(), quick_xml::Error>> + Send;
}
pub trait QRead<T> {
    fn qread(xml: &mut Reader<impl IRead>) -> impl Future<Output = Result<T, ParsingError>>;
}

// The representation of an XML node in Rust
pub trait Node<T>: QRead<T> + std::fmt::Debug {}
impl<T: QRead<T> + std::fmt::Debug> Node<T> for T {}

// ---------------

/// Prefix table of a document, built before writing it.
///
/// Well known namespaces get a stable prefix, any other one is numbered in
/// order of first appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct Namespaces {
    entries: Vec<(String, String)>,
}
impl Default for Namespaces {
    fn default() -> Self {
        Self {
            entries: vec![("d".into(), DAV_NS.into())],
        }
    }
}
impl Namespaces {
    pub fn insert(&mut self, ns: &str) {
        if ns.is_empty() || self.prefix(ns).is_some() {
            return;
        }
        let prefix = match ns {
            CALDAV_NS => "cal".to_string(),
            CALSERVER_NS => "cs".to_string(),
            CARDDAV_NS => "card".to_string(),
            MS_NS => "ms".to_string(),
            _ => {
                let numbered = self
                    .entries
                    .iter()
                    .filter(|(p, _)| p.starts_with("ns"))
                    .count();
                format!("ns{}", numbered + 1)
            }
        };
        self.entries.push((prefix, ns.into()));
    }

    pub fn prefix(&self, ns: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, uri)| uri == ns)
            .map(|(p, _)| p.as_str())
    }

    pub fn declarations(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(p, uri)| (format!("xmlns:{}", p), uri.clone()))
            .collect()
    }
}

/// Transform a Rust object into an XML stream of characters
pub struct Writer<T: IWrite> {
    pub q: quick_xml::writer::Writer<T>,
    pub ns: Namespaces,
    pub ns_to_apply: Vec<(String, String)>,
}
impl<T: IWrite> Writer<T> {
    pub fn new(q: quick_xml::writer::Writer<T>, ns: Namespaces) -> Self {
        let ns_to_apply = ns.declarations();
        Self { q, ns, ns_to_apply }
    }

    pub fn create_dav_element(&mut self, name: &str) -> BytesStart<'static> {
        self.create_element(&QName::dav(name))
    }

    /// Elements without a namespace are written bare, a namespace missing
    /// from the prefix table is declared inline.
    pub fn create_element(&mut self, name: &QName) -> BytesStart<'static> {
        let mut start = match (name.ns.is_empty(), self.ns.prefix(&name.ns)) {
            (true, _) => BytesStart::new(name.local.clone()),
            (false, Some(prefix)) => BytesStart::new(format!("{}:{}", prefix, name.local)),
            (false, None) => {
                let mut s = BytesStart::new(format!("x:{}", name.local));
                s.push_attribute(("xmlns:x", name.ns.as_str()));
                s
            }
        };
        if !self.ns_to_apply.is_empty() {
            start.extend_attributes(
                self.ns_to_apply
                    .iter()
                    .map(|(k, n)| (k.as_str(), n.as_str())),
            );
            self.ns_to_apply.clear()
        }
        start
    }
}

/// Serialize a full document, XML declaration included
pub async fn to_bytes<E: QWrite>(elem: &E, ns: Namespaces) -> Result<Vec<u8>, quick_xml::Error> {
    let mut buffer = Vec::new();
    {
        let mut tokio_buffer = tokio::io::BufWriter::new(&mut buffer);
        {
            let q = quick_xml::writer::Writer::new_with_indent(&mut tokio_buffer, b' ', 4);
            let mut writer = Writer::new(q, ns);
            writer
                .q
                .write_event_async(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
                .await?;
            elem.qwrite(&mut writer).await?;
        }
        tokio_buffer.flush().await?;
    }
    Ok(buffer)
}

/// Transform an XML stream of characters into a Rust object
pub struct Reader<T: IRead> {
    pub rdr: NsReader<T>,
    cur: Event<'static>,
    prev: Event<'static>,
    parents: Vec<Event<'static>>,
    buf: Vec<u8>,
}
impl<T: IRead> Reader<T> {
    pub async fn new(mut rdr: NsReader<T>) -> Result<Self, ParsingError> {
        let mut buf: Vec<u8> = vec![];
        let cur = rdr.read_event_into_async(&mut buf).await?.into_owned();
        if let Event::DocType(_) = cur {
            return Err(ParsingError::ForbiddenDoctype);
        }
        let parents = vec![];
        let prev = Event::Eof;
        buf.clear();
        Ok(Self {
            cur,
            prev,
            parents,
            rdr,
            buf,
        })
    }

    /// read one more tag
    /// do not expose it publicly
    async fn next(&mut self) -> Result<Event<'static>, ParsingError> {
        let evt = self
            .rdr
            .read_event_into_async(&mut self.buf)
            .await?
            .into_owned();
        self.buf.clear();
        if let Event::DocType(_) = evt {
            tracing::warn!("rejecting a document carrying a DOCTYPE");
            return Err(ParsingError::ForbiddenDoctype);
        }
        self.prev = std::mem::replace(&mut self.cur, evt);
        Ok(self.prev.clone())
    }

    /// skip a node at current level
    pub async fn skip(&mut self) -> Result<Event<'static>, ParsingError> {
        match &self.cur {
            Event::Start(b) => {
                let _span = self
                    .rdr
                    .read_to_end_into_async(b.to_end().name(), &mut self.buf)
                    .await?;
                self.next().await
            }
            Event::End(_) => Err(ParsingError::WrongToken),
            Event::Eof => Err(ParsingError::Eof),
            _ => self.next().await,
        }
    }

    /// resolve the name of the current tag, if any
    fn current_name(&self) -> Option<QName> {
        let qname = match self.peek() {
            Event::Start(bs) | Event::Empty(bs) => bs.name(),
            Event::End(be) => be.name(),
            _ => return None,
        };

        let (extr_ns, local) = self.rdr.resolve_element(qname);
        let local = std::str::from_utf8(local.into_inner()).ok()?;
        let ns = match extr_ns {
            ResolveResult::Bound(v) => std::str::from_utf8(v.into_inner()).ok()?,
            _ => "",
        };
        Some(QName::new(ns, local))
    }

    /// check if this is the desired tag
    fn is_tag(&self, ns: &[u8], key: &str) -> bool {
        let qname = match self.peek() {
            Event::Start(bs) | Event::Empty(bs) => bs.name(),
            Event::End(be) => be.name(),
            _ => return false,
        };

        let (extr_ns, local) = self.rdr.resolve_element(qname);

        if local.into_inner() != key.as_bytes() {
            return false;
        }

        match extr_ns {
            ResolveResult::Bound(v) => v.into_inner() == ns,
            _ => false,
        }
    }

    pub fn parent_has_child(&self) -> bool {
        matches!(self.parents.last(), Some(Event::Start(_)) | None)
    }

    fn ensure_parent_has_child(&self) -> Result<(), ParsingError> {
        match self.parent_has_child() {
            true => Ok(()),
            false => Err(ParsingError::Recoverable),
        }
    }

    pub fn peek(&self) -> &Event<'static> {
        &self.cur
    }

    pub fn previous(&self) -> &Event<'static> {
        &self.prev
    }

    pub async fn tag_string(&mut self) -> Result<String, ParsingError> {
        self.ensure_parent_has_child()?;

        let mut acc = String::new();
        loop {
            match self.peek() {
                Event::CData(unescaped) => {
                    acc.push_str(std::str::from_utf8(unescaped.as_ref())?);
                    self.next().await?
                }
                Event::Text(escaped) => {
                    acc.push_str(escaped.unescape()?.as_ref());
                    self.next().await?
                }
                Event::End(_) | Event::Start(_) | Event::Empty(_) => return Ok(acc),
                Event::Eof => return Err(ParsingError::Eof),
                _ => self.next().await?,
            };
        }
    }

    /// Concatenated text of everything inside the current element,
    /// descendants included. Stops on the closing tag of the current element
    /// without consuming it.
    pub async fn subtree_text(&mut self) -> Result<String, ParsingError> {
        let mut acc = String::new();
        if !self.parent_has_child() {
            return Ok(acc);
        }

        let mut depth = 0usize;
        loop {
            match self.peek() {
                Event::CData(unescaped) => {
                    acc.push_str(std::str::from_utf8(unescaped.as_ref())?);
                }
                Event::Text(escaped) => acc.push_str(escaped.unescape()?.as_ref()),
                Event::Start(_) => depth += 1,
                Event::End(_) if depth == 0 => return Ok(acc),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(ParsingError::Eof),
                _ => (),
            };
            self.next().await?;
        }
    }

    pub async fn maybe_read<N: Node<N>>(
        &mut self,
        t: &mut Option<N>,
        dirty: &mut bool,
    ) -> Result<(), ParsingError> {
        if !self.parent_has_child() {
            return Ok(());
        }

        match N::qread(self).await {
            Ok(v) => {
                *t = Some(v);
                *dirty = true;
                Ok(())
            }
            Err(ParsingError::Recoverable) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn maybe_push<N: Node<N>>(
        &mut self,
        t: &mut Vec<N>,
        dirty: &mut bool,
    ) -> Result<(), ParsingError> {
        if !self.parent_has_child() {
            return Ok(());
        }

        match N::qread(self).await {
            Ok(v) => {
                t.push(v);
                *dirty = true;
                Ok(())
            }
            Err(ParsingError::Recoverable) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn find<N: Node<N>>(&mut self) -> Result<N, ParsingError> {
        self.ensure_parent_has_child()?;

        loop {
            // Try parse
            match N::qread(self).await {
                Err(ParsingError::Recoverable) => (),
                otherwise => return otherwise,
            }

            // If recovered, skip the element
            self.skip().await?;
        }
    }

    pub async fn maybe_find<N: Node<N>>(&mut self) -> Result<Option<N>, ParsingError> {
        // We can't find anything inside a self-closed tag
        if !self.parent_has_child() {
            return Ok(None);
        }

        loop {
            // Try parse
            match N::qread(self).await {
                Err(ParsingError::Recoverable) => (),
                otherwise => return otherwise.map(Some),
            }

            // Skip or stop
            match self.peek() {
                Event::End(_) | Event::Eof => return Ok(None),
                _ => self.skip().await?,
            };
        }
    }

    pub async fn collect<N: Node<N>>(&mut self) -> Result<Vec<N>, ParsingError> {
        let mut acc = Vec::new();
        if !self.parent_has_child() {
            return Ok(acc);
        }

        loop {
            match N::qread(self).await {
                Err(ParsingError::Recoverable) => match self.peek() {
                    Event::End(_) => return Ok(acc),
                    _ => {
                        self.skip().await?;
                    }
                },
                Ok(v) => acc.push(v),
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn open(&mut self, ns: &[u8], key: &str) -> Result<Event<'static>, ParsingError> {
        let evt = match self.peek() {
            Event::Empty(_) if self.is_tag(ns, key) => {
                // virtually move one token so that `prev_attr`
                // and the empty-node logic of `close` keep working
                self.prev = self.cur.clone();
                self.cur.clone()
            }
            Event::Start(_) if self.is_tag(ns, key) => self.next().await?,
            _ => return Err(ParsingError::Recoverable),
        };

        self.parents.push(evt.clone());
        Ok(evt)
    }

    /// Open whatever element comes next and return its resolved name
    pub async fn open_any(&mut self) -> Result<QName, ParsingError> {
        let name = match self.peek() {
            Event::Start(_) | Event::Empty(_) => {
                self.current_name().ok_or(ParsingError::InvalidValue)?
            }
            _ => return Err(ParsingError::Recoverable),
        };

        let evt = match self.peek() {
            Event::Empty(_) => {
                self.prev = self.cur.clone();
                self.cur.clone()
            }
            _ => self.next().await?,
        };

        self.parents.push(evt);
        Ok(name)
    }

    pub async fn maybe_open(
        &mut self,
        ns: &[u8],
        key: &str,
    ) -> Result<Option<Event<'static>>, ParsingError> {
        match self.open(ns, key).await {
            Ok(v) => Ok(Some(v)),
            Err(ParsingError::Recoverable) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn prev_attr(&self, attr: &str) -> Option<String> {
        match &self.prev {
            Event::Start(bs) | Event::Empty(bs) => match bs.try_get_attribute(attr) {
                Ok(Some(attr)) => attr
                    .decode_and_unescape_value(&self.rdr)
                    .ok()
                    .map(|v| v.into_owned()),
                _ => None,
            },
            _ => None,
        }
    }

    // find stop tag
    pub async fn close(&mut self) -> Result<Event<'static>, ParsingError> {
        // Handle the empty case
        if !self.parent_has_child() {
            self.parents.pop();
            return self.next().await;
        }

        // Handle the start/end case
        loop {
            match self.peek() {
                Event::End(_) => {
                    self.parents.pop();
                    return self.next().await;
                }
                _ => self.skip().await?,
            };
        }
    }
}
