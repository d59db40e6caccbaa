//! PROPPATCH bodies are parsed with a pull parser driven by an explicit
//! state machine, because property values are opaque: anything nested inside
//! a property element is kept verbatim as its raw value.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;

use super::error::ParsingError;
use super::types::{PropPatchParseResult, QName, DAV_NS};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Set,
    Remove,
}

#[derive(Debug)]
enum State {
    Root,
    Update,
    Op(Op),
    Prop(Op),
    Attribute {
        op: Op,
        name: QName,
        depth: usize,
        nested: bool,
        raw: String,
        text: String,
    },
    Done,
}

fn resolve(ns: ResolveResult, e: &BytesStart) -> Result<QName, ParsingError> {
    let ns = match ns {
        ResolveResult::Bound(v) => std::str::from_utf8(v.into_inner())?.to_string(),
        _ => String::new(),
    };
    let local = std::str::from_utf8(e.local_name().into_inner())?.to_string();
    Ok(QName::new(ns, local))
}

fn is_dav(name: &QName, local: &str) -> bool {
    name.ns == DAV_NS && name.local == local
}

fn record(acc: &mut PropPatchParseResult, op: Op, name: QName, value: String) {
    match op {
        Op::Set => acc.set(name, value),
        Op::Remove => acc.remove(name),
    }
}

fn raw_start(e: &BytesStart, empty: bool) -> Result<String, ParsingError> {
    let content = std::str::from_utf8(e)?;
    Ok(match empty {
        true => format!("<{}/>", content),
        false => format!("<{}>", content),
    })
}

/// Parse a `propertyupdate` document.
///
/// The value of a property is its text content, or the verbatim inner XML
/// when it contains elements.
pub fn parse_proppatch(body: &[u8]) -> Result<PropPatchParseResult, ParsingError> {
    let mut rdr = NsReader::from_reader(body);
    let mut buf = Vec::new();
    let mut acc = PropPatchParseResult::default();
    let mut state = State::Root;

    loop {
        let (ns, evt) = rdr.read_resolved_event_into(&mut buf)?;
        state = match (state, evt) {
            (_, Event::DocType(_)) => return Err(ParsingError::ForbiddenDoctype),
            (State::Done, Event::Eof) => return Ok(acc),
            (State::Root, Event::Eof) => return Err(ParsingError::TagNotFound),
            (_, Event::Eof) => return Err(ParsingError::Eof),

            // Structure
            (State::Root, Event::Start(e)) if is_dav(&resolve(ns.clone(), &e)?, "propertyupdate") => {
                State::Update
            }
            (State::Root, Event::Empty(e)) if is_dav(&resolve(ns.clone(), &e)?, "propertyupdate") => {
                State::Done
            }
            (State::Update, Event::Start(e)) => {
                let name = resolve(ns.clone(), &e)?;
                match (is_dav(&name, "set"), is_dav(&name, "remove")) {
                    (true, _) => State::Op(Op::Set),
                    (_, true) => State::Op(Op::Remove),
                    _ => return Err(ParsingError::WrongToken),
                }
            }
            (State::Update, Event::End(_)) => State::Done,
            (State::Op(op), Event::Start(e)) if is_dav(&resolve(ns.clone(), &e)?, "prop") => {
                State::Prop(op)
            }
            (State::Op(_), Event::End(_)) => State::Update,
            (State::Prop(op), Event::Empty(e)) => {
                record(&mut acc, op, resolve(ns.clone(), &e)?, String::new());
                State::Prop(op)
            }
            (State::Prop(op), Event::Start(e)) => State::Attribute {
                op,
                name: resolve(ns.clone(), &e)?,
                depth: 0,
                nested: false,
                raw: String::new(),
                text: String::new(),
            },
            (State::Prop(op), Event::End(_)) => State::Op(op),

            // Property content
            (
                State::Attribute {
                    op,
                    name,
                    depth,
                    nested,
                    raw,
                    text,
                },
                Event::End(e),
            ) => {
                if depth == 0 {
                    let value = if nested { raw } else { text };
                    record(&mut acc, op, name, value);
                    State::Prop(op)
                } else {
                    let closing = format!("</{}>", std::str::from_utf8(e.name().as_ref())?);
                    State::Attribute {
                        op,
                        name,
                        depth: depth - 1,
                        nested,
                        raw: raw + &closing,
                        text,
                    }
                }
            }
            (
                State::Attribute {
                    op,
                    name,
                    depth,
                    raw,
                    text,
                    ..
                },
                Event::Start(e),
            ) => State::Attribute {
                op,
                name,
                depth: depth + 1,
                nested: true,
                raw: raw + &raw_start(&e, false)?,
                text,
            },
            (
                State::Attribute {
                    op,
                    name,
                    depth,
                    raw,
                    text,
                    ..
                },
                Event::Empty(e),
            ) => State::Attribute {
                op,
                name,
                depth,
                nested: true,
                raw: raw + &raw_start(&e, true)?,
                text,
            },
            (
                State::Attribute {
                    op,
                    name,
                    depth,
                    nested,
                    raw,
                    text,
                },
                Event::Text(t),
            ) => State::Attribute {
                op,
                name,
                depth,
                nested,
                raw: raw + std::str::from_utf8(&t)?,
                text: text + t.unescape()?.as_ref(),
            },
            (
                State::Attribute {
                    op,
                    name,
                    depth,
                    nested,
                    raw,
                    text,
                },
                Event::CData(c),
            ) => {
                let content = std::str::from_utf8(&c)?;
                State::Attribute {
                    op,
                    name,
                    depth,
                    nested,
                    raw: raw + &format!("<![CDATA[{}]]>", content),
                    text: text + content,
                }
            }

            // Whitespace, comments, declarations and anything unexpected
            // outside of a property value
            (State::Root, Event::Start(_)) | (State::Root, Event::Empty(_)) => {
                return Err(ParsingError::TagNotFound)
            }
            (State::Update, Event::Empty(_)) => State::Update,
            (State::Op(op), Event::Empty(_)) => State::Op(op),
            (State::Op(_), Event::Start(_)) => return Err(ParsingError::WrongToken),
            (State::Root, Event::End(_)) => return Err(ParsingError::WrongToken),
            (State::Done, Event::Start(_)) | (State::Done, Event::Empty(_)) => {
                return Err(ParsingError::WrongToken)
            }
            (s, _) => s,
        };
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_remove() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propertyupdate xmlns:D="DAV:" xmlns:Z="http://ns.example.com/standards/z39.50/">
    <D:set>
        <D:prop>
            <Z:Authors>
                <Z:Author>Jim Whitehead</Z:Author>
                <Z:Author>Roy Fielding</Z:Author>
            </Z:Authors>
            <D:displayname>Fish &amp; chips</D:displayname>
        </D:prop>
    </D:set>
    <D:remove>
        <D:prop><Z:Copyright-Owner/></D:prop>
    </D:remove>
</D:propertyupdate>"#;

        let got = parse_proppatch(src.as_bytes()).unwrap();
        let z = "http://ns.example.com/standards/z39.50/";

        assert_eq!(got.to_set.len(), 2);
        assert_eq!(got.to_set[0].0, QName::new(z, "Authors"));
        assert_eq!(
            got.to_set[0].1,
            r#"
                <Z:Author>Jim Whitehead</Z:Author>
                <Z:Author>Roy Fielding</Z:Author>
            "#
        );
        assert_eq!(
            got.to_set[1],
            (QName::dav("displayname"), "Fish & chips".to_string())
        );
        assert_eq!(got.to_remove, vec![QName::new(z, "Copyright-Owner")]);
    }

    #[test]
    fn set_wins_over_remove() {
        let src = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:x="urn:x">
    <D:remove><D:prop><x:color/></D:prop></D:remove>
    <D:set><D:prop><x:color>blue</x:color></D:prop></D:set>
</D:propertyupdate>"#;

        let got = parse_proppatch(src.as_bytes()).unwrap();
        assert_eq!(
            got.to_set,
            vec![(QName::new("urn:x", "color"), "blue".to_string())]
        );
        assert!(got.to_remove.is_empty());
    }

    #[test]
    fn rejects_doctype_and_garbage() {
        let doctype = r#"<?xml version="1.0"?>
<!DOCTYPE D:propertyupdate [<!ENTITY e SYSTEM "file:///etc/passwd">]>
<D:propertyupdate xmlns:D="DAV:"/>"#;
        assert!(matches!(
            parse_proppatch(doctype.as_bytes()),
            Err(ParsingError::ForbiddenDoctype)
        ));

        assert!(matches!(
            parse_proppatch(b"<hello/>"),
            Err(ParsingError::TagNotFound)
        ));

        let truncated = r#"<D:propertyupdate xmlns:D="DAV:"><D:set><D:prop><D:displayname>x"#;
        assert!(parse_proppatch(truncated.as_bytes()).is_err());
    }
}
