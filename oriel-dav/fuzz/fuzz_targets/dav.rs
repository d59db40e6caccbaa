#![no_main]

use libfuzzer_sys::arbitrary::{self, Arbitrary};
use libfuzzer_sys::fuzz_target;
use tokio::runtime::Runtime;

use oriel_dav::{decoder, encoder, proppatch, types, xml};

/// Element names and text snippets the parsers actually look at
const VOCABULARY: &[&str] = &[
    "propfind", "propname", "allprop", "include", "prop", "propertyupdate", "set", "remove",
    "lockinfo", "lockscope", "locktype", "exclusive", "shared", "write", "owner", "href",
    "multistatus", "response", "propstat", "status", "lockdiscovery", "activelock", "locktoken",
    "timeout", "depth", "resourcetype", "collection", "getetag", "getcontentlength",
    "getlastmodified", "creationdate", "displayname", "iscollection", "HTTP/1.1 200 OK",
    "HTTP/1.1 404 Not Found", "Second-3600", "Infinite", "infinity", "opaquelocktoken:x",
    "Mon, 12 Jan 1998 09:25:56 GMT", "1997-12-01T17:42:21-08:00", "\"e1\"", "1", "0",
];

fn word(i: u8) -> &'static str {
    VOCABULARY[i as usize % VOCABULARY.len()]
}

#[derive(Arbitrary)]
enum Node {
    /// An element of the DAV: namespace, or of a foreign one
    Element { name: u8, foreign: bool, children: Vec<Node> },
    Text(u8),
}

impl Node {
    fn write(&self, out: &mut String) {
        match self {
            Self::Text(i) => out.push_str(word(*i)),
            Self::Element { name, foreign, children } => {
                let tag = match foreign {
                    true => format!("X:{}", word(*name)),
                    false => format!("D:{}", word(*name)),
                };
                if children.is_empty() {
                    out.push_str(&format!("<{}/>", tag));
                    return;
                }
                out.push_str(&format!("<{}>", tag));
                children.iter().for_each(|c| c.write(out));
                out.push_str(&format!("</{}>", tag));
            }
        }
    }
}

#[derive(Arbitrary)]
struct Document {
    root: u8,
    body: Vec<Node>,
}

impl Document {
    fn render(&self, root: &str) -> Vec<u8> {
        let mut out = format!("<D:{} xmlns:D=\"DAV:\" xmlns:X=\"urn:x\">", root);
        self.body.iter().for_each(|n| n.write(&mut out));
        out.push_str(&format!("</D:{}>", root));
        out.into_bytes()
    }
}

fuzz_target!(|doc: Document| {
    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(_) => return,
    };

    // never panic, whatever the root element
    let _ = proppatch::parse_proppatch(&doc.render("propertyupdate"));
    rt.block_on(async {
        let _ = decoder::parse_lockinfo(&doc.render("lockinfo")).await;
        let _ = decoder::parse_multistatus(&doc.render("multistatus")).await;
        let _ = decoder::parse_lock_discovery(&doc.render(word(doc.root))).await;
    });

    // a propfind we understand survives a round trip
    let raw = doc.render("propfind");
    rt.block_on(async {
        let reference: types::PropertiesRequest = match decoder::parse_properties_request(&raw).await {
            Ok(r) => r,
            Err(_) => return,
        };
        let written = xml::to_bytes(&reference, encoder::request_namespaces(&reference))
            .await
            .expect("xml serialization");
        let again = decoder::parse_properties_request(&written)
            .await
            .expect("deserialize again");
        assert_eq!(reference, again);
    });
});
