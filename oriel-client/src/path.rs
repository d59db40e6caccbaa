use std::fmt;

/// An absolute path on the remote server, kept unencoded.
///
/// Percent-encoding only happens when a URL is built from it, an already
/// encoded URL is passed around as a plain `&str` instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path {
    parts: Vec<String>,
}

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    /// Split an unencoded path on `/`, empty segments are dropped
    pub fn parse(raw: &str) -> Self {
        Self {
            parts: raw
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Read the path of a percent-encoded href, each segment is decoded on
    /// its own so that an encoded `/` stays inside its segment.
    pub fn from_encoded(raw: &str) -> Self {
        Self {
            parts: raw
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match urlencoding::decode(s) {
                    Ok(v) => v.into_owned(),
                    Err(_) => s.to_string(),
                })
                .collect(),
        }
    }

    pub fn child(&self, name: &str) -> Self {
        let mut parts = self.parts.clone();
        parts.push(name.to_string());
        Self { parts }
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.parts.split_last()?;
        Some(Self {
            parts: rest.to_vec(),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.parts.last().map(String::as_str)
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.parts.starts_with(&prefix.parts)
    }

    /// Drop a leading prefix, `None` when the path is not below it
    pub fn strip_prefix(&self, prefix: &Path) -> Option<Self> {
        self.parts.strip_prefix(prefix.parts.as_slice()).map(|rest| Self {
            parts: rest.to_vec(),
        })
    }

    /// `/a%20b/c`, the root being `/`
    pub fn encoded(&self) -> String {
        if self.parts.is_empty() {
            return "/".into();
        }
        self.parts
            .iter()
            .map(|p| format!("/{}", urlencoding::encode(p)))
            .collect()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parts.is_empty() {
            return write!(f, "/");
        }
        for p in self.parts.iter() {
            write!(f, "/{}", p)?;
        }
        Ok(())
    }
}

impl From<&str> for Path {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}
