//! Parsing of database URLs such as `sqlite:////var/lib/game.db?threadsafe=false`.
//!
//! The path part follows SQLAlchemy: three slashes introduce a relative path,
//! four an absolute one, and an empty path (or `:memory:`) selects a private
//! in-memory database.

use crate::error::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::str::FromStr;
use url::Url;

const SCHEME_PREFIX: &str = "sqlite://";

/// Characters that cannot appear literally in the path of a locator.
const PATH_ESCAPES: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'#').add(b'%').add(b'?');

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Memory,
    File(PathBuf),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Memory => f.write_str(":memory:"),
            Target::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A parsed connection URL: the database plus the concurrency mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub target: Target,
    /// `true` puts the handle behind an [`crate::actor::Actor`], `false`
    /// uses a bare [`crate::kernel::Kernel`] confined to the opening thread.
    pub threadsafe: bool,
}

impl Locator {
    pub fn parse(locator: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidLocator {
            locator: locator.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(locator).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "sqlite" {
            return Err(invalid("scheme must be sqlite"));
        }
        if url.host_str().is_some_and(|h| !h.is_empty()) {
            return Err(invalid("a host is not allowed, use sqlite:///<path>"));
        }

        let mut threadsafe = true;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "threadsafe" => {
                    threadsafe = parse_flag(&value)
                        .ok_or_else(|| invalid("threadsafe must be true or false"))?;
                }
                other => return Err(invalid(&format!("unknown option {other:?}"))),
            }
        }

        // The path is read from the text itself: `Url::path` resolves `.` and
        // `..` segments, which would name a different file.
        let rest = locator
            .get(..SCHEME_PREFIX.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(SCHEME_PREFIX))
            .map(|_| &locator[SCHEME_PREFIX.len()..])
            .ok_or_else(|| invalid("expected sqlite://"))?;
        let raw = rest.split(['?', '#']).next().unwrap_or_default();
        // `sqlite:///x.db` leaves `/x.db`; drop the separator slash so that a
        // fourth slash is what makes the path absolute.
        let raw = raw.strip_prefix('/').unwrap_or(raw);
        let path = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|_| invalid("path is not valid UTF-8 once decoded"))?;
        let target = match path.as_ref() {
            "" | ":memory:" => Target::Memory,
            path => Target::File(PathBuf::from(path)),
        };

        Ok(Self { target, threadsafe })
    }

    /// Locator for a file-backed database.
    pub fn file(path: impl Into<PathBuf>, threadsafe: bool) -> Self {
        Self {
            target: Target::File(path.into()),
            threadsafe,
        }
    }

    pub fn memory(threadsafe: bool) -> Self {
        Self {
            target: Target::Memory,
            threadsafe,
        }
    }
}

impl FromStr for Locator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = match &self.target {
            Target::Memory => ":memory:".to_string(),
            Target::File(path) => {
                utf8_percent_encode(&path.display().to_string(), PATH_ESCAPES).to_string()
            }
        };
        write!(f, "{SCHEME_PREFIX}/{path}?threadsafe={}", self.threadsafe)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
