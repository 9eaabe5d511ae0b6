use std::fmt;
use std::fs::File;
use std::io::{self, Read};

use bytes::Bytes;

/// The body of a blocking raw call.
///
/// Besides text and bytes, a blocking body can be any `std::io::Read`. The
/// reader is drained on the calling thread when the call starts.
pub struct Body {
    kind: Kind,
}

enum Kind {
    Reader(Box<dyn Read + Send>, Option<u64>),
    Bytes(Bytes),
}

impl Body {
    /// Instantiate a `Body` from a reader.
    ///
    /// # Note
    ///
    /// While allowing for many types to be used, these bodies do not have
    /// a way to reset to the beginning, so they cannot be reused.
    ///
    /// ```rust
    /// # use std::fs::File;
    /// # use service_client::blocking::Body;
    /// # fn run() -> Result<(), Box<dyn std::error::Error>> {
    /// let file = File::open("customer.json")?;
    /// let body = Body::new(file);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new<R: Read + Send + 'static>(reader: R) -> Body {
        Body {
            kind: Kind::Reader(Box::new(reader), None),
        }
    }

    /// Create a `Body` from a `Read` where the size is known in advance.
    pub fn sized<R: Read + Send + 'static>(reader: R, len: u64) -> Body {
        Body {
            kind: Kind::Reader(Box::new(reader), Some(len)),
        }
    }

    /// Returns the body as a byte slice if it is not a reader.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self.kind {
            Kind::Reader(..) => None,
            Kind::Bytes(ref bytes) => Some(bytes.as_ref()),
        }
    }

    pub(crate) fn into_async(self) -> io::Result<crate::Body> {
        match self.kind {
            Kind::Bytes(bytes) => Ok(crate::Body::from(bytes)),
            Kind::Reader(mut reader, _) => {
                // The declared length is only a hint; the reader decides.
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                Ok(crate::Body::from(buf))
            }
        }
    }
}

impl From<Vec<u8>> for Body {
    #[inline]
    fn from(v: Vec<u8>) -> Body {
        Body {
            kind: Kind::Bytes(v.into()),
        }
    }
}

impl From<String> for Body {
    #[inline]
    fn from(s: String) -> Body {
        s.into_bytes().into()
    }
}

impl From<&'static [u8]> for Body {
    #[inline]
    fn from(s: &'static [u8]) -> Body {
        Body {
            kind: Kind::Bytes(Bytes::from_static(s)),
        }
    }
}

impl From<&'static str> for Body {
    #[inline]
    fn from(s: &'static str) -> Body {
        s.as_bytes().into()
    }
}

impl From<Bytes> for Body {
    #[inline]
    fn from(bytes: Bytes) -> Body {
        Body {
            kind: Kind::Bytes(bytes),
        }
    }
}

impl From<File> for Body {
    #[inline]
    fn from(f: File) -> Body {
        let len = f.metadata().map(|m| m.len()).ok();
        Body {
            kind: Kind::Reader(Box::new(f), len),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            Kind::Reader(_, ref len) => f
                .debug_struct("Reader")
                .field("length", &DebugLength(len))
                .finish(),
            Kind::Bytes(ref bytes) => fmt::Debug::fmt(bytes, f),
        }
    }
}

struct DebugLength<'a>(&'a Option<u64>);

impl<'a> fmt::Debug for DebugLength<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self.0 {
            Some(ref len) => fmt::Debug::fmt(len, f),
            None => f.write_str("Unknown"),
        }
    }
}
