//! Network layer: the per-agent HTTP session, the shared cookie jar, and the
//! parsers for server-supplied mirror/digest metadata (RFC 6249 headers,
//! RFC 5854 Metalink/XML documents).

pub mod cookies;
pub mod headers;
pub mod metalink;
pub mod session;

pub use cookies::CookieJar;
pub use headers::{DigestEntry, LinkEntry, LinkRel};
pub use metalink::MetalinkFile;
pub use session::{FetchedResponse, HttpSession};
