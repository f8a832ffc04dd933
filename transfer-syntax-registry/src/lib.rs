//! This crate contains the transfer syntax registry
//! consulted during presentation context negotiation
//! and pixel data transcoding.
//!
//! Unlike a process-wide table populated as a side effect of linking,
//! a [`TransferSyntaxRegistry`] is an ordinary value:
//! it is built once at start-up through a [`TransferSyntaxRegistryBuilder`],
//! then shared (usually behind an [`Arc`](std::sync::Arc))
//! with every component that needs it.
//! Once built it cannot be mutated,
//! so concurrent lookups need no locking.
//!
//! ```
//! use pacsnet_transfer_syntax_registry::{entries, TransferSyntaxRegistry};
//!
//! let registry = TransferSyntaxRegistry::builder()
//!     .with_builtin_entries()
//!     .build();
//!
//! let ts = registry.lookup("1.2.840.10008.1.2.5")?;
//! assert_eq!(ts.name(), "RLE Lossless");
//! assert!(registry.is_encapsulated(entries::RLE_LOSSLESS.uid()));
//! assert!(registry.lookup("1.2.3.4").is_err());
//! # Ok::<(), pacsnet_transfer_syntax_registry::Error>(())
//! ```

pub mod entries;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

pub use byteordered::Endianness;
use snafu::{ensure, OptionExt, Snafu};
use tracing::debug;

/// Errors originating from the transfer syntax registry.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// The UID does not refer to any registered transfer syntax.
    #[snafu(display("Unknown transfer syntax `{}`", uid))]
    UnknownTransferSyntax { uid: String },

    /// A transfer syntax with this UID was already registered.
    #[snafu(display("Transfer syntax `{}` is already registered", uid))]
    DuplicateTransferSyntax { uid: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// How pixel data is laid out under a transfer syntax.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PixelEncoding {
    /// Native pixel data, a flat frame-addressable sample array.
    Native,
    /// The whole data set is deflated,
    /// pixel data inside remains native.
    Deflated,
    /// Pixel data is an opaque sequence of compressed fragments.
    Encapsulated {
        /// whether the compression discards information
        lossy: bool,
    },
}

/// A transfer syntax descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSyntax {
    uid: Cow<'static, str>,
    name: Cow<'static, str>,
    endianness: Endianness,
    explicit_vr: bool,
    pixel_encoding: PixelEncoding,
}

impl TransferSyntax {
    /// Create a new transfer syntax descriptor.
    pub const fn new(
        uid: &'static str,
        name: &'static str,
        endianness: Endianness,
        explicit_vr: bool,
        pixel_encoding: PixelEncoding,
    ) -> Self {
        TransferSyntax {
            uid: Cow::Borrowed(uid),
            name: Cow::Borrowed(name),
            endianness,
            explicit_vr,
            pixel_encoding,
        }
    }

    /// Create a descriptor with owned identifiers,
    /// such as one contributed by a codec extension at start-up.
    pub fn new_owned(
        uid: impl Into<String>,
        name: impl Into<String>,
        endianness: Endianness,
        explicit_vr: bool,
        pixel_encoding: PixelEncoding,
    ) -> Self {
        let uid: String = uid.into();
        TransferSyntax {
            uid: Cow::Owned(trim_uid(&uid).to_string()),
            name: Cow::Owned(name.into()),
            endianness,
            explicit_vr,
            pixel_encoding,
        }
    }

    /// Obtain this transfer syntax' unique identifier.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Obtain the name of this transfer syntax.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Obtain this transfer syntax' expected endianness.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Check whether this transfer syntax expects explicit value representations.
    pub fn is_explicit_vr(&self) -> bool {
        self.explicit_vr
    }

    /// Obtain the pixel data layout of this transfer syntax.
    pub fn pixel_encoding(&self) -> PixelEncoding {
        self.pixel_encoding
    }

    /// Check whether pixel data is stored as compressed fragments.
    pub fn is_encapsulated(&self) -> bool {
        matches!(self.pixel_encoding, PixelEncoding::Encapsulated { .. })
    }

    /// Check whether pixel data is stored as a plain sample array
    /// in a data set which is not deflated.
    pub fn is_native(&self) -> bool {
        self.pixel_encoding == PixelEncoding::Native
    }

    /// Check whether the data set is deflated.
    pub fn is_deflated(&self) -> bool {
        self.pixel_encoding == PixelEncoding::Deflated
    }

    /// Check whether this transfer syntax is a lossy compression.
    pub fn is_lossy(&self) -> bool {
        matches!(self.pixel_encoding, PixelEncoding::Encapsulated { lossy: true })
    }
}

impl fmt::Display for TransferSyntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uid)
    }
}

/// Remove the trailing padding (null characters or spaces)
/// which may be present in UIDs read from the wire.
pub fn trim_uid(uid: &str) -> &str {
    uid.trim_end_matches(|c: char| c.is_whitespace() || c == '\0')
}

/// A read-only registry of transfer syntaxes,
/// indexed by UID.
#[derive(Clone, Default)]
pub struct TransferSyntaxRegistry {
    entries: Vec<TransferSyntax>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for TransferSyntaxRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|ts| ts.uid()))
            .finish()
    }
}

impl TransferSyntaxRegistry {
    /// Start building a new, empty registry.
    pub fn builder() -> TransferSyntaxRegistryBuilder {
        TransferSyntaxRegistryBuilder::default()
    }

    /// Build a registry containing only the built-in entries.
    pub fn with_builtin() -> Self {
        Self::builder().with_builtin_entries().build()
    }

    /// Obtain a transfer syntax by UID.
    pub fn get(&self, uid: &str) -> Option<&TransferSyntax> {
        self.index
            .get(trim_uid(uid))
            .and_then(|&i| self.entries.get(i))
    }

    /// Obtain a transfer syntax by UID,
    /// failing with [`Error::UnknownTransferSyntax`] if it is not registered.
    pub fn lookup(&self, uid: &str) -> Result<&TransferSyntax> {
        self.get(uid).context(UnknownTransferSyntaxSnafu {
            uid: trim_uid(uid),
        })
    }

    /// Check whether the transfer syntax is registered
    /// and stores pixel data in encapsulated form.
    ///
    /// Returns `false` for unknown UIDs.
    pub fn is_encapsulated(&self, uid: &str) -> bool {
        self.get(uid).map(TransferSyntax::is_encapsulated).unwrap_or(false)
    }

    /// Check whether the transfer syntax is registered.
    pub fn contains(&self, uid: &str) -> bool {
        self.index.contains_key(trim_uid(uid))
    }

    /// Iterate over all registered transfer syntaxes in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &TransferSyntax> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for a [`TransferSyntaxRegistry`].
///
/// All registration happens here,
/// before any association starts negotiating.
#[derive(Debug, Default)]
pub struct TransferSyntaxRegistryBuilder {
    registry: TransferSyntaxRegistry,
}

impl TransferSyntaxRegistryBuilder {
    /// Register a transfer syntax.
    ///
    /// Fails if a transfer syntax with the same UID is already registered.
    pub fn register(&mut self, ts: TransferSyntax) -> Result<&mut Self> {
        let uid = trim_uid(ts.uid()).to_string();
        ensure!(
            !self.registry.index.contains_key(&uid),
            DuplicateTransferSyntaxSnafu { uid }
        );
        debug!("Registering transfer syntax {}", ts);
        self.registry.index.insert(uid, self.registry.entries.len());
        self.registry.entries.push(ts);
        Ok(self)
    }

    /// Register all built-in transfer syntaxes
    /// listed in [`entries::BUILTIN`].
    ///
    /// Built-in entries already present are left untouched.
    pub fn with_builtin_entries(mut self) -> Self {
        for ts in entries::BUILTIN {
            if !self.registry.contains(ts.uid()) {
                // cannot collide, checked above
                let _ = self.register(ts.clone());
            }
        }
        self
    }

    /// Finish populating the registry.
    pub fn build(self) -> TransferSyntaxRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;
    use rstest::rstest;

    #[rstest]
    #[case("1.2.840.10008.1.2", false, false)]
    #[case("1.2.840.10008.1.2.1", false, false)]
    #[case("1.2.840.10008.1.2.1.99", false, false)]
    #[case("1.2.840.10008.1.2.4.50", true, true)]
    #[case("1.2.840.10008.1.2.4.90", true, false)]
    #[case("1.2.840.10008.1.2.4.91", true, true)]
    #[case("1.2.840.10008.1.2.5", true, false)]
    fn builtin_properties(#[case] uid: &str, #[case] encapsulated: bool, #[case] lossy: bool) {
        let registry = TransferSyntaxRegistry::with_builtin();
        let ts = registry.lookup(uid).unwrap();
        assert_eq!(ts.uid(), uid);
        assert_eq!(ts.is_encapsulated(), encapsulated);
        assert_eq!(ts.is_lossy(), lossy);
        assert_eq!(registry.is_encapsulated(uid), encapsulated);
    }

    #[test]
    fn implicit_vr_is_the_only_implicit_entry() {
        let registry = TransferSyntaxRegistry::with_builtin();
        let implicit: Vec<_> = registry
            .iter()
            .filter(|ts| !ts.is_explicit_vr())
            .map(|ts| ts.uid())
            .collect();
        assert_eq!(implicit, vec!["1.2.840.10008.1.2"]);
        assert_eq!(
            registry.get("1.2.840.10008.1.2.2").map(|ts| ts.endianness()),
            Some(Endianness::Big)
        );
    }

    #[test]
    fn lookup_trims_padding() {
        let registry = TransferSyntaxRegistry::with_builtin();
        assert!(registry.lookup("1.2.840.10008.1.2.1\0").is_ok());
        assert!(registry.lookup("1.2.840.10008.1.2 ").is_ok());
    }

    #[test]
    fn unknown_uid_is_reported() {
        let registry = TransferSyntaxRegistry::with_builtin();
        let err = registry.lookup("1.2.3.4.5\0").unwrap_err();
        assert_matches!(&err, Error::UnknownTransferSyntax { uid } if uid == "1.2.3.4.5");
        assert!(!registry.is_encapsulated("1.2.3.4.5"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut builder = TransferSyntaxRegistry::builder();
        builder.register(entries::RLE_LOSSLESS).unwrap();
        let err = builder
            .register(TransferSyntax::new_owned(
                "1.2.840.10008.1.2.5\0",
                "Another RLE",
                Endianness::Little,
                true,
                PixelEncoding::Encapsulated { lossy: false },
            ))
            .unwrap_err();
        assert_matches!(err, Error::DuplicateTransferSyntax { .. });

        let registry = builder.build();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("1.2.840.10008.1.2.5").unwrap().name(), "RLE Lossless");
    }

    #[test]
    fn extension_entries_extend_builtin() {
        let mut builder = TransferSyntaxRegistry::builder();
        builder
            .register(TransferSyntax::new_owned(
                "1.2.840.10008.1.2.4.201",
                "High-Throughput JPEG 2000 Image Compression (Lossless Only)",
                Endianness::Little,
                true,
                PixelEncoding::Encapsulated { lossy: false },
            ))
            .unwrap();
        let registry = builder.with_builtin_entries().build();
        assert_eq!(registry.len(), entries::BUILTIN.len() + 1);
        assert!(registry.is_encapsulated("1.2.840.10008.1.2.4.201"));
        assert_eq!(
            registry.iter().next().map(|ts| ts.uid()),
            Some("1.2.840.10008.1.2.4.201")
        );
    }
}
