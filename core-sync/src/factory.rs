//! # Item Factory
//!
//! Turns a client's native item into exactly one canonical kind.
//!
//! ## Overview
//!
//! Converters are plain functions registered per
//! `(client kind, native kind, canonical kind)` triple in a
//! [`ConverterRegistry`]. The registry is built once at startup, validated
//! against the capabilities each configured client reports, and handed to the
//! coordinator. A lookup that finds nothing is a configuration error
//! ([`SyncError::NoFactoryRegistered`]), never a silent skip.
//!
//! ## Usage
//!
//! ```rust
//! use bridge_traits::{ClientKind, NativeItem};
//! use core_library::ItemKind;
//! use core_sync::factory::ConverterRegistry;
//! use serde_json::json;
//!
//! let registry = ConverterRegistry::with_builtin();
//! let item = NativeItem::new("Movie", json!({ "Id": "123", "Name": "Alpha" }));
//!
//! let converted = registry.convert(ClientKind::Jellyfin, &item).unwrap();
//! assert_eq!(converted.external_id, "123");
//! assert_eq!(converted.data.kind, ItemKind::Movie);
//! ```

use crate::converters;
use crate::{Result, SyncError};
use bridge_traits::{ClientKind, NativeItem};
use core_library::{CanonicalItemData, CrossRefs, ItemKind, RemoteUserData};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A converter for one native kind into the given canonical kind.
pub type ConvertFn = fn(&NativeItem, ItemKind) -> Result<ConvertedItem>;

/// A container reference extracted from a child item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentRef {
    pub kind: ItemKind,
    pub external_id: String,
    pub title: String,
    pub index_number: Option<i32>,
    pub cross_refs: CrossRefs,
    /// The container's own container, e.g. the series above a season
    pub parent: Option<Box<ParentRef>>,
}

impl ParentRef {
    pub fn new(kind: ItemKind, external_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            kind,
            external_id: external_id.into(),
            title: title.into(),
            index_number: None,
            cross_refs: CrossRefs::default(),
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: ParentRef) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// This reference and its ancestors, outermost first.
    pub fn chain(&self) -> Vec<&ParentRef> {
        let mut chain = vec![self];
        let mut current = self;
        while let Some(parent) = current.parent.as_deref() {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Metadata for a placeholder standing in for this container.
    pub fn placeholder_data(&self) -> CanonicalItemData {
        let mut data = CanonicalItemData::new(self.kind, self.title.clone());
        data.index_number = self.index_number;
        data.cross_refs = self.cross_refs.clone();
        data
    }
}

/// Output of a converter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertedItem {
    /// The client's id for the item; always non-empty
    pub external_id: String,
    pub data: CanonicalItemData,
    pub parent: Option<ParentRef>,
    /// Per-user state embedded in the native item, if any
    pub user_data: Option<RemoteUserData>,
}

impl ConvertedItem {
    pub fn new(external_id: impl Into<String>, data: CanonicalItemData) -> Self {
        Self {
            external_id: external_id.into(),
            data,
            parent: None,
            user_data: None,
        }
    }

    /// Native ids of the containers, outermost first.
    pub fn external_parent_ids(&self) -> Vec<String> {
        self.parent
            .as_ref()
            .map(|parent| {
                parent
                    .chain()
                    .into_iter()
                    .map(|p| p.external_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A native kind a client capability produces, with its canonical kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequiredConverter {
    pub native_kind: String,
    pub canonical_kind: ItemKind,
}

impl RequiredConverter {
    pub fn new(native_kind: impl Into<String>, canonical_kind: ItemKind) -> Self {
        Self {
            native_kind: native_kind.into(),
            canonical_kind,
        }
    }
}

/// Converter lookup keyed by client kind, native kind and canonical kind.
#[derive(Default, Clone)]
pub struct ConverterRegistry {
    converters: HashMap<(ClientKind, String), HashMap<ItemKind, ConvertFn>>,
}

fn native_key(native_kind: &str) -> String {
    native_kind.trim().to_lowercase()
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the bundled Emby, Jellyfin, Plex and Subsonic converters.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        converters::register_builtin(&mut registry);
        registry
    }

    /// Register a converter. A later registration for the same triple replaces
    /// the earlier one.
    pub fn register(
        &mut self,
        client_kind: ClientKind,
        native_kind: &str,
        canonical_kind: ItemKind,
        convert: ConvertFn,
    ) {
        self.converters
            .entry((client_kind, native_key(native_kind)))
            .or_default()
            .insert(canonical_kind, convert);
    }

    pub fn contains(&self, client_kind: ClientKind, native_kind: &str, canonical_kind: ItemKind) -> bool {
        self.converters
            .get(&(client_kind, native_key(native_kind)))
            .is_some_and(|by_kind| by_kind.contains_key(&canonical_kind))
    }

    /// Convert using the single canonical kind registered for the item's
    /// native kind.
    ///
    /// # Errors
    ///
    /// - `NoFactoryRegistered` if nothing is registered for the native kind
    /// - `Conversion` if several canonical kinds are registered, or the
    ///   converter rejects the item
    pub fn convert(&self, client_kind: ClientKind, item: &NativeItem) -> Result<ConvertedItem> {
        let by_kind = self
            .converters
            .get(&(client_kind, native_key(&item.native_kind)))
            .filter(|by_kind| !by_kind.is_empty())
            .ok_or_else(|| SyncError::NoFactoryRegistered {
                client_kind: client_kind.as_str().to_string(),
                native_kind: item.native_kind.clone(),
                canonical_kind: "any".to_string(),
            })?;

        if by_kind.len() > 1 {
            return Err(SyncError::conversion(
                &item.native_kind,
                "several canonical kinds registered; the target kind must be given",
            ));
        }

        let (kind, convert) = by_kind
            .iter()
            .next()
            .ok_or_else(|| SyncError::conversion(&item.native_kind, "no converter"))?;
        convert(item, *kind)
    }

    /// Convert into a known canonical kind.
    ///
    /// # Errors
    ///
    /// - `NoFactoryRegistered` if the triple is not registered
    /// - `Conversion` if the converter rejects the item
    pub fn convert_as(
        &self,
        client_kind: ClientKind,
        item: &NativeItem,
        canonical_kind: ItemKind,
    ) -> Result<ConvertedItem> {
        let convert = self
            .converters
            .get(&(client_kind, native_key(&item.native_kind)))
            .and_then(|by_kind| by_kind.get(&canonical_kind))
            .ok_or_else(|| SyncError::NoFactoryRegistered {
                client_kind: client_kind.as_str().to_string(),
                native_kind: item.native_kind.clone(),
                canonical_kind: canonical_kind.as_str().to_string(),
            })?;
        convert(item, canonical_kind)
    }

    /// Required converters that are not registered.
    pub fn missing(
        &self,
        client_kind: ClientKind,
        required: &[RequiredConverter],
    ) -> Vec<RequiredConverter> {
        required
            .iter()
            .filter(|r| !self.contains(client_kind, &r.native_kind, r.canonical_kind))
            .cloned()
            .collect()
    }

    /// Startup check that every required converter is registered.
    ///
    /// # Errors
    ///
    /// Returns `NoFactoryRegistered` for the first missing triple.
    pub fn validate(&self, client_kind: ClientKind, required: &[RequiredConverter]) -> Result<()> {
        match self.missing(client_kind, required).into_iter().next() {
            Some(missing) => Err(SyncError::NoFactoryRegistered {
                client_kind: client_kind.as_str().to_string(),
                native_kind: missing.native_kind,
                canonical_kind: missing.canonical_kind.as_str().to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.converters.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("converters", &self.len())
            .finish()
    }
}
