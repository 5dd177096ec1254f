//! Bundled converters for the supported server families
//!
//! Each submodule maps one schema onto [`CanonicalItemData`](core_library::CanonicalItemData)
//! and lists its native kinds. [`register_builtin`] wires them into a
//! [`ConverterRegistry`]; [`required_converters`] tells startup validation
//! which triples a client capability needs.

mod emby;
pub(crate) mod fields;
mod plex;
mod subsonic;

use crate::factory::{ConvertFn, ConverterRegistry, RequiredConverter};
use bridge_traits::{Capability, ClientKind};
use core_library::ItemKind;

/// The canonical kind a catalog capability yields.
///
/// `None` for history and favorites, whose items may be of any kind.
pub fn capability_kind(capability: Capability) -> Option<ItemKind> {
    match capability {
        Capability::Movies => Some(ItemKind::Movie),
        Capability::Series => Some(ItemKind::Series),
        Capability::Seasons => Some(ItemKind::Season),
        Capability::Episodes => Some(ItemKind::Episode),
        Capability::Artists => Some(ItemKind::Artist),
        Capability::Albums => Some(ItemKind::Album),
        Capability::Tracks => Some(ItemKind::Track),
        Capability::Collections => Some(ItemKind::Collection),
        Capability::Playlists => Some(ItemKind::Playlist),
        Capability::PlayHistory | Capability::Favorites => None,
    }
}

fn schema(client_kind: ClientKind) -> (&'static [(&'static str, ItemKind)], ConvertFn) {
    match client_kind {
        ClientKind::Emby | ClientKind::Jellyfin => (emby::NATIVE_KINDS, emby::convert as ConvertFn),
        ClientKind::Plex => (plex::NATIVE_KINDS, plex::convert as ConvertFn),
        ClientKind::Subsonic => (subsonic::NATIVE_KINDS, subsonic::convert as ConvertFn),
    }
}

/// Register every bundled converter.
pub fn register_builtin(registry: &mut ConverterRegistry) {
    for client_kind in ClientKind::ALL {
        let (kinds, convert) = schema(client_kind);
        for (native_kind, canonical_kind) in kinds {
            registry.register(client_kind, native_kind, *canonical_kind, convert);
        }
    }
}

/// Native kinds a client of `client_kind` returns for `capability`.
///
/// Catalog capabilities return their own kind. Lists also return the member
/// kinds; history returns playable kinds; favorites any non-list kind.
pub fn required_converters(
    client_kind: ClientKind,
    capability: Capability,
) -> Vec<RequiredConverter> {
    let (kinds, _) = schema(client_kind);
    let wanted = |kind: ItemKind| -> bool {
        match capability {
            Capability::PlayHistory => {
                matches!(kind, ItemKind::Movie | ItemKind::Episode | ItemKind::Track)
            }
            Capability::Favorites => !kind.is_list(),
            Capability::Collections | Capability::Playlists => {
                !kind.is_list() || Some(kind) == capability_kind(capability)
            }
            _ => Some(kind) == capability_kind(capability),
        }
    };

    kinds
        .iter()
        .filter(|(_, kind)| wanted(*kind))
        .map(|(native_kind, kind)| RequiredConverter::new(*native_kind, *kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_covers_every_supported_capability() {
        let registry = ConverterRegistry::with_builtin();
        for client_kind in ClientKind::ALL {
            for capability in Capability::SYNC_ORDER {
                let required = required_converters(client_kind, capability);
                assert!(
                    registry.validate(client_kind, &required).is_ok(),
                    "{client_kind:?} {capability}"
                );
            }
        }
    }

    #[test]
    fn test_required_converters_per_capability() {
        let movies = required_converters(ClientKind::Emby, Capability::Movies);
        assert_eq!(movies, vec![RequiredConverter::new("Movie", ItemKind::Movie)]);

        let history = required_converters(ClientKind::Plex, Capability::PlayHistory);
        assert_eq!(history.len(), 3);

        // Subsonic has no video kinds
        assert!(required_converters(ClientKind::Subsonic, Capability::Movies).is_empty());

        let playlists = required_converters(ClientKind::Subsonic, Capability::Playlists);
        assert!(playlists.contains(&RequiredConverter::new("playlist", ItemKind::Playlist)));
        assert!(playlists.contains(&RequiredConverter::new("song", ItemKind::Track)));
    }
}
