//! Feed events and the Nostr intake adapter.

use log::debug;
use nostr_sdk::prelude::*;

use crate::identity::IdentityKey;

/// Protocol-level input the engine understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Profile metadata for an identity (Nostr kind 0)
    Metadata {
        identity: IdentityKey,
        display_name: Option<String>,
        icon_url: Option<String>,
    },
    /// A short text post (Nostr kind 1)
    Post {
        identity: IdentityKey,
        content: String,
        timestamp: u64,
    },
}

impl FeedEvent {
    /// Convert a signed Nostr event, or `None` for kinds the feed ignores.
    ///
    /// Metadata prefers `display_name` over `name`; `picture` becomes the icon
    /// URL. Unparseable metadata content is dropped.
    pub fn from_nostr(event: &Event) -> Option<Self> {
        let identity = event.pubkey.to_bytes();
        match event.kind {
            Kind::Metadata => {
                let meta = match Metadata::from_json(&event.content) {
                    Ok(meta) => meta,
                    Err(e) => {
                        debug!("[Intake] Ignoring malformed metadata from {}: {}", event.pubkey, e);
                        return None;
                    }
                };
                let display_name = meta
                    .display_name
                    .filter(|n| !n.is_empty())
                    .or(meta.name.filter(|n| !n.is_empty()));
                Some(FeedEvent::Metadata {
                    identity,
                    display_name,
                    icon_url: meta.picture.map(|p| p.to_string()),
                })
            }
            Kind::TextNote => Some(FeedEvent::Post {
                identity,
                content: event.content.clone(),
                timestamp: event.created_at.as_u64(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(keys: &Keys, kind: Kind, content: &str) -> Event {
        EventBuilder::new(kind, content).sign_with_keys(keys).unwrap()
    }

    #[test]
    fn test_metadata_prefers_display_name() {
        let keys = Keys::generate();
        let event = signed(
            &keys,
            Kind::Metadata,
            r#"{"name":"alice","display_name":"Alice A.","picture":"https://example.com/a.png"}"#,
        );
        assert_eq!(
            FeedEvent::from_nostr(&event),
            Some(FeedEvent::Metadata {
                identity: keys.public_key().to_bytes(),
                display_name: Some("Alice A.".to_string()),
                icon_url: Some("https://example.com/a.png".to_string()),
            })
        );
    }

    #[test]
    fn test_metadata_falls_back_to_name() {
        let keys = Keys::generate();
        let event = signed(&keys, Kind::Metadata, r#"{"name":"bob","display_name":""}"#);
        let Some(FeedEvent::Metadata { display_name, icon_url, .. }) = FeedEvent::from_nostr(&event) else {
            panic!("expected metadata");
        };
        assert_eq!(display_name.as_deref(), Some("bob"));
        assert_eq!(icon_url, None);
    }

    #[test]
    fn test_text_note_becomes_post() {
        let keys = Keys::generate();
        let event = signed(&keys, Kind::TextNote, "gm");
        assert_eq!(
            FeedEvent::from_nostr(&event),
            Some(FeedEvent::Post {
                identity: keys.public_key().to_bytes(),
                content: "gm".to_string(),
                timestamp: event.created_at.as_u64(),
            })
        );
    }

    #[test]
    fn test_other_kinds_ignored() {
        let keys = Keys::generate();
        assert_eq!(FeedEvent::from_nostr(&signed(&keys, Kind::Reaction, "+")), None);
        assert_eq!(FeedEvent::from_nostr(&signed(&keys, Kind::Metadata, "not json")), None);
    }
}
