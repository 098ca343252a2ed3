//! Well-known URIs used by Flux communities

/// Anchor every perspective uses for "this community itself"
pub const SELF: &str = "ad4m://self";
/// Parent-to-child edge issued by subject repositories
pub const HAS_CHILD: &str = "rdf://has_child";
/// Link carrying a social-DNA (schema program) literal
pub const HAS_SDNA: &str = "ad4m://has_zome";
/// Community membership
pub const HAS_MEMBER: &str = "ad4m://has_member";

/// Type-discriminator predicate shared by all Flux subject flags
pub const ENTRY_TYPE: &str = "flux://entry_type";
/// Name property
pub const NAME: &str = "flux://name";
/// Description property
pub const DESCRIPTION: &str = "flux://description";
/// Image property (JSON literal with base64 payload)
pub const IMAGE: &str = "flux://image";
/// Thumbnail property (JSON literal with base64 payload)
pub const THUMBNAIL: &str = "flux://thumbnail";
/// Body text property
pub const BODY: &str = "flux://body";
/// Title property
pub const TITLE: &str = "flux://title";
/// URL property
pub const URL: &str = "flux://url";
/// Summary property
pub const SUMMARY: &str = "flux://summary";
/// Embedding vector property
pub const EMBEDDING: &str = "flux://embedding";
/// Embedding model name property
pub const MODEL: &str = "flux://model";
/// Icon property
pub const ICON: &str = "flux://icon";
/// Package name property
pub const PKG: &str = "flux://pkg";

/// Community type flag value
pub const COMMUNITY: &str = "flux://community";
/// Community → channel edge, also the channel type flag value
pub const HAS_CHANNEL: &str = "flux://has_channel";
/// Channel → message edge, also the message type flag value
pub const HAS_MESSAGE: &str = "flux://has_message";
/// Post type flag value
pub const HAS_POST: &str = "flux://has_post";
/// Conversation type flag value
pub const CONVERSATION: &str = "flux://conversation";
/// Conversation subgroup type flag value
pub const CONVERSATION_SUBGROUP: &str = "flux://conversation_subgroup";
/// Embedding type flag value
pub const HAS_EMBEDDING: &str = "flux://has_embedding";
/// App type flag value, also channel → app collection edge
pub const FLUX_APP: &str = "flux://has_app";

/// Message → emoji reaction
pub const REACTION: &str = "flux://has_reaction";
/// Reply message → replied-to message
pub const REPLY_TO: &str = "flux://has_reply";
/// Original message → edited content literal
pub const EDITED_TO: &str = "flux://edited_to";
/// Message → hidden neighbourhood card marker
pub const CARD_HIDDEN: &str = "flux://card_hidden";
/// Message → popularity marker
pub const IS_POPULAR: &str = "flux://is_popular";

/// Scheme prefix of emoji reaction targets
pub const EMOJI_SCHEME: &str = "emoji://";
