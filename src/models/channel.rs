//! Realtime channel naming.
//!
//! Channels are plain strings on the wire. Tenant and user channels are
//! private (the vendor asks our auth endpoint before a socket may join),
//! presence channels additionally carry member info.

use std::fmt;

pub const TENANT_PREFIX: &str = "private-tenant-";
pub const USER_PREFIX: &str = "private-user-";
pub const PRESENCE_PREFIX: &str = "presence-";
pub const PRIVATE_PREFIX: &str = "private-";

/// Longest channel name the vendor accepts.
pub const MAX_CHANNEL_LEN: usize = 164;

/// Channel of every member of a tenant.
pub fn tenant_channel(tenant_id: &str) -> String {
    format!("{}{}", TENANT_PREFIX, tenant_id)
}

/// Channel of a single user.
pub fn user_channel(user_id: &str) -> String {
    format!("{}{}", USER_PREFIX, user_id)
}

/// Parsed form of a channel name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    Tenant(String),
    User(String),
    Presence(String),
    /// Any other `private-` channel.
    Private(String),
    Public(String),
}

impl ChannelKind {
    pub fn parse(channel: &str) -> Self {
        if let Some(id) = channel.strip_prefix(TENANT_PREFIX) {
            ChannelKind::Tenant(id.to_string())
        } else if let Some(id) = channel.strip_prefix(USER_PREFIX) {
            ChannelKind::User(id.to_string())
        } else if let Some(name) = channel.strip_prefix(PRESENCE_PREFIX) {
            ChannelKind::Presence(name.to_string())
        } else if let Some(name) = channel.strip_prefix(PRIVATE_PREFIX) {
            ChannelKind::Private(name.to_string())
        } else {
            ChannelKind::Public(channel.to_string())
        }
    }

    /// Whether joining requires a signed authorization.
    pub fn requires_auth(&self) -> bool {
        !matches!(self, ChannelKind::Public(_))
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Tenant(id) => write!(f, "{}{}", TENANT_PREFIX, id),
            ChannelKind::User(id) => write!(f, "{}{}", USER_PREFIX, id),
            ChannelKind::Presence(name) => write!(f, "{}{}", PRESENCE_PREFIX, name),
            ChannelKind::Private(name) => write!(f, "{}{}", PRIVATE_PREFIX, name),
            ChannelKind::Public(name) => write!(f, "{}", name),
        }
    }
}

/// Check a channel name against the vendor's character set and length limit.
pub fn is_valid_channel_name(channel: &str) -> bool {
    !channel.is_empty()
        && channel.len() <= MAX_CHANNEL_LEN
        && channel
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-=@,.;".contains(c))
}

/// Socket ids are issued by the vendor as `<digits>.<digits>`.
pub fn is_valid_socket_id(socket_id: &str) -> bool {
    match socket_id.split_once('.') {
        Some((left, right)) => {
            !left.is_empty()
                && !right.is_empty()
                && left.chars().all(|c| c.is_ascii_digit())
                && right.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
