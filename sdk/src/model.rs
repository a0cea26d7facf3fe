//! Authoritative user and channel state.
//!
//! Entities are created on first reference, mutated by partial
//! field-merge, and destroyed on explicit removal. A merge only touches
//! fields the inbound message actually carried: the decode layer keeps
//! "omitted" and "explicitly zero" distinct, and this module trusts that
//! distinction instead of re-deriving it from default values.

use std::collections::HashMap;

use airband_protocol::{ChannelState, UserState};

/// The permanent root channel; it exists once synchronized and has no
/// parent.
pub const ROOT_CHANNEL: u32 = 0;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub session: u32,
    /// Registered account id, if any.
    pub user_id: Option<u32>,
    pub name: String,
    pub channel_id: u32,
    /// Admin-imposed flags, distinct from the self-imposed pair.
    pub mute: bool,
    pub deaf: bool,
    pub suppress: bool,
    pub self_mute: bool,
    pub self_deaf: bool,
    pub comment: String,
    pub hash: String,
}

impl User {
    #[must_use]
    pub fn new(session: u32) -> Self {
        Self {
            session,
            channel_id: ROOT_CHANNEL,
            ..Self::default()
        }
    }

    /// Merge the carried fields of a `UserState` into this user.
    pub fn apply(&mut self, msg: &UserState) {
        if let Some(v) = msg.user_id {
            self.user_id = Some(v);
        }
        if let Some(v) = &msg.name {
            self.name.clone_from(v);
        }
        if let Some(v) = msg.channel_id {
            self.channel_id = v;
        }
        if let Some(v) = msg.mute {
            self.mute = v;
        }
        if let Some(v) = msg.deaf {
            self.deaf = v;
        }
        if let Some(v) = msg.suppress {
            self.suppress = v;
        }
        if let Some(v) = msg.self_mute {
            self.self_mute = v;
        }
        if let Some(v) = msg.self_deaf {
            self.self_deaf = v;
        }
        if let Some(v) = &msg.comment {
            self.comment.clone_from(v);
        }
        if let Some(v) = &msg.hash {
            self.hash.clone_from(v);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    pub id: u32,
    /// `None` only for the root channel.
    pub parent: Option<u32>,
    pub name: String,
    pub description: String,
    pub temporary: bool,
    /// Sibling sort position.
    pub position: i32,
    /// Zero means uncapped.
    pub max_users: u32,
    pub links: Vec<u32>,
    pub is_enter_restricted: bool,
    pub can_enter: bool,
}

impl Channel {
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self {
            id,
            can_enter: true,
            ..Self::default()
        }
    }

    /// Merge the carried fields of a `ChannelState` into this channel.
    pub fn apply(&mut self, msg: &ChannelState) {
        if let Some(v) = msg.parent {
            // Channel 0 stays parentless.
            if self.id != ROOT_CHANNEL {
                self.parent = Some(v);
            }
        }
        if let Some(v) = &msg.name {
            self.name.clone_from(v);
        }
        if let Some(v) = &msg.description {
            self.description.clone_from(v);
        }
        if let Some(v) = msg.temporary {
            self.temporary = v;
        }
        if let Some(v) = msg.position {
            self.position = v;
        }
        if let Some(v) = msg.max_users {
            self.max_users = v;
        }
        if let Some(v) = &msg.links {
            self.links.clone_from(v);
        }
        if let Some(v) = msg.is_enter_restricted {
            self.is_enter_restricted = v;
        }
        if let Some(v) = msg.can_enter {
            self.can_enter = v;
        }
    }
}

/// Connection-scoped entity maps.
#[derive(Debug, Default)]
pub struct Roster {
    pub users: HashMap<u32, User>,
    pub channels: HashMap<u32, Channel>,
}

impl Roster {
    pub fn clear(&mut self) {
        self.users.clear();
        self.channels.clear();
    }
}
