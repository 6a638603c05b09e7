//! Message type catalog for feed connections.

use crate::codec::CodecError;

/// Identifier code carried in the first byte of every frame.
///
/// Codes 1 through 29 modify post state. Codes 30 and above are control
/// messages that never write to post models. The numeric values are part of
/// the wire contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Placeholder for a zeroed tag; never sent.
    Invalid = 0,
    /// Create a new open post.
    InsertPost = 2,
    /// Append one character to an open post.
    Append = 3,
    /// Remove the last character of an open post.
    Backspace = 4,
    /// Replace a span of an open post's body.
    Splice = 5,
    /// Close an open post.
    ClosePost = 6,
    /// Attach an image to a post.
    InsertImage = 8,
    /// Spoiler a post's image.
    Spoiler = 9,
    /// Delete a post.
    DeletePost = 10,
    /// Mark a post's author as banned.
    Banned = 11,
    /// Remove an image from a post.
    DeleteImage = 12,

    /// Subscribe to a feed.
    Synchronise = 30,
    /// Reclaim an open post after reconnecting.
    Reclaim = 31,
    /// Assign a post ID to the client.
    PostId = 32,
    /// Several frames concatenated to reduce transport overhead.
    Concat = 33,
    /// No operation; used by clients as a one-way ping.
    Noop = 34,
    /// Current synced client count.
    SyncCount = 35,
    /// Current server Unix time.
    ServerTime = 36,
    /// Redirect the client to a board.
    Redirect = 37,
    /// Free-form notification for the client.
    Notification = 38,
    /// The client must solve a captcha before posting again.
    Captcha = 39,
    /// Feed playlist data.
    FeedData = 40,
    /// Protocol version from the client, configuration from the server.
    Configs = 41,
}

impl MessageType {
    /// Every defined message type, in code order.
    pub const ALL: [Self; 23] = [
        Self::Invalid,
        Self::InsertPost,
        Self::Append,
        Self::Backspace,
        Self::Splice,
        Self::ClosePost,
        Self::InsertImage,
        Self::Spoiler,
        Self::DeletePost,
        Self::Banned,
        Self::DeleteImage,
        Self::Synchronise,
        Self::Reclaim,
        Self::PostId,
        Self::Concat,
        Self::Noop,
        Self::SyncCount,
        Self::ServerTime,
        Self::Redirect,
        Self::Notification,
        Self::Captcha,
        Self::FeedData,
        Self::Configs,
    ];

    /// Returns the wire code for this message type.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Returns `true` for message types that write to post state.
    ///
    /// # Examples
    ///
    /// ```
    /// use floodgate_proto::MessageType;
    /// assert!(MessageType::Append.is_mutating());
    /// assert!(!MessageType::Captcha.is_mutating());
    /// ```
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(self.code(), 1..=29)
    }
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.code() == code)
            .ok_or(CodecError::UnknownType(code))
    }
}

impl From<MessageType> for u8 {
    fn from(typ: MessageType) -> Self {
        typ.code()
    }
}
