use std::collections::HashSet;

/// The set of channels that exist. Owned by the venue/channel service; the
/// chat core only asks whether an id is valid.
pub trait ChannelCatalog: Send + Sync {
    fn contains(&self, channel_id: &str) -> bool;
}

/// A fixed catalog, loaded from configuration at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    channels: HashSet<String>,
}

impl StaticCatalog {
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl ChannelCatalog for StaticCatalog {
    fn contains(&self, channel_id: &str) -> bool {
        self.channels.contains(channel_id)
    }
}
