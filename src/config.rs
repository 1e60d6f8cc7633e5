//! Configuration for [`PrioritizedList`]s.
use crate::{ItemLink, PrioritizedList};

/// Configures a [`PrioritizedList`].
///
/// With the `serde` feature enabled, `Config` can be deserialized, for
/// example as a section of a broker's configuration file. Missing fields
/// take their default values.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct Config {
    /// The number of priority levels. Items have priorities `0..priorities`.
    ///
    /// A value of 0 is treated as 1.
    pub priorities: usize,

    /// Whether cursors created with
    /// [`PrioritizedList::new_default_cursor`] revisit items that become
    /// available behind them.
    pub jumpback_by_default: bool,
}

/// Builds a [`PrioritizedList`].
///
/// # Examples
///
/// ```
/// use hyphae::{item::memory::MemoryLink, Builder, PrioritizedList};
///
/// let list: PrioritizedList<MemoryLink<&str>> = Builder::new()
///     .priorities(3)
///     .jumpback_by_default(true)
///     .build();
/// assert_eq!(list.priorities(), 3);
/// assert!(list.config().jumpback_by_default);
/// ```
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct Builder {
    config: Config,
}

impl Config {
    /// The default number of priority levels.
    pub const DEFAULT_PRIORITIES: usize = 10;
}

impl Default for Config {
    fn default() -> Self {
        Self {
            priorities: Self::DEFAULT_PRIORITIES,
            jumpback_by_default: false,
        }
    }
}

impl Builder {
    /// Returns a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of priority levels.
    pub fn priorities(self, priorities: usize) -> Self {
        Self {
            config: Config {
                priorities,
                ..self.config
            },
        }
    }

    /// Sets whether default cursors use jump-back.
    pub fn jumpback_by_default(self, jumpback_by_default: bool) -> Self {
        Self {
            config: Config {
                jumpback_by_default,
                ..self.config
            },
        }
    }

    /// Builds the list.
    #[must_use]
    pub fn build<L: ItemLink>(self) -> PrioritizedList<L> {
        PrioritizedList::with_config(self.config)
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;

    #[test]
    fn deserialize_with_defaults() {
        let config: Config = serde_json::from_str(r#"{ "priorities": 4 }"#).unwrap();
        assert_eq!(
            config,
            Config {
                priorities: 4,
                jumpback_by_default: false,
            }
        );

        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
    }
}
