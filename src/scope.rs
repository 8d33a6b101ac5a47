//! Authorization scopes and the normalized [ScopeSet](ScopeSet) used to compare requested and granted scopes.
//!
//! A scope set renders as its scopes sorted ascending and joined by single spaces. Two sets compare equal regardless
//! of the order their scopes were given in, which makes the set (not its string) the key for reusing a cached token.
//!
//! ```
//! # use spotiauth::scope::{Scope, ScopeSet};
//! let requested: ScopeSet = "user-read-private,playlist-read-private".parse().unwrap();
//! let granted: ScopeSet = [Scope::PlaylistReadPrivate, Scope::UserReadPrivate].into_iter().collect();
//!
//! assert_eq!(requested, granted);
//! assert_eq!(granted.to_string(), "playlist-read-private user-read-private");
//! ```

use std::{cmp::Ordering, collections::BTreeSet, convert::Infallible, fmt::Display, str::FromStr};

use log::debug;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Types that can be rendered as a space-separated scope string.
pub trait ToScopesString {
    fn to_scopes_string(self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    UgcImageUpload,
    UserModifyPlaybackState,
    UserReadPlaybackState,
    UserReadCurrentlyPlaying,
    UserFollowModify,
    UserFollowRead,
    UserReadRecentlyPlayed,
    UserReadPlaybackPosition,
    UserTopRead,
    PlaylistReadCollaborative,
    PlaylistModifyPublic,
    PlaylistReadPrivate,
    PlaylistModifyPrivate,
    AppRemoteControl,
    Streaming,
    UserReadEmail,
    UserReadPrivate,
    UserLibraryModify,
    UserLibraryRead,
}

/// A normalized, order-independent set of [scopes](Scope).
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct ScopeSet(BTreeSet<Scope>);

impl Scope {
    pub const ALL: [Scope; 19] = [
        Scope::UgcImageUpload,
        Scope::UserModifyPlaybackState,
        Scope::UserReadPlaybackState,
        Scope::UserReadCurrentlyPlaying,
        Scope::UserFollowModify,
        Scope::UserFollowRead,
        Scope::UserReadRecentlyPlayed,
        Scope::UserReadPlaybackPosition,
        Scope::UserTopRead,
        Scope::PlaylistReadCollaborative,
        Scope::PlaylistModifyPublic,
        Scope::PlaylistReadPrivate,
        Scope::PlaylistModifyPrivate,
        Scope::AppRemoteControl,
        Scope::Streaming,
        Scope::UserReadEmail,
        Scope::UserReadPrivate,
        Scope::UserLibraryModify,
        Scope::UserLibraryRead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::UgcImageUpload => "ugc-image-upload",
            Scope::UserModifyPlaybackState => "user-modify-playback-state",
            Scope::UserReadPlaybackState => "user-read-playback-state",
            Scope::UserReadCurrentlyPlaying => "user-read-currently-playing",
            Scope::UserFollowModify => "user-follow-modify",
            Scope::UserFollowRead => "user-follow-read",
            Scope::UserReadRecentlyPlayed => "user-read-recently-played",
            Scope::UserReadPlaybackPosition => "user-read-playback-position",
            Scope::UserTopRead => "user-top-read",
            Scope::PlaylistReadCollaborative => "playlist-read-collaborative",
            Scope::PlaylistModifyPublic => "playlist-modify-public",
            Scope::PlaylistReadPrivate => "playlist-read-private",
            Scope::PlaylistModifyPrivate => "playlist-modify-private",
            Scope::AppRemoteControl => "app-remote-control",
            Scope::Streaming => "streaming",
            Scope::UserReadEmail => "user-read-email",
            Scope::UserReadPrivate => "user-read-private",
            Scope::UserLibraryModify => "user-library-modify",
            Scope::UserLibraryRead => "user-library-read",
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| s.to_owned())
    }
}

// scopes order by their wire names so a set iterates in the same order it renders in
impl Ord for Scope {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for Scope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a scope string, splitting on runs of characters that are neither word characters nor hyphens. Unknown
    /// scopes are dropped, so garbled input degrades to a partial or empty set.
    pub fn parse(s: &str) -> Self {
        s.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
            .filter(|part| !part.is_empty())
            .filter_map(|part| match part.parse::<Scope>() {
                Ok(scope) => Some(scope),
                Err(unknown) => {
                    debug!("Ignoring unknown scope: {}", unknown);
                    None
                }
            })
            .collect()
    }

    pub fn insert(&mut self, scope: Scope) -> bool {
        self.0.insert(scope)
    }

    pub fn contains(&self, scope: Scope) -> bool {
        self.0.contains(&scope)
    }

    pub fn union(&self, other: &ScopeSet) -> ScopeSet {
        Self(self.0.union(&other.0).copied().collect())
    }

    pub fn is_subset(&self, other: &ScopeSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Scope> + '_ {
        self.0.iter().copied()
    }
}

impl Display for ScopeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, scope) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }

            f.write_str(scope.as_str())?;
        }

        Ok(())
    }
}

impl FromStr for ScopeSet {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl FromIterator<Scope> for ScopeSet {
    fn from_iter<T: IntoIterator<Item = Scope>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Scope> for ScopeSet {
    fn extend<T: IntoIterator<Item = Scope>>(&mut self, iter: T) {
        self.0.extend(iter)
    }
}

impl IntoIterator for ScopeSet {
    type Item = Scope;
    type IntoIter = std::collections::btree_set::IntoIter<Scope>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<const N: usize> From<[Scope; N]> for ScopeSet {
    fn from(scopes: [Scope; N]) -> Self {
        scopes.into_iter().collect()
    }
}

impl<I> ToScopesString for I
where
    I: IntoIterator<Item = Scope>,
{
    fn to_scopes_string(self) -> String {
        self.into_iter().collect::<ScopeSet>().to_string()
    }
}

impl Serialize for ScopeSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScopeSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // a missing or null scope in a token response or cache record is an empty set
        let scopes: Option<String> = Option::deserialize(deserializer)?;
        Ok(scopes.map(|s| ScopeSet::parse(&s)).unwrap_or_default())
    }
}
