//! Playback state types.
//!
//! A [`PlaybackState`] pairs a caller-visible [`MainState`] with an optional
//! [`SubPhase`]. Idle is a single looping clip and carries no phase; every
//! other main state plays `Start -> Repeat* -> End`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic animation intent chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MainState {
    /// Standing / waiting loop.
    #[default]
    Idle,
    /// Listening: the avatar takes notes.
    Writing,
    /// Speaking / translating.
    Talking,
}

impl MainState {
    pub const ALL: [MainState; 3] = [MainState::Idle, MainState::Writing, MainState::Talking];

    pub fn is_idle(self) -> bool {
        self == MainState::Idle
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MainState::Idle => "idle",
            MainState::Writing => "writing",
            MainState::Talking => "talking",
        }
    }

    /// Parse a state name; accepts the host-facing intent names as aliases
    /// (`init`, `listen`, `translate`).
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "idle" | "init" | "wait" => Some(MainState::Idle),
            "writing" | "listen" => Some(MainState::Writing),
            "talking" | "talk" | "translate" => Some(MainState::Talking),
            _ => None,
        }
    }
}

impl fmt::Display for MainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of a non-idle clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubPhase {
    Start,
    Repeat,
    End,
}

impl SubPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SubPhase::Start => "start",
            SubPhase::Repeat => "repeat",
            SubPhase::End => "end",
        }
    }
}

impl fmt::Display for SubPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What is currently playing.
///
/// `sub` is `None` exactly when `main` is [`MainState::Idle`]. The fields
/// are private and deserialized values go through [`PlaybackState::clip`],
/// so the pairing always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawPlaybackState")]
pub struct PlaybackState {
    main: MainState,
    sub: Option<SubPhase>,
}

#[derive(Deserialize)]
struct RawPlaybackState {
    main: MainState,
    #[serde(default)]
    sub: Option<SubPhase>,
}

impl From<RawPlaybackState> for PlaybackState {
    fn from(raw: RawPlaybackState) -> Self {
        match raw.sub {
            Some(sub) => Self::clip(raw.main, sub),
            // A non-idle state always plays one of its phases.
            None => Self::entry(raw.main),
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::idle()
    }
}

impl PlaybackState {
    pub fn idle() -> Self {
        Self {
            main: MainState::Idle,
            sub: None,
        }
    }

    /// A phase of `main`. Passing `Idle` yields the idle state.
    pub fn clip(main: MainState, sub: SubPhase) -> Self {
        if main.is_idle() {
            return Self::idle();
        }
        Self {
            main,
            sub: Some(sub),
        }
    }

    pub fn main(&self) -> MainState {
        self.main
    }

    /// Phase of `main`; `None` for idle.
    pub fn sub(&self) -> Option<SubPhase> {
        self.sub
    }

    /// First state played when entering `main`.
    pub fn entry(main: MainState) -> Self {
        Self::clip(main, SubPhase::Start)
    }

    /// Idle and Repeat clips loop; Start and End play once.
    pub fn is_looping(&self) -> bool {
        matches!(self.sub, None | Some(SubPhase::Repeat))
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_state(self)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub {
            Some(sub) => write!(f, "({}, {})", self.main, sub),
            None => write!(f, "{}", self.main),
        }
    }
}

/// Stable cache key for a clip, e.g. `idle` or `writing_start`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn for_state(state: &PlaybackState) -> Self {
        match state.sub {
            Some(sub) => Self(format!("{}_{}", state.main.as_str(), sub.as_str())),
            None => Self(state.main.as_str().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Every playback state the controller can reach.
pub fn all_playback_states() -> Vec<PlaybackState> {
    let mut out = vec![PlaybackState::idle()];
    for main in MainState::ALL.iter().copied().filter(|m| !m.is_idle()) {
        for sub in [SubPhase::Start, SubPhase::Repeat, SubPhase::End] {
            out.push(PlaybackState::clip(main, sub));
        }
    }
    out
}
