//! Operation and event vocabulary shared by policies and the broker.
//!
//! Every client-initiated operation the host can gate corresponds to exactly
//! one [`AccessHook`]. Subscription events travel as a packed [`Event`] word
//! carrying a [`Facility`] code and an [`EventKind`] in separate bit fields,
//! matching the host's wire encoding.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One hook per gated operation. Discriminants are dense and index the
/// per-policy rule table and the per-client async cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessHook {
    GetSinkInfo,
    GetSourceInfo,
    GetSinkInputInfo,
    GetSourceOutputInfo,
    GetModuleInfo,
    GetClientInfo,
    GetSampleInfo,
    GetServerInfo,
    GetCardInfo,
    Stat,
    KillClient,
    KillSinkInput,
    KillSourceOutput,
    MoveSinkInput,
    MoveSourceOutput,
    SetSinkInputVolume,
    SetSinkInputMute,
    SetSourceOutputVolume,
    SetSourceOutputMute,
    SetSinkVolume,
    SetSinkMute,
    SetSourceVolume,
    SetSourceMute,
    SetDefaultSink,
    SetDefaultSource,
    SuspendSink,
    SuspendSource,
    SetCardProfile,
    LoadModule,
    UnloadModule,
    ConnectPlayback,
    ConnectRecord,
    PlaySample,
    RemoveSample,
    FilterSubscribeEvent,
}

impl AccessHook {
    /// All hooks, in discriminant order.
    pub const ALL: &'static [AccessHook] = &[
        Self::GetSinkInfo,
        Self::GetSourceInfo,
        Self::GetSinkInputInfo,
        Self::GetSourceOutputInfo,
        Self::GetModuleInfo,
        Self::GetClientInfo,
        Self::GetSampleInfo,
        Self::GetServerInfo,
        Self::GetCardInfo,
        Self::Stat,
        Self::KillClient,
        Self::KillSinkInput,
        Self::KillSourceOutput,
        Self::MoveSinkInput,
        Self::MoveSourceOutput,
        Self::SetSinkInputVolume,
        Self::SetSinkInputMute,
        Self::SetSourceOutputVolume,
        Self::SetSourceOutputMute,
        Self::SetSinkVolume,
        Self::SetSinkMute,
        Self::SetSourceVolume,
        Self::SetSourceMute,
        Self::SetDefaultSink,
        Self::SetDefaultSource,
        Self::SuspendSink,
        Self::SuspendSource,
        Self::SetCardProfile,
        Self::LoadModule,
        Self::UnloadModule,
        Self::ConnectPlayback,
        Self::ConnectRecord,
        Self::PlaySample,
        Self::RemoveSample,
        Self::FilterSubscribeEvent,
    ];

    /// Number of hooks; the length of every rule table and async cache.
    pub const COUNT: usize = Self::ALL.len();

    /// Table index for this hook.
    #[must_use]
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for AccessHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Object kind carried in the low bits of a subscription event word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Facility {
    Sink = 0,
    Source = 1,
    SinkInput = 2,
    SourceOutput = 3,
    Module = 4,
    Client = 5,
    SampleCache = 6,
    Server = 7,
    Card = 8,
}

impl Facility {
    /// All facilities, in code order.
    pub const ALL: &'static [Facility] = &[
        Self::Sink,
        Self::Source,
        Self::SinkInput,
        Self::SourceOutput,
        Self::Module,
        Self::Client,
        Self::SampleCache,
        Self::Server,
        Self::Card,
    ];

    /// Decode a facility code; codes outside the known range yield `None`.
    #[must_use]
    pub fn from_code(code: u32) -> Option<Facility> {
        Self::ALL.get(code as usize).copied()
    }

    /// The get-info hook used to probe whether a client may observe an
    /// object of this facility. The mapping is constant.
    #[must_use]
    pub fn info_hook(self) -> AccessHook {
        match self {
            Facility::Sink => AccessHook::GetSinkInfo,
            Facility::Source => AccessHook::GetSourceInfo,
            Facility::SinkInput => AccessHook::GetSinkInputInfo,
            Facility::SourceOutput => AccessHook::GetSourceOutputInfo,
            Facility::Module => AccessHook::GetModuleInfo,
            Facility::Client => AccessHook::GetClientInfo,
            Facility::SampleCache => AccessHook::GetSampleInfo,
            Facility::Server => AccessHook::GetServerInfo,
            Facility::Card => AccessHook::GetCardInfo,
        }
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// What happened to the object a subscription event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum EventKind {
    New = 0x0000,
    Change = 0x0010,
    Remove = 0x0020,
}

/// Bits of the event word holding the facility code.
pub const FACILITY_MASK: u32 = 0x000f;
/// Bits of the event word holding the event kind.
pub const TYPE_MASK: u32 = 0x0030;

/// Packed subscription event word: facility code in the low nibble, event
/// kind in the next two bits. Unknown bit patterns decode to `None` and are
/// blocked by the event filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event(u32);

impl Event {
    /// Pack an event word from its parts.
    #[must_use]
    pub fn new(kind: EventKind, facility: Facility) -> Event {
        Event(kind as u32 | facility as u32)
    }

    /// Wrap a raw word as received from the host.
    #[must_use]
    pub fn from_raw(word: u32) -> Event {
        Event(word)
    }

    /// The raw word.
    #[must_use]
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Decode the facility bits.
    #[must_use]
    pub fn facility(self) -> Option<Facility> {
        Facility::from_code(self.0 & FACILITY_MASK)
    }

    /// Decode the kind bits.
    #[must_use]
    pub fn kind(self) -> Option<EventKind> {
        match self.0 & TYPE_MASK {
            0x0000 => Some(EventKind::New),
            0x0010 => Some(EventKind::Change),
            0x0020 => Some(EventKind::Remove),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_indices_are_dense() {
        for (i, hook) in AccessHook::ALL.iter().enumerate() {
            assert_eq!(hook.index(), i);
        }
        assert_eq!(AccessHook::COUNT, AccessHook::ALL.len());
    }

    #[test]
    fn facility_codes_round_trip() {
        for facility in Facility::ALL {
            assert_eq!(Facility::from_code(*facility as u32), Some(*facility));
        }
        assert_eq!(Facility::from_code(9), None);
        assert_eq!(Facility::from_code(FACILITY_MASK), None);
    }

    #[test]
    fn every_facility_maps_to_a_get_info_hook() {
        assert_eq!(Facility::Sink.info_hook(), AccessHook::GetSinkInfo);
        assert_eq!(Facility::SinkInput.info_hook(), AccessHook::GetSinkInputInfo);
        assert_eq!(Facility::SampleCache.info_hook(), AccessHook::GetSampleInfo);
        assert_eq!(Facility::Card.info_hook(), AccessHook::GetCardInfo);
    }

    #[test]
    fn event_word_packs_and_unpacks() {
        let event = Event::new(EventKind::Change, Facility::SourceOutput);
        assert_eq!(event.raw(), 0x0013);
        assert_eq!(event.facility(), Some(Facility::SourceOutput));
        assert_eq!(event.kind(), Some(EventKind::Change));
    }

    #[test]
    fn malformed_event_bits_decode_to_none() {
        let bad_kind = Event::from_raw(0x0030);
        assert_eq!(bad_kind.kind(), None);
        assert_eq!(bad_kind.facility(), Some(Facility::Sink));

        let bad_facility = Event::from_raw(0x000b);
        assert_eq!(bad_facility.facility(), None);
        assert_eq!(bad_facility.kind(), Some(EventKind::New));
    }
}
