//! # Caresched Types
//!
//! Shared domain vocabulary for the care-episode scheduling engine.
//!
//! This crate holds the enums and validated newtypes used across the core
//! engine and the API layers. It carries no persistence or HTTP concerns so
//! that every other crate can depend on it without dragging in a stack.

pub mod text;

pub use text::{NonEmptyText, TextError};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when parsing a stored enum discriminant fails.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Stable wire/storage representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError::new(stringify!($name), other)),
                }
            }
        }
    };
}

string_enum! {
    /// Clinical reason scoping an episode. Immutable after episode creation;
    /// the stage catalog is versioned per reason.
    EpisodeReason {
        Trauma => "trauma",
        Congenital => "congenital",
        Oncologic => "oncologic",
    }
}

impl EpisodeReason {
    /// Hungarian display label used by the clinic's intake forms.
    pub fn label_hu(&self) -> &'static str {
        match self {
            Self::Trauma => "trauma utáni állapot",
            Self::Congenital => "veleszületett rendellenesség",
            Self::Oncologic => "onkológiai kezelés utáni állapot",
        }
    }
}

string_enum! {
    /// Lifecycle of a care episode.
    EpisodeStatus {
        Open => "open",
        Closed => "closed",
    }
}

string_enum! {
    /// Scheduling category shared by slots, intents and appointments.
    Pool {
        Consult => "consult",
        Work => "work",
        Control => "control",
    }
}

string_enum! {
    /// State machine of a slot intent: `open` is the only non-terminal state.
    IntentState {
        Open => "open",
        Converted => "converted",
        Expired => "expired",
    }
}

string_enum! {
    /// Lifecycle state of a bookable time slot.
    SlotState {
        Free => "free",
        Held => "held",
        Booked => "booked",
        Cancelled => "cancelled",
    }
}

string_enum! {
    /// Explicit appointment outcome. A pending/active appointment stores no
    /// status at all (`NULL` in the row); once one of these values is set the
    /// status never changes again.
    AppointmentStatus {
        Completed => "completed",
        CancelledByDoctor => "cancelled_by_doctor",
        CancelledByPatient => "cancelled_by_patient",
        NoShow => "no_show",
    }
}

impl AppointmentStatus {
    /// True for the outcomes that release the booked demand: cancellations
    /// and no-shows roll the originating intent back and free the slot.
    pub fn releases_booking(&self) -> bool {
        matches!(
            self,
            Self::CancelledByDoctor | Self::CancelledByPatient | Self::NoShow
        )
    }
}

/// Whether an appointment still occupies its slot. Pending (no status) and
/// completed appointments count as occupying; cancellations and no-shows do
/// not. This is the predicate behind the double-booking and one-hard-next
/// checks.
pub fn occupies_slot(status: Option<AppointmentStatus>) -> bool {
    match status {
        None => true,
        Some(AppointmentStatus::Completed) => true,
        Some(s) => !s.releases_booking(),
    }
}

string_enum! {
    /// Publication lifecycle of a stage-transition ruleset.
    RulesetStatus {
        Draft => "DRAFT",
        Published => "PUBLISHED",
        Deprecated => "DEPRECATED",
    }
}

string_enum! {
    /// Typed reason why an episode cannot currently progress.
    BlockKey {
        WaitLab => "WAIT_LAB",
        WaitHealing => "WAIT_HEALING",
        WaitSurgery => "WAIT_SURGERY",
        PatientDelay => "PATIENT_DELAY",
        WaitOr => "WAIT_OR",
        WaitImplant => "WAIT_IMPLANT",
        Other => "OTHER",
    }
}

impl BlockKey {
    /// Default time-to-live applied when a block of this kind is created.
    pub fn default_ttl_days(&self) -> i64 {
        match self {
            Self::WaitLab => 14,
            Self::WaitHealing => 42,
            Self::WaitSurgery => 60,
            Self::PatientDelay => 30,
            Self::WaitOr => 90,
            Self::WaitImplant => 120,
            Self::Other => 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_round_trips_through_storage_text() {
        assert_eq!("work".parse::<Pool>().unwrap(), Pool::Work);
        assert_eq!(Pool::Work.as_str(), "work");
        assert_eq!(
            "cancelled_by_patient".parse::<AppointmentStatus>().unwrap(),
            AppointmentStatus::CancelledByPatient
        );
        assert_eq!(RulesetStatus::Published.as_str(), "PUBLISHED");
        assert_eq!("WAIT_OR".parse::<BlockKey>().unwrap(), BlockKey::WaitOr);
    }

    #[test]
    fn unknown_discriminant_is_an_error() {
        let err = "held_forever".parse::<SlotState>().unwrap_err();
        assert!(err.to_string().contains("held_forever"));
    }

    #[test]
    fn slot_occupancy_predicate() {
        assert!(occupies_slot(None));
        assert!(occupies_slot(Some(AppointmentStatus::Completed)));
        assert!(!occupies_slot(Some(AppointmentStatus::NoShow)));
        assert!(!occupies_slot(Some(AppointmentStatus::CancelledByDoctor)));
    }

    #[test]
    fn block_ttls_are_positive() {
        for key in [
            BlockKey::WaitLab,
            BlockKey::WaitHealing,
            BlockKey::WaitSurgery,
            BlockKey::PatientDelay,
            BlockKey::WaitOr,
            BlockKey::WaitImplant,
            BlockKey::Other,
        ] {
            assert!(key.default_ttl_days() > 0);
        }
    }
}
