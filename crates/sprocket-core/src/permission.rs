//! Platform permission set carried by every invoking identity.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Permissions the invoking member holds in the current scope.
    ///
    /// [`ADMINISTRATOR`](Self::ADMINISTRATOR) implies every other flag; use
    /// [`Permissions::satisfies`] rather than `contains` when checking a
    /// requirement.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Permissions: u32 {
        const KICK_MEMBERS     = 1 << 0;
        const BAN_MEMBERS      = 1 << 1;
        const MODERATE_MEMBERS = 1 << 2;
        const MANAGE_MESSAGES  = 1 << 3;
        const MANAGE_CHANNELS  = 1 << 4;
        const MANAGE_GUILD     = 1 << 5;
        const ADMINISTRATOR    = 1 << 6;
    }
}

impl Permissions {
    /// Returns `true` if `self` grants every flag in `required`.
    pub fn satisfies(self, required: Permissions) -> bool {
        self.contains(Self::ADMINISTRATOR) || self.contains(required)
    }

    /// Flags in `required` that `self` does not grant.
    pub fn missing(self, required: Permissions) -> Permissions {
        if self.contains(Self::ADMINISTRATOR) {
            Permissions::empty()
        } else {
            required.difference(self)
        }
    }

    /// Human-readable labels of the set flags, in declaration order.
    pub fn labels(self) -> Vec<&'static str> {
        self.iter()
            .filter_map(|flag| match flag {
                Self::KICK_MEMBERS => Some("Kick Members"),
                Self::BAN_MEMBERS => Some("Ban Members"),
                Self::MODERATE_MEMBERS => Some("Moderate Members"),
                Self::MANAGE_MESSAGES => Some("Manage Messages"),
                Self::MANAGE_CHANNELS => Some("Manage Channels"),
                Self::MANAGE_GUILD => Some("Manage Server"),
                Self::ADMINISTRATOR => Some("Administrator"),
                _ => None,
            })
            .collect()
    }
}
